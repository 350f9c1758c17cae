//! Events passed between the background workers.
//!
//! # Event Flow
//!
//! 1. `ReleaseMessageScanner` reads a new row and calls its listeners
//! 2. `NotificationService` wakes waiting polls inline, or emits a
//!    `DispatchJob` when there are too many of them
//! 3. `NotificationDispatcher` wakes the job's polls batch by batch

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, DispatchJobReceiver, DispatchJobSender, dispatch_job_channel,
};
pub use types::DispatchJob;
