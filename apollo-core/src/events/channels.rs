//! Event channel factories.

use super::types::DispatchJob;
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type DispatchJobSender = mpsc::Sender<DispatchJob>;
pub type DispatchJobReceiver = mpsc::Receiver<DispatchJob>;

/// Create the channel feeding the notification dispatcher.
pub fn dispatch_job_channel() -> (DispatchJobSender, DispatchJobReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
