//! Settings shared by the core components.
//!
//! These are validated runtime values. Loading them from a file is the
//! server crate's job.

mod config_store;
mod settings;

pub use config_store::ConfigStore;
pub use settings::{ConfigFileCacheSettings, LongPollSettings, ScanSettings};
