use std::sync::Arc;
use std::time::Duration;

use apollo_sdk::objects::ConfigNotification;

use crate::processors::long_poll::PendingPoll;

/// A wake-up too large to deliver inline: the same notification goes to
/// every poll, `batch_size` polls at a time with `batch_interval` between
/// batches.
#[derive(Debug)]
pub struct DispatchJob {
    pub notification: ConfigNotification,
    pub polls: Vec<Arc<PendingPoll>>,
    pub batch_size: usize,
    pub batch_interval: Duration,
}
