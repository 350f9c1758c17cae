//! Spreads large wake-ups over time.
//!
//! When thousands of clients wait on one namespace, waking them all at once
//! makes them all re-fetch at once. Jobs are handled one at a time by a
//! single worker, waking `batch_size` polls and then pausing for
//! `batch_interval`. The pause goes through [`Clock`] so tests can observe it
//! without sleeping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::events::{DispatchJob, DispatchJobReceiver};

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Wake the job's polls in batches. Returns how many polls this call
/// resolved; polls that already resolved another way are skipped.
pub async fn dispatch_in_batches(clock: &dyn Clock, job: DispatchJob) -> usize {
    let batch_size = job.batch_size.max(1);
    let mut resolved = 0;
    for (i, poll) in job.polls.iter().enumerate() {
        if i > 0 && i % batch_size == 0 {
            clock.sleep(job.batch_interval).await;
        }
        if poll.complete(vec![job.notification.clone()]) {
            resolved += 1;
        }
    }
    resolved
}

pub struct NotificationDispatcher {
    clock: Arc<dyn Clock>,
    job_rx: DispatchJobReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl NotificationDispatcher {
    pub fn new(
        clock: Arc<dyn Clock>,
        job_rx: DispatchJobReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            clock,
            job_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("NotificationDispatcher started");
        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("NotificationDispatcher received shutdown signal");
                        break;
                    }
                }

                Some(job) = self.job_rx.recv() => {
                    let namespace = job.notification.namespace_name.clone();
                    let total = job.polls.len();
                    let resolved = dispatch_in_batches(self.clock.as_ref(), job).await;
                    debug!(namespace = %namespace, total, resolved, "Batched wake-up finished");
                }

                else => {
                    info!("Dispatch job channel closed");
                    break;
                }
            }
        }
        info!("NotificationDispatcher shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::long_poll::PendingPoll;
    use apollo_sdk::objects::ConfigNotification;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().push(duration);
        }
    }

    fn job(polls: Vec<Arc<PendingPoll>>, batch_size: usize) -> DispatchJob {
        DispatchJob {
            notification: ConfigNotification::new("app", 42),
            polls,
            batch_size,
            batch_interval: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn pauses_between_batches_only() {
        let (polls, mut receivers): (Vec<_>, Vec<_>) =
            (0..250).map(PendingPoll::new_for_test).unzip();
        let clock = RecordingClock::default();

        let resolved = dispatch_in_batches(&clock, job(polls, 100)).await;

        assert_eq!(resolved, 250);
        assert_eq!(*clock.sleeps.lock(), vec![Duration::from_millis(100); 2]);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap()[0].notification_id, 42);
        }
    }

    #[tokio::test]
    async fn exact_multiple_needs_no_trailing_pause() {
        let (polls, _receivers): (Vec<_>, Vec<_>) = (0..200).map(PendingPoll::new_for_test).unzip();
        let clock = RecordingClock::default();
        dispatch_in_batches(&clock, job(polls, 100)).await;
        assert_eq!(clock.sleeps.lock().len(), 1);
    }

    #[tokio::test]
    async fn already_resolved_polls_are_skipped() {
        let (polls, _receivers): (Vec<_>, Vec<_>) = (0..3).map(PendingPoll::new_for_test).unzip();
        polls[1].complete(Vec::new());
        let clock = RecordingClock::default();
        assert_eq!(dispatch_in_batches(&clock, job(polls, 100)).await, 2);
    }
}
