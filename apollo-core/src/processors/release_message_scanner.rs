//! Polls the release message log and fans every new row out to listeners.
//!
//! Listeners are called one at a time in registration order. The server
//! registers the release message cache first, so by the time a long-poll
//! wake-up runs the cache already reports the new id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::entities::{ReleaseMessage, SCAN_BATCH_SIZE};
use crate::store::{ReleaseMessageStore, StoreError};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Reacts to a row that has just landed in the log.
#[async_trait]
pub trait ReleaseMessageListener: Send + Sync {
    async fn handle_message(&self, message: &ReleaseMessage) -> Result<(), ListenerError>;
}

pub struct ReleaseMessageScanner {
    store: Arc<dyn ReleaseMessageStore>,
    listeners: Vec<Arc<dyn ReleaseMessageListener>>,
    max_id_scanned: i64,
    interval: Duration,
}

impl ReleaseMessageScanner {
    pub fn new(store: Arc<dyn ReleaseMessageStore>, interval: Duration) -> Self {
        Self {
            store,
            listeners: Vec::new(),
            max_id_scanned: 0,
            interval,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ReleaseMessageListener>) {
        self.listeners.push(listener);
    }

    /// Only rows with an id above `id` will be delivered.
    pub fn start_after(&mut self, id: i64) {
        self.max_id_scanned = id;
    }

    pub fn max_id_scanned(&self) -> i64 {
        self.max_id_scanned
    }

    /// Deliver every row added since the last scan. Returns how many.
    pub async fn scan(&mut self) -> Result<usize, StoreError> {
        let mut delivered = 0;
        loop {
            let batch = self
                .store
                .find_new_messages(self.max_id_scanned, SCAN_BATCH_SIZE)
                .await?;
            let has_more = batch.len() as i64 == SCAN_BATCH_SIZE;
            for message in &batch {
                self.fire(message).await;
                self.max_id_scanned = message.id;
                delivered += 1;
            }
            if !has_more {
                break;
            }
        }
        Ok(delivered)
    }

    async fn fire(&self, message: &ReleaseMessage) {
        debug!(id = message.id, message = %message.message, "Delivering release message");
        for listener in &self.listeners {
            if let Err(e) = listener.handle_message(message).await {
                warn!(
                    id = message.id,
                    message = %message.message,
                    error = %e,
                    "Release message listener failed"
                );
            }
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            max_id_scanned = self.max_id_scanned,
            listeners = self.listeners.len(),
            "ReleaseMessageScanner started"
        );
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("ReleaseMessageScanner received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.scan().await {
                        warn!(error = %e, "Release message scan failed, retrying next tick");
                    }
                }
            }
        }
    }
}
