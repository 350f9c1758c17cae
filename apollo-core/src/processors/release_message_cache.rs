//! In-memory replica of the release message log.
//!
//! Maps each watch key to the newest release message recorded for it.
//! Readers load an immutable snapshot without locking. All writes go through
//! one merge routine serialized by `merge_lock`, which builds the next
//! snapshot and swaps it in whole.
//!
//! Lifecycle is `Empty -> Loading -> Warm`. [`ReleaseMessageCache::warm_up`]
//! must complete before the cache is advertised as ready, because an empty
//! replica would under-report changes to long-polling clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::entities::{ReleaseMessage, SCAN_BATCH_SIZE};
use crate::processors::release_message_scanner::{ListenerError, ReleaseMessageListener};
use crate::store::{ReleaseMessageStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Loading,
    Warm,
}

impl CacheState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CacheState::Empty,
            1 => CacheState::Loading,
            _ => CacheState::Warm,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CacheState::Empty => 0,
            CacheState::Loading => 1,
            CacheState::Warm => 2,
        }
    }
}

#[derive(Debug, Error)]
#[error("release message cache warm-up failed after {loaded} rows: {source}")]
pub struct WarmUpError {
    pub loaded: usize,
    #[source]
    pub source: StoreError,
}

type Snapshot = HashMap<String, Arc<ReleaseMessage>>;

pub struct ReleaseMessageCache {
    store: Arc<dyn ReleaseMessageStore>,
    /// Keyed by the lowercased message.
    entries: ArcSwap<Snapshot>,
    state: AtomicU8,
    max_id_scanned: AtomicI64,
    merge_lock: Mutex<()>,
}

impl ReleaseMessageCache {
    pub fn new(store: Arc<dyn ReleaseMessageStore>) -> Self {
        Self {
            store,
            entries: ArcSwap::from_pointee(Snapshot::new()),
            state: AtomicU8::new(CacheState::Empty.as_u8()),
            max_id_scanned: AtomicI64::new(0),
            merge_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> CacheState {
        CacheState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_warm(&self) -> bool {
        self.state() == CacheState::Warm
    }

    /// Highest log id merged so far.
    pub fn max_id_scanned(&self) -> i64 {
        self.max_id_scanned.load(Ordering::Acquire)
    }

    /// Load the whole log. Returns the number of rows read.
    ///
    /// A no-op once warm. On failure the cache stays unready and the call
    /// may be retried.
    pub async fn warm_up(&self) -> Result<usize, WarmUpError> {
        let _guard = self.merge_lock.lock().await;
        if self.is_warm() {
            return Ok(0);
        }
        self.state.store(CacheState::Loading.as_u8(), Ordering::Release);

        let mut snapshot = Snapshot::new();
        let mut max_id = 0;
        let mut loaded = 0;
        loop {
            let batch = self
                .store
                .find_new_messages(max_id, SCAN_BATCH_SIZE)
                .await
                .map_err(|source| WarmUpError { loaded, source })?;
            let has_more = batch.len() as i64 == SCAN_BATCH_SIZE;
            loaded += batch.len();
            for row in batch {
                max_id = max_id.max(row.id);
                merge_into(&mut snapshot, row);
            }
            debug!(loaded, max_id, "Release message warm-up progress");
            if !has_more {
                break;
            }
        }

        let keys = snapshot.len();
        self.entries.store(Arc::new(snapshot));
        self.max_id_scanned.store(max_id, Ordering::Release);
        self.state.store(CacheState::Warm.as_u8(), Ordering::Release);
        info!(loaded, keys, max_id, "Release message cache is warm");
        Ok(loaded)
    }

    /// Merge every row added since the last scan.
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        let _guard = self.merge_lock.lock().await;
        self.scan_locked().await
    }

    /// Low-latency path for a row that just landed in the log.
    ///
    /// The row is merged directly only if it is the next id. If ids were
    /// skipped, the hole is filled from the log first; should that fail,
    /// the row is left for the refresh loop rather than merged ahead of
    /// the rows it skipped.
    pub async fn handle_pushed(&self, message: &ReleaseMessage) -> Result<(), StoreError> {
        if !self.is_warm() {
            debug!(id = message.id, "Release message cache not warm, ignoring pushed row");
            return Ok(());
        }
        let _guard = self.merge_lock.lock().await;
        let last = self.max_id_scanned();
        if message.id <= last {
            return Ok(());
        }
        if message.id == last + 1 {
            self.merge_locked(std::slice::from_ref(message));
            return Ok(());
        }

        debug!(
            id = message.id,
            max_id_scanned = last,
            "Gap before pushed release message, scanning log"
        );
        self.scan_locked().await?;
        if self.max_id_scanned() < message.id {
            warn!(
                id = message.id,
                max_id_scanned = self.max_id_scanned(),
                "Gap scan did not reach pushed release message, deferring to refresh loop"
            );
        }
        Ok(())
    }

    /// Latest id for each of `keys` that has one. Absent keys are omitted.
    ///
    /// Before warm-up completes this reads the log directly instead.
    pub async fn latest_for_keys(&self, keys: &[String]) -> Vec<(String, i64)> {
        if self.is_warm() {
            let snapshot = self.entries.load();
            return keys
                .iter()
                .filter_map(|key| {
                    snapshot
                        .get(&key.to_lowercase())
                        .map(|row| (key.clone(), row.id))
                })
                .collect();
        }

        match self.store.find_latest(keys).await {
            Ok(rows) => {
                let latest: HashMap<String, i64> = rows
                    .into_iter()
                    .map(|row| (row.message.to_lowercase(), row.id))
                    .collect();
                keys.iter()
                    .filter_map(|key| latest.get(&key.to_lowercase()).map(|id| (key.clone(), *id)))
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read latest release messages before warm-up");
                Vec::new()
            }
        }
    }

    /// Cached row for one key.
    pub fn get(&self, key: &str) -> Option<Arc<ReleaseMessage>> {
        self.entries.load().get(&key.to_lowercase()).cloned()
    }

    /// Run the incremental refresh loop until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        info!("ReleaseMessageCache refresher started");
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("ReleaseMessageCache refresher received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Release message scan failed, retrying next tick");
                    }
                }
            }
        }
    }

    async fn scan_locked(&self) -> Result<usize, StoreError> {
        let mut merged = 0;
        loop {
            let batch = self
                .store
                .find_new_messages(self.max_id_scanned(), SCAN_BATCH_SIZE)
                .await?;
            let has_more = batch.len() as i64 == SCAN_BATCH_SIZE;
            merged += batch.len();
            self.merge_locked(&batch);
            if !has_more {
                break;
            }
        }
        Ok(merged)
    }

    /// Must be called with `merge_lock` held.
    fn merge_locked(&self, rows: &[ReleaseMessage]) {
        if rows.is_empty() {
            return;
        }
        let current = self.entries.load();
        let mut next: Option<Snapshot> = None;
        let mut max_id = self.max_id_scanned();
        for row in rows {
            max_id = max_id.max(row.id);
            if !supersedes(current.get(&row.message.to_lowercase()), row) {
                continue;
            }
            let snapshot = next.get_or_insert_with(|| Snapshot::clone(&current));
            merge_into(snapshot, row.clone());
        }
        if let Some(snapshot) = next {
            self.entries.store(Arc::new(snapshot));
        }
        self.max_id_scanned.store(max_id, Ordering::Release);
    }
}

fn supersedes(existing: Option<&Arc<ReleaseMessage>>, row: &ReleaseMessage) -> bool {
    existing.is_none_or(|current| current.id < row.id)
}

fn merge_into(snapshot: &mut Snapshot, row: ReleaseMessage) {
    let key = row.message.to_lowercase();
    if supersedes(snapshot.get(&key), &row) {
        snapshot.insert(key, Arc::new(row));
    }
}

#[async_trait]
impl ReleaseMessageListener for ReleaseMessageCache {
    async fn handle_message(&self, message: &ReleaseMessage) -> Result<(), ListenerError> {
        Ok(self.handle_pushed(message).await?)
    }
}
