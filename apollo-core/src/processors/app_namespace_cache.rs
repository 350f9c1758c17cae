//! In-memory replica of the `app_namespace` table.
//!
//! New rows are picked up by an incremental id scan; updates and deletions
//! only show up on the periodic full rebuild. Readers see an immutable
//! snapshot swapped in atomically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apollo_sdk::constants::join_key;
use arc_swap::ArcSwap;
use kanau::processor::Processor;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::entities::app_namespace::FindAppNamespacesAfter;
use crate::entities::{AppNamespace, SCAN_BATCH_SIZE};
use crate::framework::DatabaseProcessor;
use crate::store::StoreError;
use crate::watch_keys::AppNamespaceMetadata;

#[derive(Debug, Default, Clone)]
struct AppNamespaceIndex {
    by_app_and_name: HashMap<String, AppNamespace>,
    public_by_name: HashMap<String, AppNamespace>,
    max_id: i64,
}

impl AppNamespaceIndex {
    fn insert(&mut self, namespace: AppNamespace) {
        self.max_id = self.max_id.max(namespace.id);
        let name_key = namespace.name.to_lowercase();
        if namespace.is_public {
            self.public_by_name.insert(name_key, namespace.clone());
        } else if self
            .public_by_name
            .get(&name_key)
            .is_some_and(|existing| existing.id == namespace.id)
        {
            self.public_by_name.remove(&name_key);
        }
        self.by_app_and_name
            .insert(app_name_key(&namespace.app_id, &namespace.name), namespace);
    }
}

fn app_name_key(app_id: &str, namespace: &str) -> String {
    join_key(&[app_id, namespace]).to_lowercase()
}

pub struct AppNamespaceCache {
    index: ArcSwap<AppNamespaceIndex>,
    refresh_lock: Mutex<()>,
}

impl Default for AppNamespaceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AppNamespaceCache {
    pub fn new() -> Self {
        Self {
            index: ArcSwap::from_pointee(AppNamespaceIndex::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn from_rows(rows: impl IntoIterator<Item = AppNamespace>) -> Self {
        let cache = Self::new();
        cache.replace_all(rows);
        cache
    }

    /// Largest row id seen so far.
    pub fn max_id(&self) -> i64 {
        self.index.load().max_id
    }

    pub fn len(&self) -> usize {
        self.index.load().by_app_and_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge rows into the current snapshot.
    pub fn apply(&self, rows: impl IntoIterator<Item = AppNamespace>) {
        let mut next = AppNamespaceIndex::clone(&self.index.load());
        for row in rows {
            next.insert(row);
        }
        self.index.store(Arc::new(next));
    }

    /// Swap in a snapshot built from `rows` alone.
    pub fn replace_all(&self, rows: impl IntoIterator<Item = AppNamespace>) {
        let mut next = AppNamespaceIndex::default();
        for row in rows {
            next.insert(row);
        }
        self.index.store(Arc::new(next));
    }

    /// Load rows added since the last scan.
    pub async fn scan_new(&self, db: &DatabaseProcessor) -> Result<usize, StoreError> {
        let _guard = self.refresh_lock.lock().await;
        let rows = load_after(db, self.max_id()).await?;
        let count = rows.len();
        if count > 0 {
            self.apply(rows);
            debug!(count, max_id = self.max_id(), "Loaded new app namespaces");
        }
        Ok(count)
    }

    /// Reload the whole table.
    pub async fn rebuild(&self, db: &DatabaseProcessor) -> Result<usize, StoreError> {
        let _guard = self.refresh_lock.lock().await;
        let rows = load_after(db, 0).await?;
        let count = rows.len();
        self.replace_all(rows);
        Ok(count)
    }

    /// Keep the replica current until shutdown.
    pub async fn run(
        self: Arc<Self>,
        db: DatabaseProcessor,
        scan_interval: Duration,
        rebuild_interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("AppNamespaceCache refresher started");

        let mut scan = tokio::time::interval_at(tokio::time::Instant::now() + scan_interval, scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rebuild = tokio::time::interval_at(
            tokio::time::Instant::now() + rebuild_interval,
            rebuild_interval,
        );
        rebuild.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("AppNamespaceCache refresher received shutdown signal");
                        break;
                    }
                }

                _ = rebuild.tick() => {
                    match self.rebuild(&db).await {
                        Ok(count) => debug!(count, "Rebuilt app namespace cache"),
                        Err(e) => warn!(error = %e, "Failed to rebuild app namespace cache"),
                    }
                }

                _ = scan.tick() => {
                    if let Err(e) = self.scan_new(&db).await {
                        warn!(error = %e, "Failed to scan new app namespaces");
                    }
                }
            }
        }
    }
}

async fn load_after(db: &DatabaseProcessor, mut after_id: i64) -> Result<Vec<AppNamespace>, StoreError> {
    let mut rows = Vec::new();
    loop {
        let batch = db
            .process(FindAppNamespacesAfter {
                after_id,
                limit: SCAN_BATCH_SIZE,
            })
            .await?;
        let has_more = batch.len() as i64 == SCAN_BATCH_SIZE;
        if let Some(last) = batch.last() {
            after_id = last.id;
        }
        rows.extend(batch);
        if !has_more {
            break;
        }
    }
    Ok(rows)
}

impl AppNamespaceMetadata for AppNamespaceCache {
    fn find_by_app_and_name(&self, app_id: &str, namespace: &str) -> Option<AppNamespace> {
        self.index
            .load()
            .by_app_and_name
            .get(&app_name_key(app_id, namespace))
            .cloned()
    }

    fn find_public_by_name(&self, namespace: &str) -> Option<AppNamespace> {
        self.index
            .load()
            .public_by_name
            .get(&namespace.to_lowercase())
            .cloned()
    }
}
