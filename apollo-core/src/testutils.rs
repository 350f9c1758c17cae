//! In-memory stand-ins for the database and collaborators, shared by the
//! unit tests here and the router tests of the server crate.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::entities::{AppNamespace, Release, ReleaseMessage};
use crate::processors::app_namespace_cache::AppNamespaceCache;
use crate::processors::gray_release_rules::GrayReleasePredicate;
use crate::render::{ConfigRenderer, RenderError};
use crate::store::{ReleaseMessageStore, ReleaseSource, StoreError};
use crate::watch_keys::AppNamespaceMetadata;

pub fn static_metadata(rows: Vec<AppNamespace>) -> Arc<dyn AppNamespaceMetadata> {
    Arc::new(AppNamespaceCache::from_rows(rows))
}

/// Append-only release message log with ids starting at 1.
#[derive(Default)]
pub struct InMemoryReleaseLog {
    rows: Mutex<Vec<ReleaseMessage>>,
    failing: AtomicBool,
}

impl InMemoryReleaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: impl Into<String>) -> ReleaseMessage {
        let mut rows = self.rows.lock();
        let id = rows.last().map_or(1, |row| row.id + 1);
        let row = ReleaseMessage::new(id, message);
        rows.push(row.clone());
        row
    }

    /// Make every read fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("release log offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseMessageStore for InMemoryReleaseLog {
    async fn find_new_messages(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<ReleaseMessage>, StoreError> {
        self.check()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_latest(&self, keys: &[String]) -> Result<Vec<ReleaseMessage>, StoreError> {
        self.check()?;
        let rows = self.rows.lock();
        Ok(keys
            .iter()
            .filter_map(|key| {
                rows.iter()
                    .rev()
                    .find(|row| row.message.eq_ignore_ascii_case(key))
                    .cloned()
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryReleases {
    rows: Mutex<Vec<Release>>,
}

impl InMemoryReleases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, id: i64, app_id: &str, cluster: &str, namespace: &str, configurations: &str) {
        self.rows.lock().push(Release {
            id,
            release_key: format!("{id}-{app_id}-{cluster}-{namespace}"),
            app_id: app_id.into(),
            cluster_name: cluster.into(),
            namespace_name: namespace.into(),
            configurations: configurations.into(),
            is_abandoned: false,
        });
    }

    pub fn abandon(&self, id: i64) {
        for row in self.rows.lock().iter_mut().filter(|row| row.id == id) {
            row.is_abandoned = true;
        }
    }
}

#[async_trait]
impl ReleaseSource for InMemoryReleases {
    async fn find_latest_active(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Result<Option<Release>, StoreError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| {
                !row.is_abandoned
                    && row.app_id == app_id
                    && row.cluster_name == cluster
                    && row.namespace_name == namespace
            })
            .max_by_key(|row| row.id)
            .cloned())
    }

    async fn find_active_by_id(&self, id: i64) -> Result<Option<Release>, StoreError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|row| row.id == id && !row.is_abandoned)
            .cloned())
    }
}

/// Gray predicate driven by the test.
pub struct ToggleGray {
    value: AtomicBool,
    flip_after: AtomicI64,
    checks: AtomicUsize,
}

impl Default for ToggleGray {
    fn default() -> Self {
        Self {
            value: AtomicBool::new(false),
            flip_after: AtomicI64::new(-1),
            checks: AtomicUsize::new(0),
        }
    }
}

impl ToggleGray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Answer `false` for the next `checks` calls, `true` afterwards.
    pub fn flip_after_checks(&self, checks: usize) {
        self.checks.store(0, Ordering::SeqCst);
        self.flip_after
            .store(i64::try_from(checks).unwrap_or(i64::MAX), Ordering::SeqCst);
    }
}

impl GrayReleasePredicate for ToggleGray {
    fn has_gray_rule(&self, _client_app_id: &str, _client_ip: Option<&str>, _namespace: &str) -> bool {
        let seen = self.checks.fetch_add(1, Ordering::SeqCst);
        let flip_after = self.flip_after.load(Ordering::SeqCst);
        if flip_after >= 0 {
            return i64::try_from(seen).unwrap_or(i64::MAX) >= flip_after;
        }
        self.value.load(Ordering::SeqCst)
    }
}

/// Lets a test pause one render between reading its data and returning.
#[derive(Clone, Default)]
pub struct RenderGate {
    started: Arc<Notify>,
    released: Arc<Notify>,
}

impl RenderGate {
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

type Configurations = BTreeMap<String, String>;

/// Renderer backed by a map of `(app, cluster, namespace)` to key/values.
#[derive(Default)]
pub struct MapRenderer {
    configs: Mutex<HashMap<(String, String, String), Configurations>>,
    gray_by_ip: Mutex<HashMap<String, Configurations>>,
    calls: AtomicUsize,
    gate: Mutex<Option<RenderGate>>,
}

fn to_map(entries: &[(&str, &str)]) -> Configurations {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MapRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, app_id: &str, cluster: &str, namespace: &str, entries: &[(&str, &str)]) {
        self.configs.lock().insert(
            (app_id.into(), cluster.into(), namespace.into()),
            to_map(entries),
        );
    }

    /// Content served to a client with this IP regardless of namespace.
    pub fn set_gray(&self, client_ip: &str, entries: &[(&str, &str)]) {
        self.gray_by_ip
            .lock()
            .insert(client_ip.into(), to_map(entries));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hold_next_render(&self) -> RenderGate {
        let gate = RenderGate::default();
        *self.gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ConfigRenderer for MapRenderer {
    async fn render_config(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
        _data_center: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<Option<Configurations>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gray = client_ip.and_then(|ip| self.gray_by_ip.lock().get(ip).cloned());
        let found = gray.or_else(|| {
            self.configs
                .lock()
                .get(&(app_id.to_string(), cluster.to_string(), namespace.to_string()))
                .cloned()
        });
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.released.notified().await;
        }
        Ok(found)
    }
}
