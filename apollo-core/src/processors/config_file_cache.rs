//! Read-through cache of rendered config files.
//!
//! Forward map: cache key to rendered text, held in a `moka` cache bounded
//! by total byte weight and expiring after write. Reverse index: watch key
//! to the cache keys built from it, so one release message evicts exactly
//! the files it affects.
//!
//! The two maps are updated under different locks. They are kept in step
//! by these rules:
//! - the reverse entry is written before the forward entry is inserted;
//! - each fill carries a token stored on both sides, and a forward removal
//!   drops the reverse entry only while it still holds that token
//!   (eviction listener);
//! - a forward hit without a reverse entry is treated as a miss;
//! - a fill that overlapped any invalidation is returned but not kept.
//!
//! Clients with a matching gray rule never touch the cache: their content
//! differs from what everybody else under the same key must see.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use apollo_sdk::constants::join_key;
use apollo_sdk::objects::ConfigFileFormat;
use async_trait::async_trait;
use moka::sync::Cache;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ConfigFileCacheSettings;
use crate::entities::ReleaseMessage;
use crate::processors::gray_release_rules::GrayReleasePredicate;
use crate::processors::release_message_scanner::{ListenerError, ReleaseMessageListener};
use crate::render::{ConfigRenderer, RenderError, render_file};
use crate::utils::namespace::canonical_namespace;
use crate::watch_keys::WatchKeyAssembler;

/// Identity and format of a config file request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileRequest {
    pub format: ConfigFileFormat,
    pub app_id: String,
    pub cluster: String,
    pub namespace: String,
    pub data_center: Option<String>,
    pub client_ip: Option<String>,
}

impl ConfigFileRequest {
    fn cache_key(&self, namespace: &str) -> String {
        let mut parts: Vec<&str> = vec![
            self.format.as_str(),
            self.app_id.as_str(),
            self.cluster.as_str(),
            namespace,
        ];
        if let Some(dc) = self.data_center.as_deref().filter(|dc| !dc.is_empty()) {
            parts.push(dc);
        }
        join_key(&parts)
    }
}

/// A rendered file as stored in the forward map.
#[derive(Debug)]
struct CachedFile {
    token: u64,
    text: Arc<str>,
}

/// Watch keys of one cached file, tagged with the fill that wrote them.
#[derive(Debug)]
struct Registration {
    token: u64,
    watch_keys: HashSet<String>,
}

/// Watch key (lowercased) <-> cache key.
#[derive(Debug, Default)]
struct ReverseIndex {
    cache_keys_by_watch_key: HashMap<String, HashSet<String>>,
    watch_keys_by_cache_key: HashMap<String, Registration>,
}

impl ReverseIndex {
    /// Replaces any earlier registration of `cache_key`.
    fn register(&mut self, cache_key: &str, token: u64, watch_keys: &BTreeSet<String>) {
        self.remove_cache_key(cache_key);
        let lowered: HashSet<String> = watch_keys.iter().map(|k| k.to_lowercase()).collect();
        for watch_key in &lowered {
            self.cache_keys_by_watch_key
                .entry(watch_key.clone())
                .or_default()
                .insert(cache_key.to_string());
        }
        self.watch_keys_by_cache_key.insert(
            cache_key.to_string(),
            Registration {
                token,
                watch_keys: lowered,
            },
        );
    }

    fn tracks(&self, cache_key: &str) -> bool {
        self.watch_keys_by_cache_key.contains_key(cache_key)
    }

    /// Drop `cache_key` only if it is still registered by fill `token`.
    fn remove_fill(&mut self, cache_key: &str, token: u64) {
        let registered = self
            .watch_keys_by_cache_key
            .get(cache_key)
            .is_some_and(|registration| registration.token == token);
        if registered {
            self.remove_cache_key(cache_key);
        }
    }

    fn remove_cache_key(&mut self, cache_key: &str) {
        let Some(registration) = self.watch_keys_by_cache_key.remove(cache_key) else {
            return;
        };
        for watch_key in registration.watch_keys {
            if let Some(cache_keys) = self.cache_keys_by_watch_key.get_mut(&watch_key) {
                cache_keys.remove(cache_key);
                if cache_keys.is_empty() {
                    self.cache_keys_by_watch_key.remove(&watch_key);
                }
            }
        }
    }

    /// Drop `watch_key` and every cache key registered under it.
    fn take_watch_key(&mut self, watch_key: &str) -> Vec<String> {
        let Some(cache_keys) = self.cache_keys_by_watch_key.remove(watch_key) else {
            return Vec::new();
        };
        let cache_keys: Vec<String> = cache_keys.into_iter().collect();
        for cache_key in &cache_keys {
            self.remove_cache_key(cache_key);
        }
        cache_keys
    }
}

pub struct ConfigFileCache {
    assembler: WatchKeyAssembler,
    renderer: Arc<dyn ConfigRenderer>,
    gray: Arc<dyn GrayReleasePredicate>,
    entries: Cache<String, Arc<CachedFile>>,
    index: Arc<RwLock<ReverseIndex>>,
    /// Bumped before every invalidation.
    generation: AtomicU64,
    next_token: AtomicU64,
}

impl ConfigFileCache {
    pub fn new(
        assembler: WatchKeyAssembler,
        renderer: Arc<dyn ConfigRenderer>,
        gray: Arc<dyn GrayReleasePredicate>,
        settings: &ConfigFileCacheSettings,
    ) -> Self {
        let index = Arc::new(RwLock::new(ReverseIndex::default()));
        let listener_index = index.clone();
        let entries = Cache::builder()
            .max_capacity(settings.max_weight_bytes)
            .weigher(|_key: &String, value: &Arc<CachedFile>| -> u32 {
                u32::try_from(value.text.len()).unwrap_or(u32::MAX)
            })
            .time_to_live(settings.expire_after_write)
            // Expired entries overwritten by a refill are reported late, and
            // not as `Replaced`; the token keeps them off the new registration.
            .eviction_listener(move |key: Arc<String>, value: Arc<CachedFile>, _cause| {
                listener_index.write().remove_fill(&key, value.token);
            })
            .build();
        Self {
            assembler,
            renderer,
            gray,
            entries,
            index,
            generation: AtomicU64::new(0),
            next_token: AtomicU64::new(0),
        }
    }

    /// Rendered file, or `None` when there is no release to serve.
    pub async fn get(&self, request: &ConfigFileRequest) -> Result<Option<Arc<str>>, RenderError> {
        let namespace = canonical_namespace(
            self.assembler.metadata().as_ref(),
            &request.app_id,
            &request.namespace,
        );
        let client_ip = request.client_ip.as_deref();

        if self.gray.has_gray_rule(&request.app_id, client_ip, &namespace) {
            debug!(app_id = %request.app_id, namespace = %namespace, client_ip = ?client_ip, "Gray client, bypassing config file cache");
            return self.render(request, &namespace).await;
        }

        let cache_key = request.cache_key(&namespace);
        if let Some(cached) = self.entries.get(&cache_key) {
            if self.index.read().tracks(&cache_key) {
                return Ok(Some(cached.text.clone()));
            }
            debug!(cache_key = %cache_key, "Cached config file lost its watch keys, reloading");
            self.entries.invalidate(&cache_key);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let Some(text) = self.render(request, &namespace).await? else {
            return Ok(None);
        };

        // A gray rule may have appeared while rendering.
        if self.gray.has_gray_rule(&request.app_id, client_ip, &namespace) {
            debug!(cache_key = %cache_key, "Gray rule appeared during load, not caching");
            return Ok(Some(text));
        }

        let watch_keys = self.assembler.assemble(
            &request.app_id,
            &request.cluster,
            &namespace,
            request.data_center.as_deref(),
        );
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut index = self.index.write();
            if self.generation.load(Ordering::Acquire) != generation {
                debug!(cache_key = %cache_key, "Release arrived during load, not caching");
                return Ok(Some(text));
            }
            index.register(&cache_key, token, &watch_keys);
        }
        self.entries.insert(
            cache_key.clone(),
            Arc::new(CachedFile {
                token,
                text: text.clone(),
            }),
        );
        if self.generation.load(Ordering::Acquire) != generation {
            self.entries.invalidate(&cache_key);
        }
        debug!(cache_key = %cache_key, watch_keys = ?watch_keys, "Cached config file");
        Ok(Some(text))
    }

    /// Evict every file built from `watch_key`.
    pub fn invalidate_watch_key(&self, watch_key: &str) -> usize {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let cache_keys = self.index.write().take_watch_key(&watch_key.to_lowercase());
        for cache_key in &cache_keys {
            self.entries.invalidate(cache_key);
        }
        if !cache_keys.is_empty() {
            debug!(watch_key, count = cache_keys.len(), "Invalidated cached config files");
        }
        cache_keys.len()
    }

    async fn render(
        &self,
        request: &ConfigFileRequest,
        namespace: &str,
    ) -> Result<Option<Arc<str>>, RenderError> {
        let configurations = self
            .renderer
            .render_config(
                &request.app_id,
                &request.cluster,
                namespace,
                request.data_center.as_deref(),
                request.client_ip.as_deref(),
            )
            .await?;
        match configurations {
            Some(configurations) => Ok(Some(Arc::from(render_file(request.format, &configurations)?))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ReleaseMessageListener for ConfigFileCache {
    async fn handle_message(&self, message: &ReleaseMessage) -> Result<(), ListenerError> {
        self.invalidate_watch_key(&message.message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::entities::AppNamespace;
    use crate::testutils::{MapRenderer, ToggleGray, static_metadata};

    struct Fixture {
        renderer: Arc<MapRenderer>,
        gray: Arc<ToggleGray>,
        cache: ConfigFileCache,
    }

    fn fixture() -> Fixture {
        let renderer = Arc::new(MapRenderer::new());
        let gray = Arc::new(ToggleGray::new());
        let metadata = static_metadata(vec![
            AppNamespace::new(1, "A1", "app", false),
            AppNamespace::new(2, "shared", "common", true),
        ]);
        let cache = ConfigFileCache::new(
            WatchKeyAssembler::new(metadata),
            renderer.clone(),
            gray.clone(),
            &ConfigFileCacheSettings::default(),
        );
        Fixture { renderer, gray, cache }
    }

    fn request(format: ConfigFileFormat, namespace: &str, ip: Option<&str>) -> ConfigFileRequest {
        ConfigFileRequest {
            format,
            app_id: "A1".into(),
            cluster: "default".into(),
            namespace: namespace.into(),
            data_center: None,
            client_ip: ip.map(str::to_string),
        }
    }

    fn props(ns: &str) -> ConfigFileRequest {
        request(ConfigFileFormat::Properties, ns, None)
    }

    #[tokio::test]
    async fn miss_renders_then_hit_is_served_from_cache() {
        let fx = fixture();
        fx.renderer.set("A1", "default", "app", &[("timeout", "5000")]);

        let first = fx.cache.get(&props("app")).await.unwrap().unwrap();
        let second = fx.cache.get(&props("app.properties")).await.unwrap().unwrap();
        assert_eq!(&*first, "timeout=5000\n");
        assert_eq!(first, second);
        assert_eq!(fx.renderer.calls(), 1);
    }

    #[tokio::test]
    async fn not_found_is_not_cached() {
        let fx = fixture();
        assert!(fx.cache.get(&props("app")).await.unwrap().is_none());
        assert!(fx.cache.get(&props("app")).await.unwrap().is_none());
        assert_eq!(fx.renderer.calls(), 2);
    }

    #[tokio::test]
    async fn formats_have_independent_entries() {
        let fx = fixture();
        fx.renderer.set("A1", "default", "app", &[("k", "v")]);
        let text = fx.cache.get(&props("app")).await.unwrap().unwrap();
        let json = fx
            .cache
            .get(&request(ConfigFileFormat::Json, "app", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&*text, "k=v\n");
        assert_eq!(&*json, r#"{"k":"v"}"#);
        assert_eq!(fx.renderer.calls(), 2);

        assert_eq!(fx.cache.invalidate_watch_key("A1+default+app"), 2);
    }

    #[tokio::test]
    async fn release_message_evicts_affected_entries_only() {
        let fx = fixture();
        fx.renderer.set("A1", "default", "app", &[("v", "1")]);
        fx.renderer.set("A1", "default", "other", &[("o", "1")]);
        fx.cache.get(&props("app")).await.unwrap();
        fx.cache.get(&props("other")).await.unwrap();

        fx.renderer.set("A1", "default", "app", &[("v", "2")]);
        fx.cache
            .handle_message(&ReleaseMessage::new(10, "a1+DEFAULT+app"))
            .await
            .unwrap();

        let app = fx.cache.get(&props("app")).await.unwrap().unwrap();
        assert_eq!(&*app, "v=2\n");
        fx.cache.get(&props("other")).await.unwrap();
        assert_eq!(fx.renderer.calls(), 3);

        let index = fx.cache.index.read();
        assert!(index.tracks(&props("app").cache_key("app")));
        assert_eq!(index.cache_keys_by_watch_key.len(), 2);
    }

    #[tokio::test]
    async fn public_namespace_release_evicts_inheriting_entry() {
        let fx = fixture();
        fx.renderer.set("A1", "default", "common", &[("v", "1")]);
        fx.cache.get(&props("common")).await.unwrap();
        assert_eq!(fx.cache.invalidate_watch_key("shared+default+common"), 1);
        let index = fx.cache.index.read();
        assert!(index.cache_keys_by_watch_key.is_empty());
        assert!(index.watch_keys_by_cache_key.is_empty());
    }

    #[tokio::test]
    async fn gray_client_never_reads_or_writes_shared_entry() {
        let fx = fixture();
        fx.renderer.set("A1", "default", "app", &[("v", "main")]);
        fx.renderer.set_gray("10.0.0.1", &[("v", "gray")]);

        let main = fx.cache.get(&props("app")).await.unwrap().unwrap();
        assert_eq!(&*main, "v=main\n");

        fx.gray.set(true);
        let gray_req = request(ConfigFileFormat::Properties, "app", Some("10.0.0.1"));
        let gray = fx.cache.get(&gray_req).await.unwrap().unwrap();
        assert_eq!(&*gray, "v=gray\n");

        fx.cache.invalidate_watch_key("A1+default+app");
        let gray = fx.cache.get(&gray_req).await.unwrap().unwrap();
        assert_eq!(&*gray, "v=gray\n");
        assert!(!fx.cache.index.read().tracks(&gray_req.cache_key("app")));

        fx.gray.set(false);
        let main = fx.cache.get(&props("app")).await.unwrap().unwrap();
        assert_eq!(&*main, "v=main\n");
    }

    #[tokio::test]
    async fn gray_rule_appearing_during_load_prevents_caching() {
        let fx = fixture();
        fx.renderer.set("A1", "default", "app", &[("v", "1")]);
        fx.gray.flip_after_checks(1);

        fx.cache.get(&props("app")).await.unwrap().unwrap();
        assert!(!fx.cache.index.read().tracks(&props("app").cache_key("app")));
        assert!(fx.cache.entries.get(&props("app").cache_key("app")).is_none());
    }

    #[tokio::test]
    async fn invalidation_during_load_prevents_caching() {
        let fx = Arc::new(fixture());
        fx.renderer.set("A1", "default", "app", &[("v", "stale")]);
        let gate = fx.renderer.hold_next_render();

        let loader = {
            let fx = fx.clone();
            tokio::spawn(async move { fx.cache.get(&props("app")).await })
        };
        gate.wait_started().await;
        fx.renderer.set("A1", "default", "app", &[("v", "fresh")]);
        fx.cache.invalidate_watch_key("A1+default+app");
        gate.release();

        let stale = loader.await.unwrap().unwrap().unwrap();
        assert_eq!(&*stale, "v=stale\n");
        let fresh = fx.cache.get(&props("app")).await.unwrap().unwrap();
        assert_eq!(&*fresh, "v=fresh\n");
    }

    #[tokio::test]
    async fn hit_without_reverse_entry_is_treated_as_miss() {
        let fx = fixture();
        fx.renderer.set("A1", "default", "app", &[("v", "1")]);
        fx.cache.get(&props("app")).await.unwrap();
        let key = props("app").cache_key("app");
        fx.cache.index.write().remove_cache_key(&key);

        fx.cache.get(&props("app")).await.unwrap();
        assert_eq!(fx.renderer.calls(), 2);
        assert!(fx.cache.index.read().tracks(&key));
    }

    fn bounded_cache(renderer: Arc<MapRenderer>, settings: ConfigFileCacheSettings) -> ConfigFileCache {
        ConfigFileCache::new(
            WatchKeyAssembler::new(static_metadata(Vec::new())),
            renderer,
            Arc::new(ToggleGray::new()),
            &settings,
        )
    }

    fn assert_indices_agree(cache: &ConfigFileCache, key: &str) {
        assert_eq!(
            cache.entries.contains_key(key),
            cache.index.read().tracks(key),
            "forward and reverse entries disagree for {key}"
        );
    }

    #[tokio::test]
    async fn expiry_clears_reverse_index() {
        let renderer = Arc::new(MapRenderer::new());
        renderer.set("A1", "default", "app", &[("v", "1")]);
        let cache = bounded_cache(
            renderer,
            ConfigFileCacheSettings {
                max_weight_bytes: 1024,
                expire_after_write: Duration::from_millis(20),
            },
        );
        cache.get(&props("app")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.entries.run_pending_tasks();

        let key = props("app").cache_key("app");
        assert!(cache.entries.get(&key).is_none());
        assert!(!cache.index.read().tracks(&key));
    }

    #[tokio::test]
    async fn refill_over_expired_entry_keeps_reverse_entry() {
        let renderer = Arc::new(MapRenderer::new());
        renderer.set("A1", "default", "app", &[("v", "1")]);
        let cache = bounded_cache(
            renderer.clone(),
            ConfigFileCacheSettings {
                max_weight_bytes: 1024,
                expire_after_write: Duration::from_millis(100),
            },
        );
        cache.get(&props("app")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // No housekeeping in between: the expired value is still stored
        // when the refill overwrites it.
        cache.get(&props("app")).await.unwrap();
        cache.entries.run_pending_tasks();

        let key = props("app").cache_key("app");
        assert!(cache.entries.contains_key(&key));
        assert_indices_agree(&cache, &key);

        cache.get(&props("app")).await.unwrap();
        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn size_eviction_keeps_indices_in_step() {
        let renderer = Arc::new(MapRenderer::new());
        let value = "x".repeat(96);
        let namespaces: Vec<String> = (0..50).map(|i| format!("ns{i}")).collect();
        for namespace in &namespaces {
            renderer.set("A1", "default", namespace, &[("v", value.as_str())]);
        }
        let cache = bounded_cache(
            renderer,
            ConfigFileCacheSettings {
                max_weight_bytes: 500,
                expire_after_write: Duration::from_secs(60),
            },
        );

        for namespace in &namespaces {
            cache.get(&props(namespace)).await.unwrap().unwrap();
        }
        cache.entries.run_pending_tasks();

        let mut kept = 0;
        for namespace in &namespaces {
            let key = props(namespace).cache_key(namespace);
            assert_indices_agree(&cache, &key);
            if cache.entries.contains_key(&key) {
                kept += 1;
            }
        }
        assert!(kept <= 5, "{kept} entries exceed the byte budget");
        assert_eq!(cache.index.read().watch_keys_by_cache_key.len(), kept);
    }

    #[test]
    fn stale_fill_token_does_not_drop_newer_registration() {
        let mut index = ReverseIndex::default();
        let watch_keys: BTreeSet<String> = ["A1+default+app".to_string()].into();
        index.register("properties+A1+default+app", 1, &watch_keys);
        index.register("properties+A1+default+app", 2, &watch_keys);

        index.remove_fill("properties+A1+default+app", 1);
        assert!(index.tracks("properties+A1+default+app"));

        index.remove_fill("properties+A1+default+app", 2);
        assert!(!index.tracks("properties+A1+default+app"));
        assert!(index.cache_keys_by_watch_key.is_empty());
    }

    #[test]
    fn cache_key_includes_format_and_datacenter() {
        let mut req = request(ConfigFileFormat::Json, "app", None);
        assert_eq!(req.cache_key("app"), "json+A1+default+app");
        req.data_center = Some("dc1".into());
        assert_eq!(req.cache_key("app"), "json+A1+default+app+dc1");
    }
}
