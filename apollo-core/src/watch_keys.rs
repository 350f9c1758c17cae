//! Derives the watch keys a client identity subscribes to.
//!
//! A client asking for `(app, cluster, namespace, datacenter)` may be served
//! from the cluster itself, from its datacenter, from the default cluster,
//! or from a public namespace owned by another app. It must be woken by a
//! change to any of them, so it watches all of their keys.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use apollo_sdk::constants::{DEFAULT_CLUSTER, DEFAULT_NAMESPACE, NO_APPID_PLACEHOLDER, join_key};

use crate::entities::AppNamespace;

/// Namespace ownership metadata, held in memory.
///
/// Lookups are case-insensitive and return the stored row, whose `name`
/// is the canonical spelling.
pub trait AppNamespaceMetadata: Send + Sync {
    fn find_by_app_and_name(&self, app_id: &str, namespace: &str) -> Option<AppNamespace>;

    fn find_public_by_name(&self, namespace: &str) -> Option<AppNamespace>;

    fn is_public(&self, app_id: &str, namespace: &str) -> bool {
        match self.find_by_app_and_name(app_id, namespace) {
            Some(owned) => owned.is_public,
            None => self.find_public_by_name(namespace).is_some(),
        }
    }

    fn resolve_public_owner(&self, namespace: &str) -> Option<String> {
        self.find_public_by_name(namespace).map(|ns| ns.app_id)
    }
}

/// Single watch key `app+cluster+namespace`.
pub fn watch_key(app_id: &str, cluster: &str, namespace: &str) -> String {
    join_key(&[app_id, cluster, namespace])
}

#[derive(Clone)]
pub struct WatchKeyAssembler {
    metadata: Arc<dyn AppNamespaceMetadata>,
}

impl WatchKeyAssembler {
    pub fn new(metadata: Arc<dyn AppNamespaceMetadata>) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &Arc<dyn AppNamespaceMetadata> {
        &self.metadata
    }

    /// Every key whose change affects what `app_id` reads for `namespace`.
    pub fn assemble(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
        data_center: Option<&str>,
    ) -> BTreeSet<String> {
        let namespaces = [namespace.to_string()];
        self.assemble_batch(app_id, cluster, &namespaces, data_center)
            .remove(namespace)
            .unwrap_or_default()
    }

    /// [`assemble`](Self::assemble) for several namespaces at once, keyed by
    /// the namespace names as given.
    pub fn assemble_batch(
        &self,
        app_id: &str,
        cluster: &str,
        namespaces: &[String],
        data_center: Option<&str>,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut keys: BTreeMap<String, BTreeSet<String>> = namespaces
            .iter()
            .map(|ns| {
                (
                    ns.clone(),
                    own_watch_keys(app_id, cluster, ns, data_center),
                )
            })
            .collect();

        if namespaces.len() == 1 && namespaces[0] == DEFAULT_NAMESPACE {
            return keys;
        }

        for namespace in namespaces {
            if self.metadata.find_by_app_and_name(app_id, namespace).is_some() {
                continue;
            }
            let Some(public) = self.metadata.find_public_by_name(namespace) else {
                continue;
            };
            if public.app_id == app_id {
                continue;
            }
            let inherited = own_watch_keys(&public.app_id, cluster, &public.name, data_center);
            keys.entry(namespace.clone()).or_default().extend(inherited);
        }

        keys
    }
}

/// Keys of the namespace as owned by `app_id` itself, with cluster fallback.
fn own_watch_keys(
    app_id: &str,
    cluster: &str,
    namespace: &str,
    data_center: Option<&str>,
) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    if app_id == NO_APPID_PLACEHOLDER {
        return keys;
    }
    if cluster != DEFAULT_CLUSTER {
        keys.insert(watch_key(app_id, cluster, namespace));
    }
    if let Some(dc) = data_center.filter(|dc| !dc.is_empty() && *dc != cluster) {
        keys.insert(watch_key(app_id, dc, namespace));
    }
    keys.insert(watch_key(app_id, DEFAULT_CLUSTER, namespace));
    keys
}
