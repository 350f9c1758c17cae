//! Holder of active gray release rules.
//!
//! Two indices are built from each load:
//! - `app+cluster+namespace` to the branch rules, for picking the gray
//!   release a client should be served;
//! - the reversed `clientAppId+namespace+clientIp` set, for the cheap
//!   "is this client gray for that namespace" check done on every
//!   config file fetch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use apollo_sdk::constants::{ALL_IP, join_key};
use arc_swap::ArcSwap;
use kanau::processor::Processor;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::entities::gray_release_rule::{BRANCH_STATUS_ACTIVE, FindActiveGrayReleaseRules};
use crate::entities::{GrayReleaseRule, GrayReleaseRuleItem};
use crate::framework::DatabaseProcessor;
use crate::store::StoreError;

/// Whether a client instance currently falls under any gray rule.
pub trait GrayReleasePredicate: Send + Sync {
    fn has_gray_rule(&self, client_app_id: &str, client_ip: Option<&str>, namespace: &str) -> bool;
}

/// Which gray release, if any, a client instance must be served.
pub trait GrayReleaseLookup: Send + Sync {
    fn find_release_id(
        &self,
        client_app_id: &str,
        client_ip: Option<&str>,
        config_app_id: &str,
        config_cluster: &str,
        config_namespace: &str,
    ) -> Option<i64>;
}

#[derive(Debug, Clone)]
struct BranchRules {
    branch_name: String,
    release_id: i64,
    items: Vec<GrayReleaseRuleItem>,
}

#[derive(Debug, Default)]
struct GrayRuleSnapshot {
    by_namespace: HashMap<String, Vec<BranchRules>>,
    reversed: HashSet<String>,
}

impl GrayRuleSnapshot {
    fn build(rules: &[GrayReleaseRule]) -> Self {
        let mut snapshot = Self::default();
        for rule in rules {
            if rule.branch_status != BRANCH_STATUS_ACTIVE {
                continue;
            }
            let items = match rule.parse_rules() {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        rule_id = rule.id,
                        branch = %rule.branch_name,
                        error = %e,
                        "Skipping gray release rule with malformed rule items"
                    );
                    continue;
                }
            };
            for item in &items {
                for ip in &item.client_ip_list {
                    snapshot
                        .reversed
                        .insert(reversed_key(&item.client_app_id, &rule.namespace_name, ip));
                }
            }
            snapshot
                .by_namespace
                .entry(namespace_key(&rule.app_id, &rule.cluster_name, &rule.namespace_name))
                .or_default()
                .push(BranchRules {
                    branch_name: rule.branch_name.clone(),
                    release_id: rule.release_id,
                    items,
                });
        }
        snapshot
    }
}

fn namespace_key(app_id: &str, cluster: &str, namespace: &str) -> String {
    join_key(&[app_id, cluster, namespace]).to_lowercase()
}

fn reversed_key(client_app_id: &str, namespace: &str, client_ip: &str) -> String {
    join_key(&[client_app_id, namespace, client_ip]).to_lowercase()
}

pub struct GrayReleaseRulesHolder {
    snapshot: ArcSwap<GrayRuleSnapshot>,
}

impl Default for GrayReleaseRulesHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl GrayReleaseRulesHolder {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(GrayRuleSnapshot::default()),
        }
    }

    /// Swap in the given rules.
    pub fn replace_rules(&self, rules: &[GrayReleaseRule]) {
        self.snapshot.store(Arc::new(GrayRuleSnapshot::build(rules)));
    }

    pub async fn reload(&self, db: &DatabaseProcessor) -> Result<usize, StoreError> {
        let rules = db.process(FindActiveGrayReleaseRules).await?;
        self.replace_rules(&rules);
        Ok(rules.len())
    }

    pub async fn run(
        self: Arc<Self>,
        db: DatabaseProcessor,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("GrayReleaseRulesHolder started");
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("GrayReleaseRulesHolder received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(interval) => {
                    match self.reload(&db).await {
                        Ok(count) => debug!(count, "Reloaded gray release rules"),
                        Err(e) => warn!(error = %e, "Failed to reload gray release rules"),
                    }
                }
            }
        }
    }
}

impl GrayReleasePredicate for GrayReleaseRulesHolder {
    fn has_gray_rule(&self, client_app_id: &str, client_ip: Option<&str>, namespace: &str) -> bool {
        let snapshot = self.snapshot.load();
        let ip_matches = client_ip.is_some_and(|ip| {
            snapshot
                .reversed
                .contains(&reversed_key(client_app_id, namespace, ip))
        });
        if ip_matches {
            return true;
        }
        snapshot
            .reversed
            .contains(&reversed_key(client_app_id, namespace, ALL_IP))
    }
}

impl GrayReleaseLookup for GrayReleaseRulesHolder {
    fn find_release_id(
        &self,
        client_app_id: &str,
        client_ip: Option<&str>,
        config_app_id: &str,
        config_cluster: &str,
        config_namespace: &str,
    ) -> Option<i64> {
        let snapshot = self.snapshot.load();
        let branches = snapshot.by_namespace.get(&namespace_key(
            config_app_id,
            config_cluster,
            config_namespace,
        ))?;
        branches
            .iter()
            .find(|branch| {
                branch
                    .items
                    .iter()
                    .any(|item| item.matches(client_app_id, client_ip))
            })
            .map(|branch| {
                debug!(branch = %branch.branch_name, release_id = branch.release_id, "Matched gray release branch");
                branch.release_id
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, rules: &str, status: i16) -> GrayReleaseRule {
        GrayReleaseRule {
            id,
            app_id: "A1".into(),
            cluster_name: "default".into(),
            namespace_name: "app".into(),
            branch_name: format!("branch-{id}"),
            rules: rules.into(),
            release_id: 100 + id,
            branch_status: status,
        }
    }

    #[test]
    fn predicate_matches_ip_or_wildcard() {
        let holder = GrayReleaseRulesHolder::new();
        holder.replace_rules(&[
            rule(1, r#"[{"clientAppId":"A1","clientIpList":["10.0.0.1"]}]"#, 1),
            rule(2, r#"[{"clientAppId":"B2","clientIpList":["*"]}]"#, 1),
        ]);
        assert!(holder.has_gray_rule("A1", Some("10.0.0.1"), "app"));
        assert!(holder.has_gray_rule("a1", Some("10.0.0.1"), "APP"));
        assert!(!holder.has_gray_rule("A1", Some("10.0.0.2"), "app"));
        assert!(!holder.has_gray_rule("A1", None, "app"));
        assert!(holder.has_gray_rule("B2", None, "app"));
    }

    #[test]
    fn inactive_and_malformed_rules_are_ignored() {
        let holder = GrayReleaseRulesHolder::new();
        holder.replace_rules(&[
            rule(1, r#"[{"clientAppId":"A1","clientIpList":["*"]}]"#, 0),
            rule(2, "not json", 1),
        ]);
        assert!(!holder.has_gray_rule("A1", Some("10.0.0.1"), "app"));
        assert_eq!(holder.find_release_id("A1", Some("10.0.0.1"), "A1", "default", "app"), None);
    }

    #[test]
    fn lookup_returns_matching_branch_release() {
        let holder = GrayReleaseRulesHolder::new();
        holder.replace_rules(&[rule(
            3,
            r#"[{"clientAppId":"A1","clientIpList":["10.0.0.1"]}]"#,
            1,
        )]);
        assert_eq!(
            holder.find_release_id("A1", Some("10.0.0.1"), "A1", "default", "app"),
            Some(103)
        );
        assert_eq!(holder.find_release_id("A1", Some("10.0.0.9"), "A1", "default", "app"), None);
        assert_eq!(holder.find_release_id("A1", Some("10.0.0.1"), "A1", "blue", "app"), None);
    }

    #[test]
    fn replace_rules_drops_removed_rules() {
        let holder = GrayReleaseRulesHolder::new();
        holder.replace_rules(&[rule(1, r#"[{"clientAppId":"A1","clientIpList":["*"]}]"#, 1)]);
        assert!(holder.has_gray_rule("A1", None, "app"));
        holder.replace_rules(&[]);
        assert!(!holder.has_gray_rule("A1", None, "app"));
    }
}
