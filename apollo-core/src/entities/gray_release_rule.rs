use std::collections::BTreeSet;

use crate::framework::DatabaseProcessor;
use apollo_sdk::constants::ALL_IP;
use kanau::processor::Processor;
use serde::{Deserialize, Serialize};

/// Branch status of a rule whose gray release is live.
pub const BRANCH_STATUS_ACTIVE: i16 = 1;

/// Gray release rules of one branch of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct GrayReleaseRule {
    pub id: i64,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
    pub branch_name: String,
    /// JSON array of [`GrayReleaseRuleItem`].
    pub rules: String,
    pub release_id: i64,
    pub branch_status: i16,
}

impl GrayReleaseRule {
    pub fn parse_rules(&self) -> Result<Vec<GrayReleaseRuleItem>, serde_json::Error> {
        serde_json::from_str(&self.rules)
    }
}

/// Selects client instances of `client_app_id` by IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrayReleaseRuleItem {
    pub client_app_id: String,
    #[serde(default)]
    pub client_ip_list: BTreeSet<String>,
}

impl GrayReleaseRuleItem {
    pub fn matches(&self, client_app_id: &str, client_ip: Option<&str>) -> bool {
        if !self.client_app_id.eq_ignore_ascii_case(client_app_id) {
            return false;
        }
        self.client_ip_list.contains(ALL_IP)
            || client_ip.is_some_and(|ip| self.client_ip_list.contains(ip))
    }
}

/// All live rules of active branches.
#[derive(Debug, Clone, Copy)]
pub struct FindActiveGrayReleaseRules;

impl Processor<FindActiveGrayReleaseRules> for DatabaseProcessor {
    type Output = Vec<GrayReleaseRule>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindActiveGrayReleaseRules")]
    async fn process(&self, _: FindActiveGrayReleaseRules) -> Result<Vec<GrayReleaseRule>, sqlx::Error> {
        sqlx::query_as::<_, GrayReleaseRule>(
            r#"
            SELECT id, app_id, cluster_name, namespace_name, branch_name,
                   rules, release_id, branch_status
            FROM gray_release_rule
            WHERE branch_status = $1 AND NOT is_deleted
            ORDER BY id ASC
            "#,
        )
        .bind(BRANCH_STATUS_ACTIVE)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(app: &str, ips: &[&str]) -> GrayReleaseRuleItem {
        GrayReleaseRuleItem {
            client_app_id: app.to_string(),
            client_ip_list: ips.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn matches_listed_ip_and_wildcard() {
        assert!(item("A1", &["10.0.0.1"]).matches("a1", Some("10.0.0.1")));
        assert!(!item("A1", &["10.0.0.1"]).matches("A1", Some("10.0.0.2")));
        assert!(!item("A1", &["10.0.0.1"]).matches("A1", None));
        assert!(item("A1", &["*"]).matches("A1", None));
        assert!(!item("A1", &["*"]).matches("A2", Some("10.0.0.1")));
    }

    #[test]
    fn parses_rule_json() {
        let rule = GrayReleaseRule {
            id: 1,
            app_id: "A1".into(),
            cluster_name: "default".into(),
            namespace_name: "app".into(),
            branch_name: "gray-1".into(),
            rules: r#"[{"clientAppId":"A1","clientIpList":["10.0.0.1"]}]"#.into(),
            release_id: 9,
            branch_status: BRANCH_STATUS_ACTIVE,
        };
        let items = rule.parse_rules().unwrap();
        assert_eq!(items, vec![item("A1", &["10.0.0.1"])]);
    }
}
