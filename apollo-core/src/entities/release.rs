use std::collections::BTreeMap;

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// An immutable, published snapshot of one namespace in one cluster.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Release {
    pub id: i64,
    pub release_key: String,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
    /// JSON object of string keys to string values.
    pub configurations: String,
    pub is_abandoned: bool,
}

impl Release {
    /// Parse `configurations` into a sorted key/value map.
    pub fn parse_configurations(&self) -> Result<BTreeMap<String, String>, serde_json::Error> {
        serde_json::from_str(&self.configurations)
    }
}

/// Newest non-abandoned release of a namespace in a cluster.
#[derive(Debug, Clone)]
pub struct FindLatestActiveRelease {
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
}

impl Processor<FindLatestActiveRelease> for DatabaseProcessor {
    type Output = Option<Release>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindLatestActiveRelease")]
    async fn process(&self, query: FindLatestActiveRelease) -> Result<Option<Release>, sqlx::Error> {
        sqlx::query_as::<_, Release>(
            r#"
            SELECT id, release_key, app_id, cluster_name, namespace_name,
                   configurations, is_abandoned
            FROM release
            WHERE app_id = $1
              AND cluster_name = $2
              AND namespace_name = $3
              AND NOT is_abandoned
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(query.app_id)
        .bind(query.cluster_name)
        .bind(query.namespace_name)
        .fetch_optional(&self.pool)
        .await
    }
}

/// A specific release, provided it has not been abandoned.
#[derive(Debug, Clone, Copy)]
pub struct FindActiveReleaseById {
    pub id: i64,
}

impl Processor<FindActiveReleaseById> for DatabaseProcessor {
    type Output = Option<Release>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindActiveReleaseById")]
    async fn process(&self, query: FindActiveReleaseById) -> Result<Option<Release>, sqlx::Error> {
        sqlx::query_as::<_, Release>(
            r#"
            SELECT id, release_key, app_id, cluster_name, namespace_name,
                   configurations, is_abandoned
            FROM release
            WHERE id = $1 AND NOT is_abandoned
            "#,
        )
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await
    }
}
