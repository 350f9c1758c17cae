//! Read-side interfaces to the durable tables.
//!
//! Components depend on these traits rather than on a pool, so they can run
//! against the in-memory fakes in tests.

use async_trait::async_trait;
use kanau::processor::Processor;
use thiserror::Error;

use crate::entities::release::{FindActiveReleaseById, FindLatestActiveRelease};
use crate::entities::release_message::{FindLatestReleaseMessages, FindReleaseMessagesAfter};
use crate::entities::{Release, ReleaseMessage};
use crate::framework::DatabaseProcessor;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Reader of the release message log.
#[async_trait]
pub trait ReleaseMessageStore: Send + Sync {
    /// Rows with `id > after_id`, ascending, at most `limit` of them.
    async fn find_new_messages(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<ReleaseMessage>, StoreError>;

    /// Latest row per key, matched case-insensitively. Missing keys are omitted.
    async fn find_latest(&self, keys: &[String]) -> Result<Vec<ReleaseMessage>, StoreError>;
}

#[async_trait]
impl ReleaseMessageStore for DatabaseProcessor {
    async fn find_new_messages(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<ReleaseMessage>, StoreError> {
        Ok(self
            .process(FindReleaseMessagesAfter { after_id, limit })
            .await?)
    }

    async fn find_latest(&self, keys: &[String]) -> Result<Vec<ReleaseMessage>, StoreError> {
        Ok(self
            .process(FindLatestReleaseMessages {
                keys: keys.to_vec(),
            })
            .await?)
    }
}

/// Reader of published releases.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn find_latest_active(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Result<Option<Release>, StoreError>;

    async fn find_active_by_id(&self, id: i64) -> Result<Option<Release>, StoreError>;
}

#[async_trait]
impl ReleaseSource for DatabaseProcessor {
    async fn find_latest_active(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Result<Option<Release>, StoreError> {
        Ok(self
            .process(FindLatestActiveRelease {
                app_id: app_id.to_string(),
                cluster_name: cluster.to_string(),
                namespace_name: namespace.to_string(),
            })
            .await?)
    }

    async fn find_active_by_id(&self, id: i64) -> Result<Option<Release>, StoreError> {
        Ok(self.process(FindActiveReleaseById { id }).await?)
    }
}
