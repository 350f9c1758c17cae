//! Turning releases into the key/value view a client is served.

mod format;
mod release;

pub use format::{render_file, to_json, to_properties};
pub use release::ReleaseConfigRenderer;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("release {release_id} has malformed configurations: {source}")]
    MalformedConfigurations {
        release_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode config file: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Computes the effective configuration of a namespace for one client.
#[async_trait]
pub trait ConfigRenderer: Send + Sync {
    /// `Ok(None)` when there is no release to serve.
    async fn render_config(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
        data_center: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<Option<BTreeMap<String, String>>, RenderError>;
}
