//! HTTP client for the config service read path.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use url::Url;

use crate::objects::{ConfigFileFormat, ConfigNotification, NotificationRequest};

/// Long-poll requests are held open by the server for up to 60 seconds.
const LONG_POLL_READ_TIMEOUT: Duration = Duration::from_secs(90);

/// Errors produced by [`ConfigServiceClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server returned an unexpected status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Request or response body could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Identity of the polling/fetching client instance.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub app_id: String,
    pub cluster: String,
    pub data_center: Option<String>,
    pub ip: Option<String>,
}

/// Typed HTTP client for `/notifications/v2` and `/configfiles`.
#[derive(Debug, Clone)]
pub struct ConfigServiceClient {
    http: Client,
    base_url: Url,
}

impl ConfigServiceClient {
    pub fn new(base_url: Url) -> Self {
        let http = Client::builder()
            .timeout(LONG_POLL_READ_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http, base_url }
    }

    /// Replace the default `reqwest::Client`. Its timeout must exceed the
    /// server's long-poll timeout.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `GET /notifications/v2`. Returns `None` when the poll timed out with
    /// nothing new (304).
    pub async fn poll_notifications(
        &self,
        identity: &ClientIdentity,
        notifications: &[NotificationRequest],
    ) -> Result<Option<Vec<ConfigNotification>>, ClientError> {
        let url = self.notifications_url(identity, notifications)?;
        let resp = self.http.get(url).send().await?;
        match resp.status() {
            StatusCode::NOT_MODIFIED => Ok(None),
            status if status.is_success() => {
                let bytes = resp.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ClientError::Api { status, body })
            }
        }
    }

    /// `GET /configfiles[/json]/{appId}/{cluster}/{namespace}`. Returns `None`
    /// when the namespace has no release (404).
    pub async fn fetch_config_file(
        &self,
        format: ConfigFileFormat,
        identity: &ClientIdentity,
        namespace: &str,
    ) -> Result<Option<String>, ClientError> {
        let url = self.config_file_url(format, identity, namespace)?;
        let resp = self.http.get(url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.text().await?)),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ClientError::Api { status, body })
            }
        }
    }

    fn notifications_url(
        &self,
        identity: &ClientIdentity,
        notifications: &[NotificationRequest],
    ) -> Result<Url, ClientError> {
        let encoded = serde_json::to_string(notifications)?;
        let mut query = format!(
            "appId={}&cluster={}&notifications={}",
            urlencoding::encode(&identity.app_id),
            urlencoding::encode(&identity.cluster),
            urlencoding::encode(&encoded),
        );
        push_optional_params(&mut query, identity);
        let mut url = self.base_url.join("/notifications/v2")?;
        url.set_query(Some(&query));
        Ok(url)
    }

    fn config_file_url(
        &self,
        format: ConfigFileFormat,
        identity: &ClientIdentity,
        namespace: &str,
    ) -> Result<Url, ClientError> {
        let prefix = match format {
            ConfigFileFormat::Properties => "/configfiles",
            ConfigFileFormat::Json => "/configfiles/json",
        };
        let path = format!(
            "{prefix}/{}/{}/{}",
            urlencoding::encode(&identity.app_id),
            urlencoding::encode(&identity.cluster),
            urlencoding::encode(namespace),
        );
        let mut url = self.base_url.join(&path)?;
        let mut query = String::new();
        push_optional_params(&mut query, identity);
        let query = query.trim_start_matches('&');
        if !query.is_empty() {
            url.set_query(Some(query));
        }
        Ok(url)
    }
}

fn push_optional_params(query: &mut String, identity: &ClientIdentity) {
    if let Some(dc) = identity.data_center.as_deref() {
        query.push_str("&dataCenter=");
        query.push_str(&urlencoding::encode(dc));
    }
    if let Some(ip) = identity.ip.as_deref() {
        query.push_str("&ip=");
        query.push_str(&urlencoding::encode(ip));
    }
}
