//! TOML file configuration structures.
//!
//! These structs directly map to the `apollo-config.toml` file format.
//! Every section and field may be omitted.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub long_polling: LongPollingConfig,
    pub notification: NotificationConfig,
    pub release_message: ReleaseMessageConfig,
    pub config_file_cache: ConfigFileCacheConfig,
    pub app_namespace: AppNamespaceConfig,
    pub gray_release: GrayReleaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollingConfig {
    /// How long a `/notifications/v2` request is held before a 304.
    pub timeout_ms: u64,
}

impl Default for LongPollingConfig {
    fn default() -> Self {
        Self { timeout_ms: 60_000 }
    }
}

/// Pacing of wake-ups when many clients wait on one watch key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub batch_size: usize,
    pub batch_interval_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseMessageConfig {
    /// Interval of the scanner that pushes new rows to listeners.
    pub scan_interval_ms: u64,
    /// Interval of the cache's own catch-up scan.
    pub cache_scan_interval_ms: u64,
}

impl Default for ReleaseMessageConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 1_000,
            cache_scan_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFileCacheConfig {
    pub max_weight_bytes: u64,
    pub expire_after_write_secs: u64,
}

impl Default for ConfigFileCacheConfig {
    fn default() -> Self {
        Self {
            max_weight_bytes: 50 * 1024 * 1024,
            expire_after_write_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppNamespaceConfig {
    pub scan_interval_ms: u64,
    pub rebuild_interval_ms: u64,
}

impl Default for AppNamespaceConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 1_000,
            rebuild_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayReleaseConfig {
    pub scan_interval_ms: u64,
}

impl Default for GrayReleaseConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 1_000,
        }
    }
}
