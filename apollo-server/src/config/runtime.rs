//! Settings in the shape the running components consume.

use apollo_core::config::{ConfigFileCacheSettings, LongPollSettings, ScanSettings};
use std::net::SocketAddr;
use std::time::Duration;

use super::file::FileConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Configuration after validation and unit conversion.
///
/// Only `long_poll` is applied again on SIGHUP; the rest is read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub long_poll: LongPollSettings,
    pub config_file_cache: ConfigFileCacheSettings,
    pub scan: ScanSettings,
}

impl From<FileConfig> for RuntimeConfig {
    fn from(file: FileConfig) -> Self {
        Self {
            server: ServerConfig {
                listen: file.server.listen,
            },
            long_poll: LongPollSettings {
                timeout: Duration::from_millis(file.long_polling.timeout_ms),
                notification_batch_size: file.notification.batch_size,
                notification_batch_interval: Duration::from_millis(
                    file.notification.batch_interval_ms,
                ),
            },
            config_file_cache: ConfigFileCacheSettings {
                max_weight_bytes: file.config_file_cache.max_weight_bytes,
                expire_after_write: Duration::from_secs(
                    file.config_file_cache.expire_after_write_secs,
                ),
            },
            scan: ScanSettings {
                release_message_scan_interval: Duration::from_millis(
                    file.release_message.scan_interval_ms,
                ),
                release_message_cache_scan_interval: Duration::from_millis(
                    file.release_message.cache_scan_interval_ms,
                ),
                app_namespace_scan_interval: Duration::from_millis(
                    file.app_namespace.scan_interval_ms,
                ),
                app_namespace_rebuild_interval: Duration::from_millis(
                    file.app_namespace.rebuild_interval_ms,
                ),
                gray_rule_scan_interval: Duration::from_millis(file.gray_release.scan_interval_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_defaults_match_component_defaults() {
        let runtime = RuntimeConfig::from(FileConfig::default());
        assert_eq!(runtime.long_poll, LongPollSettings::default());
        assert_eq!(runtime.config_file_cache, ConfigFileCacheSettings::default());
        assert_eq!(runtime.scan, ScanSettings::default());
    }
}
