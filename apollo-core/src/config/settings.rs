use std::time::Duration;

/// Long-poll tunables. Reloadable at runtime through a `ConfigStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongPollSettings {
    /// How long a poll is held before answering "nothing new".
    pub timeout: Duration,
    /// Above this many waiting polls on one key, wake-ups are spread out.
    pub notification_batch_size: usize,
    /// Delay between two wake-up batches.
    pub notification_batch_interval: Duration,
}

impl Default for LongPollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            notification_batch_size: 100,
            notification_batch_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileCacheSettings {
    /// Upper bound on the summed byte length of cached files.
    pub max_weight_bytes: u64,
    pub expire_after_write: Duration,
}

impl Default for ConfigFileCacheSettings {
    fn default() -> Self {
        Self {
            max_weight_bytes: 50 * 1024 * 1024,
            expire_after_write: Duration::from_secs(30 * 60),
        }
    }
}

/// Intervals of the background refresh loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub release_message_scan_interval: Duration,
    pub release_message_cache_scan_interval: Duration,
    pub app_namespace_scan_interval: Duration,
    pub app_namespace_rebuild_interval: Duration,
    pub gray_rule_scan_interval: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            release_message_scan_interval: Duration::from_secs(1),
            release_message_cache_scan_interval: Duration::from_secs(1),
            app_namespace_scan_interval: Duration::from_secs(1),
            app_namespace_rebuild_interval: Duration::from_secs(60),
            gray_rule_scan_interval: Duration::from_secs(1),
        }
    }
}
