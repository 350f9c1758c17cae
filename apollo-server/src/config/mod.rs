//! Configuration module for apollo-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments,
//! and environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::FileConfig;
use crate::config::runtime::RuntimeConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides, and validate.
    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        parse_config(&config_content, self.listen_override)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<RuntimeConfig, ConfigError> {
        self.load()
    }
}

fn parse_config(
    content: &str,
    listen_override: Option<SocketAddr>,
) -> Result<RuntimeConfig, ConfigError> {
    let mut file_config: FileConfig = toml::from_str(content)?;
    if let Some(listen) = listen_override {
        file_config.server.listen = listen;
    }
    validate(&file_config)?;
    Ok(file_config.into())
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let positive = [
        ("long_polling.timeout_ms", config.long_polling.timeout_ms),
        (
            "notification.batch_size",
            config.notification.batch_size as u64,
        ),
        (
            "notification.batch_interval_ms",
            config.notification.batch_interval_ms,
        ),
        (
            "release_message.scan_interval_ms",
            config.release_message.scan_interval_ms,
        ),
        (
            "release_message.cache_scan_interval_ms",
            config.release_message.cache_scan_interval_ms,
        ),
        (
            "config_file_cache.max_weight_bytes",
            config.config_file_cache.max_weight_bytes,
        ),
        (
            "config_file_cache.expire_after_write_secs",
            config.config_file_cache.expire_after_write_secs,
        ),
        (
            "app_namespace.scan_interval_ms",
            config.app_namespace.scan_interval_ms,
        ),
        (
            "app_namespace.rebuild_interval_ms",
            config.app_namespace.rebuild_interval_ms,
        ),
        (
            "gray_release.scan_interval_ms",
            config.gray_release.scan_interval_ms,
        ),
    ];
    for (name, value) in positive {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be greater than zero"
            )));
        }
    }
    Ok(())
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn listen_override_wins() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = parse_config("[server]\nlisten = \"0.0.0.0:1\"\n", Some(addr)).unwrap();
        assert_eq!(config.server.listen, addr);
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = parse_config("[notification]\nbatch_size = 0\n", None).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("batch_size")));

        let err = parse_config("[gray_release]\nscan_interval_ms = 0\n", None).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn units_are_converted() {
        let config = parse_config(
            "[long_polling]\ntimeout_ms = 1500\n[config_file_cache]\nexpire_after_write_secs = 2\n",
            None,
        )
        .unwrap();
        assert_eq!(config.long_poll.timeout, Duration::from_millis(1500));
        assert_eq!(
            config.config_file_cache.expire_after_write,
            Duration::from_secs(2)
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let loader = ConfigLoader::new("/nonexistent/apollo-config.toml", None);
        assert!(matches!(loader.load(), Err(ConfigError::IoError(_))));
    }
}
