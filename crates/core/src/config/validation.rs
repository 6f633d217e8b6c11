//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `client_id_prefix` is empty or does not end with `:`
    /// - `db_path` is empty while the disk cache is enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "client_id_prefix".into(),
                reason: "must not be empty".into(),
            });
        }
        if !self.client_id_prefix.ends_with(':') {
            return Err(ConfigError::Invalid {
                field: "client_id_prefix".into(),
                reason: "must end with ':'".into(),
            });
        }

        if self.disk_cache_enabled && self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "db_path".into(),
                reason: "must be set when the disk cache is enabled".into(),
            });
        }

        if self.gc_enabled && self.disk_cache_enabled {
            tracing::warn!("garbage collection only tracks records written after startup; records read from disk are never collected");
        }

        Ok(())
    }
}
