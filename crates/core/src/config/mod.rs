//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (GRAPHCACHE_*)
//! 2. TOML config file (if GRAPHCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::record::CLIENT_ID_PREFIX;

mod validation;

pub use validation::ConfigError;

/// Store configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (GRAPHCACHE_*)
/// 2. TOML config file (if GRAPHCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Persist base-layer writes and seed the cached layer from disk.
    ///
    /// Set via GRAPHCACHE_DISK_CACHE_ENABLED environment variable.
    #[serde(default)]
    pub disk_cache_enabled: bool,

    /// Path to SQLite cache database.
    ///
    /// Set via GRAPHCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Track created records and collect unreachable ones.
    ///
    /// Set via GRAPHCACHE_GC_ENABLED environment variable.
    #[serde(default)]
    pub gc_enabled: bool,

    /// Prefix reserved for locally generated ids.
    ///
    /// Set via GRAPHCACHE_CLIENT_ID_PREFIX environment variable.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./graphcache.sqlite")
}

fn default_client_id_prefix() -> String {
    CLIENT_ID_PREFIX.into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            disk_cache_enabled: false,
            db_path: default_db_path(),
            gc_enabled: false,
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("GRAPHCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("GRAPHCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./graphcache.sqlite"));
        assert_eq!(config.client_id_prefix, "client:");
        assert!(!config.disk_cache_enabled);
        assert!(!config.gc_enabled);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("gc_enabled = true\nclient_id_prefix = \"local:\""));
        let config: AppConfig = figment.extract().unwrap();
        assert!(config.gc_enabled);
        assert_eq!(config.client_id_prefix, "local:");
        assert!(!config.disk_cache_enabled);
    }
}
