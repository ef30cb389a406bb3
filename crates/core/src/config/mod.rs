//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (KS_OFFLINE_*)
//! 2. TOML config file (if KS_OFFLINE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AssetManifest, CacheVersion, DEFAULT_ASSETS, DEFAULT_CACHE_VERSION, Error};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (KS_OFFLINE_*)
/// 2. TOML config file (if KS_OFFLINE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite cache database.
    ///
    /// Set via KS_OFFLINE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin and base path the controller serves. Manifest assets are
    /// resolved against it and only requests to its origin are cached.
    ///
    /// Set via KS_OFFLINE_SCOPE environment variable.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Active cache version identifier. Bump it to invalidate everything.
    ///
    /// Set via KS_OFFLINE_CACHE_VERSION environment variable.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Assets fetched and stored at install time.
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via KS_OFFLINE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via KS_OFFLINE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via KS_OFFLINE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Activate a freshly installed version immediately instead of waiting
    /// for an explicit activation.
    ///
    /// Set via KS_OFFLINE_SKIP_WAITING environment variable.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./ks-offline-cache.sqlite")
}

fn default_scope() -> String {
    "http://localhost:8080/".into()
}

fn default_cache_version() -> String {
    DEFAULT_CACHE_VERSION.into()
}

fn default_assets() -> Vec<String> {
    DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
}

fn default_user_agent() -> String {
    "ks-offline/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scope: default_scope(),
            cache_version: default_cache_version(),
            assets: default_assets(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            skip_waiting: true,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parsed registration scope.
    pub fn scope_url(&self) -> Result<Url, Error> {
        Url::parse(&self.scope).map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.scope)))
    }

    pub fn version(&self) -> Result<CacheVersion, Error> {
        CacheVersion::new(self.cache_version.clone())
    }

    pub fn manifest(&self) -> AssetManifest {
        AssetManifest::new(self.assets.iter().cloned())
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `KS_OFFLINE_`
    /// 2. TOML file from `KS_OFFLINE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be read or parsed, or if
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract_validated()
    }

    fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("KS_OFFLINE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("KS_OFFLINE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }
}

trait ExtractValidated {
    fn extract_validated(self) -> Result<AppConfig, ConfigError>;
}

impl ExtractValidated for Figment {
    fn extract_validated(self) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = self.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
