//! Configuration loading for the `restash` CLI.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.restash/config.toml` (user)
//! 3. `/etc/restash/config.toml` (system)
//!
//! The credential is never read from these files; see [`TOKEN_ENV_VAR`].

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CacheConfig, ClientConfig, RestashError, Result, RetryConfig};

/// Environment variable holding the bearer credential.
pub const TOKEN_ENV_VAR: &str = "RESTASH_TOKEN";

/// CLI configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Resource name → path below the base URL. Unlisted resources use
    /// `/{name}`.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

/// Backend connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

/// Cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Maximum cached entries (default: 1000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Freshness window in seconds (default: 60).
    #[serde(default = "default_freshness")]
    pub freshness_secs: u64,
    /// Fetch attempts including the first (default: 1, no retry).
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            freshness_secs: default_freshness(),
            max_attempts: default_attempts(),
        }
    }
}

fn default_max_entries() -> u64 {
    1_000
}

fn default_freshness() -> u64 {
    60
}

fn default_attempts() -> u32 {
    1
}

impl Config {
    /// Load configuration from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RestashError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            RestashError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(RestashError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".restash").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/restash/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(RestashError::Configuration(
            "No config file found. Create ~/.restash/config.toml or /etc/restash/config.toml"
                .to_string(),
        ))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.api.base_url).timeout(Duration::from_secs(self.api.timeout_secs))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.cache.max_entries)
            .default_freshness(Duration::from_secs(self.cache.freshness_secs))
            .retry(RetryConfig::new().max_attempts(self.cache.max_attempts.max(1)))
    }

    /// Path of `resource` below the base URL.
    pub fn resource_path(&self, resource: &str) -> String {
        self.resources
            .get(resource)
            .cloned()
            .unwrap_or_else(|| format!("/{resource}"))
    }
}
