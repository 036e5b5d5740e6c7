//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//!
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. `.chmacro.toml` in current directory
//! 4. `~/.config/chmacro/config.toml`
//! 5. Default values
//!
//! # Configuration File Format
//!
//! ```toml
//! [datasource]
//! url = "http://localhost:8123"
//! default_database = "default"
//! user = "default"
//! password = ""
//!
//! [metadata]
//! cache_ttl_secs = 3600
//!
//! [query]
//! timeout_ms = 30000
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 500
//! max_delay_ms = 10000
//! backoff_factor = 2.0
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `CLICKHOUSE_URL` | HTTP interface URL |
//! | `CLICKHOUSE_USER` | User name |
//! | `CLICKHOUSE_PASSWORD` | Password |
//! | `CLICKHOUSE_DATABASE` | Database used when a query omits one |

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration
};

use serde::Deserialize;

use crate::error::{AppResult, config_error};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub datasource: DataSourceConfig,
    #[serde(default)]
    pub metadata:   MetadataConfig,
    #[serde(default)]
    pub query:      QueryConfig,
    #[serde(default)]
    pub retry:      RetryConfig
}

/// Database connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub url:              Option<String>,
    pub default_database: String,
    pub user:             Option<String>,
    pub password:         Option<String>
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            url:              None,
            default_database: String::from("default"),
            user:             None,
            password:         None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Lifetime of primary key and column cache entries
    pub cache_ttl_secs: u64
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600
        }
    }
}

impl MetadataConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Deadline for all metadata lookups of one interpolation
    pub timeout_ms: u64
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry configuration for database requests
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries:      u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms:     u64,
    pub backoff_factor:   f64
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries:      3,
            initial_delay_ms: 500,
            max_delay_ms:     10000,
            backoff_factor:   2.0
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following one that waited `delay_ms`
    pub fn next_delay(&self, delay_ms: u64) -> u64 {
        ((delay_ms as f64 * self.backoff_factor) as u64).min(self.max_delay_ms)
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file in current directory (.chmacro.toml)
    /// 3. Config file in home directory (~/.config/chmacro/config.toml)
    /// 4. Default values
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("chmacro")
                .join("config.toml");
            if home_config.exists() {
                config = Self::from_file(&home_config)?;
            }
        }

        // Current directory config overrides home config
        let local_config = PathBuf::from(".chmacro.toml");
        if local_config.exists() {
            config = Self::from_file(&local_config)?;
        }

        config.apply_env(|name| env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| config_error(format!("Invalid config file: {}", e)))
    }

    /// Override settings from environment-style variables
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("CLICKHOUSE_URL") {
            self.datasource.url = Some(url);
        }
        if let Some(user) = var("CLICKHOUSE_USER") {
            self.datasource.user = Some(user);
        }
        if let Some(password) = var("CLICKHOUSE_PASSWORD") {
            self.datasource.password = Some(password);
        }
        if let Some(database) = var("CLICKHOUSE_DATABASE") {
            self.datasource.default_database = database;
        }
    }
}
