//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Upper bound on history page size, regardless of configuration
pub const HARD_MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site identifier used as the Prometheus `site` label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "tag-tracker".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_port() }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_path: default_database_path() }
    }
}

fn default_database_path() -> String {
    "data/tags.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// A tag is present if its latest sighting is at most this old
    #[serde(default = "default_presence_window_secs")]
    pub window_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { window_secs: default_presence_window_secs() }
    }
}

fn default_presence_window_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
    /// Capped at HARD_MAX_HISTORY_LIMIT
    #[serde(default = "default_history_max_limit")]
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { default_limit: default_history_limit(), max_limit: default_history_max_limit() }
    }
}

fn default_history_limit() -> usize {
    100
}

fn default_history_max_limit() -> usize {
    HARD_MAX_HISTORY_LIMIT
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    port: u16,
    database_path: String,
    presence_window_secs: u64,
    history_default_limit: usize,
    history_max_limit: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let history_max_limit = toml_config.history.max_limit.clamp(1, HARD_MAX_HISTORY_LIMIT);
        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            database_path: toml_config.storage.database_path,
            presence_window_secs: toml_config.presence.window_secs,
            history_default_limit: toml_config.history.default_limit.clamp(1, history_max_limit),
            history_max_limit,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    pub fn presence_window_secs(&self) -> u64 {
        self.presence_window_secs
    }

    pub fn history_default_limit(&self) -> usize {
        self.history_default_limit
    }

    pub fn history_max_limit(&self) -> usize {
        self.history_max_limit
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for tests and embedders
    pub fn with_presence_window_secs(mut self, secs: u64) -> Self {
        self.presence_window_secs = secs;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "tag-tracker");
        assert_eq!(config.port(), 8000);
        assert_eq!(config.database_path(), "data/tags.db");
        assert_eq!(config.presence_window_secs(), 10);
        assert_eq!(config.history_default_limit(), 100);
        assert_eq!(config.history_max_limit(), 1000);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/prod.toml")), "config/prod.toml");
    }

    #[test]
    fn test_history_limits_are_capped() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[history]
default_limit = 5000
max_limit = 20000
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.history_max_limit(), HARD_MAX_HISTORY_LIMIT);
        assert_eq!(config.history_default_limit(), HARD_MAX_HISTORY_LIMIT);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "empty".to_string());
        assert_eq!(config.bind_address(), "0.0.0.0");
        assert_eq!(config.metrics_interval_secs(), 60);
    }

    #[test]
    fn test_builders() {
        let config = Config::default().with_presence_window_secs(30).with_database_path("/tmp/x.db");
        assert_eq!(config.presence_window_secs(), 30);
        assert_eq!(config.database_path(), "/tmp/x.db");
    }
}
