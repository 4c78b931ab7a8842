//! Configuration management for ZenChat
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, ZenError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default OpenCode Zen API base URL
pub const DEFAULT_API_BASE: &str = "https://opencode.ai/zen/v1";

/// Main configuration structure for ZenChat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote API settings
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Model catalog behavior
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Conversation synchronizer behavior
    #[serde(default)]
    pub sync: SyncConfig,
    /// Local database settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Remote completion API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for `/models` and `/chat/completions`
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Total request timeout (seconds). Applies to unary calls only;
    /// streaming responses are bounded by `stream_idle_timeout_seconds`.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// TCP connect timeout (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Maximum silence between two streamed chunks before the stream is
    /// treated as a network failure (seconds)
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_seconds: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_stream_idle_timeout() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            stream_idle_timeout_seconds: default_stream_idle_timeout(),
        }
    }
}

/// Model catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Lifetime of a fetched model list (seconds)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Serve the built-in free models when no credential is configured
    #[serde(default = "default_free_mode")]
    pub free_mode: bool,
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_free_mode() -> bool {
    true
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
            free_mode: default_free_mode(),
        }
    }
}

/// Conversation synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Prefer streamed responses when the model supports them
    #[serde(default = "default_streaming")]
    pub streaming: bool,

    /// Number of blocking workers used for store I/O
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Buffered deltas between the stream reader and the synchronizer
    #[serde(default = "default_delta_channel_capacity")]
    pub delta_channel_capacity: usize,

    /// Optional system prompt prepended to every request
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Replies with no write for this long are treated as abandoned and
    /// finalized at startup (seconds). Must exceed the provider timeouts.
    #[serde(default = "default_recover_after")]
    pub recover_after_seconds: u64,
}

fn default_streaming() -> bool {
    true
}

fn default_worker_threads() -> usize {
    4
}

fn default_delta_channel_capacity() -> usize {
    64
}

fn default_recover_after() -> u64 {
    600
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            streaming: default_streaming(),
            worker_threads: default_worker_threads(),
            delta_channel_capacity: default_delta_channel_capacity(),
            system_prompt: None,
            recover_after_seconds: default_recover_after(),
        }
    }
}

/// Local database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<String>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ZenError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ZenError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(api_base) = std::env::var("ZENCHAT_API_BASE") {
            self.provider.api_base = api_base;
        }

        if let Ok(free_mode) = std::env::var("ZENCHAT_FREE_MODE") {
            match parse_bool(&free_mode) {
                Some(value) => self.catalog.free_mode = value,
                None => tracing::warn!("Invalid ZENCHAT_FREE_MODE: {}", free_mode),
            }
        }

        if let Ok(streaming) = std::env::var("ZENCHAT_STREAMING") {
            match parse_bool(&streaming) {
                Some(value) => self.sync.streaming = value,
                None => tracing::warn!("Invalid ZENCHAT_STREAMING: {}", streaming),
            }
        }

        if let Ok(workers) = std::env::var("ZENCHAT_WORKER_THREADS") {
            if let Ok(value) = workers.parse() {
                self.sync.worker_threads = value;
            } else {
                tracing::warn!("Invalid ZENCHAT_WORKER_THREADS: {}", workers);
            }
        }

        if let Ok(db_path) = std::env::var("ZENCHAT_DB") {
            self.storage.path = Some(db_path);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(db_path) = &cli.storage_path {
            tracing::info!("Using storage DB override from CLI: {}", db_path);
            self.storage.path = Some(db_path.clone());
        }
        if let Some(api_base) = &cli.api_base {
            self.provider.api_base = api_base.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ZenError::Config` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.provider.api_base).map_err(|e| {
            ZenError::Config(format!(
                "provider.api_base is not a valid URL ({}): {}",
                self.provider.api_base, e
            ))
        })?;

        if self.provider.timeout_seconds == 0 {
            return Err(ZenError::Config(
                "provider.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.provider.connect_timeout_seconds == 0 {
            return Err(ZenError::Config(
                "provider.connect_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.provider.stream_idle_timeout_seconds == 0 {
            return Err(ZenError::Config(
                "provider.stream_idle_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.catalog.cache_ttl_seconds == 0 {
            return Err(ZenError::Config(
                "catalog.cache_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.sync.worker_threads == 0 || self.sync.worker_threads > 64 {
            return Err(ZenError::Config(
                "sync.worker_threads must be between 1 and 64".to_string(),
            ));
        }

        if self.sync.delta_channel_capacity == 0 {
            return Err(ZenError::Config(
                "sync.delta_channel_capacity must be greater than 0".to_string(),
            ));
        }

        let longest_silence = self
            .provider
            .timeout_seconds
            .max(self.provider.stream_idle_timeout_seconds);
        if self.sync.recover_after_seconds <= longest_silence {
            return Err(ZenError::Config(format!(
                "sync.recover_after_seconds must be greater than {} (the longest provider timeout)",
                longest_silence
            )));
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cli() -> crate::cli::Cli {
        crate::cli::Cli::default()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider.api_base, DEFAULT_API_BASE);
        assert_eq!(config.catalog.cache_ttl_seconds, 3600);
        assert!(config.catalog.free_mode);
        assert!(config.sync.streaming);
        assert_eq!(config.sync.worker_threads, 4);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_url() {
        let mut config = Config::default();
        config.provider.api_base = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.provider.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_workers() {
        let mut config = Config::default();
        config.sync.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_cache_ttl() {
        let mut config = Config::default();
        config.catalog.cache_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_recovery_must_outlast_timeouts() {
        let mut config = Config::default();
        config.sync.recover_after_seconds = config.provider.timeout_seconds;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sync.recover_after_seconds"));

        config.provider.timeout_seconds = 30;
        config.provider.stream_idle_timeout_seconds = 30;
        config.sync.recover_after_seconds = 31;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
provider:
  api_base: http://localhost:8080/v1
  timeout_seconds: 30
catalog:
  cache_ttl_seconds: 60
  free_mode: false
sync:
  streaming: false
  worker_threads: 2
storage:
  path: /tmp/zen.db
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.provider.api_base, "http://localhost:8080/v1");
        assert_eq!(config.provider.timeout_seconds, 30);
        assert_eq!(config.provider.connect_timeout_seconds, 30);
        assert_eq!(config.catalog.cache_ttl_seconds, 60);
        assert!(!config.catalog.free_mode);
        assert!(!config.sync.streaming);
        assert_eq!(config.sync.worker_threads, 2);
        assert_eq!(config.sync.delta_channel_capacity, 64);
        assert_eq!(config.storage.path.as_deref(), Some("/tmp/zen.db"));
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.provider.api_base, DEFAULT_API_BASE);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let config = Config::load("nonexistent.yaml", &cli()).unwrap();
        assert_eq!(config.provider.api_base, DEFAULT_API_BASE);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("ZENCHAT_FREE_MODE", "off");
        std::env::set_var("ZENCHAT_WORKER_THREADS", "8");
        std::env::set_var("ZENCHAT_API_BASE", "http://127.0.0.1:9/v1");

        let config = Config::load("nonexistent.yaml", &cli()).unwrap();

        std::env::remove_var("ZENCHAT_FREE_MODE");
        std::env::remove_var("ZENCHAT_WORKER_THREADS");
        std::env::remove_var("ZENCHAT_API_BASE");

        assert!(!config.catalog.free_mode);
        assert_eq!(config.sync.worker_threads, 8);
        assert_eq!(config.provider.api_base, "http://127.0.0.1:9/v1");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_ignored() {
        std::env::set_var("ZENCHAT_STREAMING", "maybe");
        let config = Config::load("nonexistent.yaml", &cli()).unwrap();
        std::env::remove_var("ZENCHAT_STREAMING");
        assert!(config.sync.streaming);
    }

    #[test]
    fn test_cli_storage_override() {
        let mut cli = cli();
        cli.storage_path = Some("/tmp/override.db".to_string());
        let mut config = Config::default();
        config.apply_cli_overrides(&cli);
        assert_eq!(config.storage.path.as_deref(), Some("/tmp/override.db"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" no "), Some(false));
        assert_eq!(parse_bool("2"), None);
    }
}
