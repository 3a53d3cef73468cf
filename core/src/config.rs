//! Configuration
//!
//! Layered in increasing priority: built-in defaults, an optional TOML file,
//! `TEMPO_*` environment variables (nested keys use `__`, e.g.
//! `TEMPO_WORKER__POLL_INTERVAL_MS`), and finally explicit builder overrides.
//! A `.env` file in the working directory is loaded first when present.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "TEMPO";
pub const DATABASE_URL_ENV: &str = "TEMPO_DATABASE_URL";
pub const CONFIG_PATH_ENV: &str = "TEMPO_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "tempo.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

/// Adapter retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub max_concurrent_activations: usize,
    /// Steps an execution may run between two suspensions before it is failed
    pub max_steps_per_activation: u32,
    /// How long an activation holds its claim on an execution; a claim left
    /// behind by a dead worker is taken over once it expires
    pub claim_lease_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_concurrent_activations: 16,
            max_steps_per_activation: crate::executor::vm::DEFAULT_STEP_BUDGET,
            claim_lease_ms: 300_000,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default file location and the environment
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database.url.as_deref().with_context(|| {
            format!(
                "No database URL configured; set {} or database.url in the config file",
                DATABASE_URL_ENV
            )
        })
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let explicit_path = self
            .config_path
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));
        let required = explicit_path.is_some();
        let path = explicit_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let settings = config::Config::builder()
            .add_source(
                config::Config::try_from(&Config::default())
                    .context("Failed to build default configuration")?,
            )
            .add_source(config::File::from(path.clone()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database.url = Some(url);
        }
        if let Some(url) = self.database_url {
            config.database.url = Some(url);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.worker.poll_interval_ms, 1_000);
        assert_eq!(config.worker.claim_lease_ms, 300_000);
        assert!(config.database.url.is_none());
        assert!(config.database_url().is_err());
    }

    #[test]
    fn test_file_and_override() {
        let dir = std::env::temp_dir().join(format!("tempo-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tempo.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[retry]\nmax_attempts = 7\n\n[worker]\npoll_interval_ms = 250").unwrap();

        let config = Config::builder()
            .config_path(Some(path))
            .database_url(Some("postgres://localhost/tempo_test".to_string()))
            .build()
            .unwrap();

        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert_eq!(config.worker.poll_interval_ms, 250);
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/tempo_test");

        std::fs::remove_dir_all(dir).ok();
    }
}
