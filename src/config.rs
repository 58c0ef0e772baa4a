use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub writeback: WriteBackConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Sizing for one intake channel and its batch assembler.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_intake_batch")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_refresh")]
    pub refresh_interval_secs: u64,
    /// Not consulted yet: every market refreshes on `refresh_interval_secs`
    #[serde(default = "default_live_refresh")]
    pub live_refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteBackConfig {
    #[serde(default = "default_writeback_batch")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub csv_logging: bool,
    #[serde(default = "default_csv_path")]
    pub csv_log_path: String,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_database_path() -> String { "odds.db".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_capacity() -> usize { 50_000 }
fn default_intake_batch() -> usize { 100 }
fn default_batch_timeout() -> u64 { 50 }
fn default_stats_interval() -> u64 { 60 }
fn default_refresh() -> u64 { 10 }
fn default_live_refresh() -> u64 { 4 }
fn default_writeback_batch() -> usize { 300 }
fn default_poll_interval() -> u64 { 5 }
fn default_error_backoff() -> u64 { 100 }
fn default_csv_path() -> String { "pipeline_stats.csv".to_string() }

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            batch_size: default_intake_batch(),
            batch_timeout_ms: default_batch_timeout(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl IntakeConfig {
    /// Reference sizing for a match-level event channel.
    pub fn match_events() -> Self {
        Self {
            capacity: 10_000,
            batch_timeout_ms: 100,
            ..Self::default()
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh(),
            live_refresh_interval_secs: default_live_refresh(),
        }
    }
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            batch_size: default_writeback_batch(),
            poll_interval_ms: default_poll_interval(),
            error_backoff_ms: default_error_backoff(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            csv_logging: false,
            csv_log_path: default_csv_path(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// Overrides picked up from the process environment and `.env`.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub config_path: String,
    pub database_path: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise run on defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(path) = &env.database_path {
            self.system.database_path = path.clone();
        }
    }
}

impl EnvConfig {
    pub fn load() -> Self {
        dotenv::dotenv().ok();

        Self {
            config_path: std::env::var("ODDS_INGEST_CONFIG")
                .unwrap_or_else(|_| "config.toml".to_string()),
            database_path: std::env::var("DATABASE_PATH").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_reference_sizing() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.intake.capacity, 50_000);
        assert_eq!(config.intake.batch_size, 100);
        assert_eq!(config.intake.batch_timeout_ms, 50);
        assert_eq!(config.reconcile.refresh_interval_secs, 10);
        assert_eq!(config.writeback.batch_size, 300);
        assert_eq!(config.writeback.poll_interval_ms, 5);
        assert_eq!(config.system.database_path, "odds.db");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [intake]
            capacity = 1000

            [writeback]
            batch_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.intake.capacity, 1000);
        assert_eq!(config.intake.batch_size, 100);
        assert_eq!(config.writeback.batch_size, 50);
        assert_eq!(config.writeback.error_backoff_ms, 100);
    }

    #[test]
    fn test_match_event_sizing() {
        let match_cfg = IntakeConfig::match_events();
        assert_eq!(match_cfg.capacity, 10_000);
        assert_eq!(match_cfg.batch_timeout_ms, 100);
        assert_eq!(match_cfg.batch_size, 100);
    }

    #[test]
    fn test_env_overrides_database_path() {
        let mut config = Config::default();
        config.apply_env(&EnvConfig {
            config_path: "config.toml".to_string(),
            database_path: Some("/tmp/other.db".to_string()),
        });
        assert_eq!(config.system.database_path, "/tmp/other.db");
    }
}
