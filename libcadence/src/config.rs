//! Configuration management for Cadence

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::pool::PoolConfig;
use crate::publisher::{MockPublisher, Publisher, SimulatedFailure};
use crate::rate_limiter::{RateLimit, RateLimiter, SlidingWindowLimiter, SqliteRateLimiter};
use crate::retry::RetryPolicy;
use crate::scanner::ScannerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scanner: ScannerSection,
    pub worker: WorkerSection,
    pub rate_limit: RateLimitSection,
    pub publisher: PublisherSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/cadence/cadence.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    pub chunk_size: usize,
    pub queue: String,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            queue: crate::queue::POSTS_QUEUE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Seconds before a released task is delivered again
    pub retry_delay: u64,
    pub poll_interval_ms: u64,
    /// Seconds one publisher call may run
    pub publish_timeout: u64,
    /// Seconds one delivery may run
    pub job_timeout: u64,
    /// Seconds before an unsettled reservation is handed out again
    pub visibility_timeout: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_delay: 60,
            poll_interval_ms: 500,
            publish_timeout: 30,
            job_timeout: 120,
            visibility_timeout: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    #[default]
    Memory,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub backend: RateLimitBackend,
    pub max_hits: u32,
    /// Window length in seconds
    pub window: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Memory,
            max_hits: 10,
            window: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    #[default]
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSection {
    pub kind: PublisherKind,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub simulate: SimulatedFailure,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            kind: PublisherKind::Mock,
            min_latency_ms: 100,
            max_latency_ms: 500,
            simulate: SimulatedFailure::None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            let mut config = Config::default();
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CADENCE_DB_PATH") {
            if !path.trim().is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> { Err(ConfigError::Invalid(msg.to_string()).into()) };

        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.scanner.chunk_size == 0 {
            return invalid("scanner.chunk_size must be at least 1");
        }
        if self.scanner.queue.trim().is_empty() {
            return Err(ConfigError::MissingField("scanner.queue".to_string()).into());
        }
        if self.worker.concurrency == 0 {
            return invalid("worker.concurrency must be at least 1");
        }
        if self.worker.max_attempts == 0 {
            return invalid("worker.max_attempts must be at least 1");
        }
        if self.worker.job_timeout == 0 {
            return invalid("worker.job_timeout must be at least 1 second");
        }
        if self.worker.publish_timeout == 0 || self.worker.publish_timeout >= self.worker.job_timeout {
            return invalid("worker.publish_timeout must be at least 1 second and shorter than worker.job_timeout");
        }
        if self.worker.visibility_timeout <= self.worker.job_timeout {
            return invalid("worker.visibility_timeout must be longer than worker.job_timeout");
        }
        if self.rate_limit.max_hits == 0 {
            return invalid("rate_limit.max_hits must be at least 1");
        }
        if self.rate_limit.window == 0 {
            return invalid("rate_limit.window must be at least 1 second");
        }
        if self.publisher.min_latency_ms > self.publisher.max_latency_ms {
            return invalid("publisher.min_latency_ms must not exceed publisher.max_latency_ms");
        }
        Ok(())
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            chunk_size: self.scanner.chunk_size,
            queue: self.scanner.queue.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.worker.max_attempts,
            Duration::from_secs(self.worker.retry_delay),
        )
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            concurrency: self.worker.concurrency,
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            job_timeout: Duration::from_secs(self.worker.job_timeout),
            queue: self.scanner.queue.clone(),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.publish_timeout)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.visibility_timeout)
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit::new(
            self.rate_limit.max_hits,
            Duration::from_secs(self.rate_limit.window),
        )
    }

    /// Build the configured rate limiter
    pub fn build_limiter(&self, db: &Database) -> Arc<dyn RateLimiter> {
        match self.rate_limit.backend {
            RateLimitBackend::Memory => Arc::new(SlidingWindowLimiter::new(self.rate_limit())),
            RateLimitBackend::Database => Arc::new(SqliteRateLimiter::new(db, self.rate_limit())),
        }
    }

    /// Build the configured publisher
    pub fn build_publisher(&self) -> Arc<dyn Publisher> {
        match self.publisher.kind {
            PublisherKind::Mock => Arc::new(MockPublisher::new(
                Duration::from_millis(self.publisher.min_latency_ms),
                Duration::from_millis(self.publisher.max_latency_ms),
                self.publisher.simulate,
            )),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CADENCE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("cadence").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CadenceError;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = Config::default();
        assert_eq!(config.scanner.chunk_size, 100);
        assert_eq!(config.scanner.queue, "posts");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.rate_limit(), RateLimit::default());
        assert_eq!(config.publisher.simulate, SimulatedFailure::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_partial_file_keeps_other_defaults() {
        std::env::remove_var("CADENCE_DB_PATH");
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/cadence-test.db"

[worker]
concurrency = 8
retry_delay = 5

[rate_limit]
backend = "database"

[publisher]
simulate = "rate_limit"
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/cadence-test.db");
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.retry_policy().retry_delay, Duration::from_secs(5));
        assert_eq!(config.rate_limit.backend, RateLimitBackend::Database);
        assert_eq!(config.rate_limit.max_hits, 10);
        assert_eq!(config.publisher.simulate, SimulatedFailure::RateLimit);
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[worker\nconcurrency = ");

        match Config::load_from_path(&path) {
            Err(CadenceError::Config(ConfigError::ParseError(_))) => {}
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[scanner]\nchunk_size = 0\n");

        let err = Config::load_from_path(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_validate_rejects_inverted_latency() {
        let mut config = Config::default();
        config.publisher.min_latency_ms = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_visibility_timeout() {
        let mut config = Config::default();
        config.worker.visibility_timeout = config.worker.job_timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_publish_timeout() {
        let mut config = Config::default();
        assert_eq!(config.publish_timeout(), Duration::from_secs(30));

        config.worker.publish_timeout = config.worker.job_timeout;
        assert!(config.validate().is_err());

        config.worker.publish_timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("CADENCE_CONFIG", dir.path().join("absent.toml"));
        std::env::remove_var("CADENCE_DB_PATH");

        let config = Config::load().unwrap();
        assert_eq!(config.database.path, DatabaseConfig::default().path);

        std::env::remove_var("CADENCE_CONFIG");
    }

    #[test]
    #[serial]
    fn test_db_path_env_override() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[database]\npath = \"/tmp/from-file.db\"\n");
        std::env::set_var("CADENCE_DB_PATH", "/tmp/from-env.db");

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/from-env.db");

        std::env::remove_var("CADENCE_DB_PATH");
    }

    #[test]
    fn test_pool_config_uses_scanner_queue() {
        let mut config = Config::default();
        config.scanner.queue = "custom".to_string();
        config.worker.poll_interval_ms = 250;

        let pool = config.pool_config();
        assert_eq!(pool.queue, "custom");
        assert_eq!(pool.poll_interval, Duration::from_millis(250));
        assert_eq!(pool.concurrency, 4);
    }
}
