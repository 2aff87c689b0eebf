use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub venue: Option<VenueConfig>,
    #[serde(default)]
    pub payment: Option<PaymentConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health server port (default: 8080)
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Polling interval when the queue is empty (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum delivery attempts per job
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Maximum backoff delay (milliseconds)
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Seconds after which an unfinished active job is requeued
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_visibility_timeout() -> u64 {
    60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl QueueConfig {
    /// Exponential backoff for the given attempt number, capped at the
    /// configured maximum.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Which execution strategy processes orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Simulated,
    Real,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Simulated
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Fraction of simulated executions that fail with "insufficient
    /// liquidity" (0.0 .. 1.0)
    #[serde(default = "default_sim_failure_rate")]
    pub sim_failure_rate: f64,
    /// Simulated execution latency window (milliseconds)
    #[serde(default = "default_sim_latency_min")]
    pub sim_latency_min_ms: u64,
    #[serde(default = "default_sim_latency_max")]
    pub sim_latency_max_ms: u64,
}

fn default_sim_failure_rate() -> f64 {
    0.02
}

fn default_sim_latency_min() -> u64 {
    25
}

fn default_sim_latency_max() -> u64 {
    150
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simulated,
            sim_failure_rate: default_sim_failure_rate(),
            sim_latency_min_ms: default_sim_latency_min(),
            sim_latency_max_ms: default_sim_latency_max(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// Default record TTL in hours when the caller does not supply one
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

fn default_ttl_hours() -> u64 {
    24
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// REST API endpoint for order execution
    pub rest_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_venue_timeout")]
    pub timeout_ms: u64,
    /// Fallback minimum notional per order when the market carries none
    #[serde(default)]
    pub min_order_value: Option<Decimal>,
}

fn default_venue_timeout() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Transfer-relayer endpoint
    pub base_url: String,
    /// Funder address receiving user transfers
    pub funder_address: String,
    #[serde(default = "default_venue_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for rolling file output; stdout only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PARLAY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PARLAY_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("PARLAY")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.queue.workers == 0 {
            errors.push("queue.workers must be at least 1".to_string());
        }

        if self.queue.max_attempts == 0 {
            errors.push("queue.max_attempts must be at least 1".to_string());
        }

        if self.queue.backoff_base_ms > self.queue.backoff_max_ms {
            errors.push("queue.backoff_base_ms must not exceed backoff_max_ms".to_string());
        }

        if !(0.0..=1.0).contains(&self.execution.sim_failure_rate) {
            errors.push("execution.sim_failure_rate must be between 0 and 1".to_string());
        }

        if self.execution.sim_latency_min_ms > self.execution.sim_latency_max_ms {
            errors
                .push("execution.sim_latency_min_ms must not exceed sim_latency_max_ms".to_string());
        }

        if self.idempotency.ttl_hours == 0 {
            errors.push("idempotency.ttl_hours must be positive".to_string());
        }

        if self.execution.mode == ExecutionMode::Real {
            if self.venue.is_none() {
                errors.push("venue config is required for real execution".to_string());
            }
            if self.payment.is_none() {
                errors.push("payment config is required for real execution".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/parlay".to_string(),
                max_connections: 5,
            },
            queue: QueueConfig::default(),
            execution: ExecutionConfig::default(),
            idempotency: IdempotencyConfig::default(),
            venue: None,
            payment: None,
            logging: LoggingConfig::default(),
            health_port: Some(8080),
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let queue = QueueConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
            ..QueueConfig::default()
        };

        assert_eq!(queue.backoff_duration(1), Duration::from_millis(1_000));
        assert_eq!(queue.backoff_duration(2), Duration::from_millis(2_000));
        assert_eq!(queue.backoff_duration(3), Duration::from_millis(4_000));
        assert_eq!(queue.backoff_duration(4), Duration::from_millis(8_000));
        assert_eq!(queue.backoff_duration(10), Duration::from_millis(8_000)); // capped
    }

    #[test]
    fn real_mode_requires_collaborators() {
        let mut cfg = minimal_config();
        cfg.execution.mode = ExecutionMode::Real;
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn bad_failure_rate_is_rejected() {
        let mut cfg = minimal_config();
        cfg.execution.sim_failure_rate = 1.5;
        assert!(cfg.validate().is_err());
    }
}
