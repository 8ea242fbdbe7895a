//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard limits imposed by the substrate on a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateLimits {
    /// Structured fields per entry, including the hidden row field.
    pub max_fields: usize,
    /// Characters in a structured field name.
    pub max_field_name_len: usize,
    /// Characters in a structured field value.
    pub max_field_value_len: usize,
    /// Characters in an entry's text content.
    pub max_content_len: usize,
    /// Characters in a container's metadata document.
    pub max_metadata_len: usize,
    /// Entries fetched per list call.
    pub page_size: usize,
}

impl Default for SubstrateLimits {
    fn default() -> Self {
        Self {
            max_fields: 25,
            max_field_name_len: 256,
            max_field_value_len: 1024,
            max_content_len: 2000,
            max_metadata_len: 4096,
            page_size: 100,
        }
    }
}

/// Retry configuration for substrate calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), honoring a server hint.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self.backoff_multiplier.max(1.0) as f64;
        let scaled = self.initial_backoff.as_secs_f64() * exp.powi(attempt.min(32) as i32);
        let capped = Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()));
        match retry_after {
            Some(hint) => capped.max(hint),
            None => capped,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Client-side rate budget, kept below the substrate's published limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls per second across all containers.
    pub global_per_second: u32,
    /// Calls per second against one container.
    pub per_container_per_second: u32,
    /// Burst allowance for both buckets.
    pub burst: u32,
    /// Substrate calls allowed in flight at once.
    pub max_in_flight: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_second: 50,
            per_container_per_second: 5,
            burst: 5,
            max_in_flight: 4,
        }
    }
}

/// Tracing subscriber settings. Logging is off unless enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filter: "channeldb=info".to_string(),
            json: false,
        }
    }
}

/// Master configuration, passed explicitly to the database at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub limits: SubstrateLimits,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    /// Bound on each individual substrate round trip.
    pub call_timeout: Duration,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: SubstrateLimits::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            call_timeout: Duration::from_secs(10),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CHANNELDB_MAX_RETRIES`: Retries per substrate call (default: 5)
    /// - `CHANNELDB_INITIAL_BACKOFF_MS`: First retry delay (default: 250)
    /// - `CHANNELDB_MAX_BACKOFF_MS`: Retry delay cap (default: 30000)
    /// - `CHANNELDB_GLOBAL_RPS`: Global calls per second (default: 50)
    /// - `CHANNELDB_CONTAINER_RPS`: Calls per second per container (default: 5)
    /// - `CHANNELDB_BURST`: Burst allowance (default: 5)
    /// - `CHANNELDB_MAX_IN_FLIGHT`: Concurrent substrate calls (default: 4)
    /// - `CHANNELDB_CALL_TIMEOUT_MS`: Per-call timeout (default: 10000)
    /// - `CHANNELDB_LOG`: Enable logging (default: false)
    /// - `CHANNELDB_LOG_JSON`: JSON log output (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn env<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|s| s.parse().ok())
        }

        Self {
            limits: defaults.limits,
            retry: RetryConfig {
                max_retries: env("CHANNELDB_MAX_RETRIES").unwrap_or(defaults.retry.max_retries),
                initial_backoff: env("CHANNELDB_INITIAL_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_backoff),
                max_backoff: env("CHANNELDB_MAX_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_backoff),
                backoff_multiplier: defaults.retry.backoff_multiplier,
            },
            rate_limit: RateLimitConfig {
                global_per_second: env("CHANNELDB_GLOBAL_RPS")
                    .unwrap_or(defaults.rate_limit.global_per_second),
                per_container_per_second: env("CHANNELDB_CONTAINER_RPS")
                    .unwrap_or(defaults.rate_limit.per_container_per_second),
                burst: env("CHANNELDB_BURST").unwrap_or(defaults.rate_limit.burst),
                max_in_flight: env("CHANNELDB_MAX_IN_FLIGHT")
                    .unwrap_or(defaults.rate_limit.max_in_flight),
            },
            call_timeout: env("CHANNELDB_CALL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
            logging: LoggingConfig {
                enabled: std::env::var("CHANNELDB_LOG")
                    .map(|s| s.to_lowercase() == "true" || s == "1")
                    .unwrap_or(defaults.logging.enabled),
                filter: std::env::var("CHANNELDB_LOG_FILTER")
                    .unwrap_or(defaults.logging.filter),
                json: std::env::var("CHANNELDB_LOG_JSON")
                    .map(|s| s.to_lowercase() == "true" || s == "1")
                    .unwrap_or(defaults.logging.json),
            },
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(ChannelDbError::Config) if invalid.
    pub fn validate(&self) -> ChannelDbResult<()> {
        fn invalid(field: &str, value: impl ToString, reason: &str) -> ChannelDbError {
            ChannelDbError::Config(ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            })
        }

        // The hidden row field needs a slot of its own.
        if self.limits.max_fields < 2 {
            return Err(invalid(
                "limits.max_fields",
                self.limits.max_fields,
                "max_fields must leave room for at least one field",
            ));
        }

        if self.limits.max_field_value_len == 0 {
            return Err(invalid(
                "limits.max_field_value_len",
                self.limits.max_field_value_len,
                "max_field_value_len must be greater than 0",
            ));
        }

        if self.limits.page_size == 0 {
            return Err(invalid(
                "limits.page_size",
                self.limits.page_size,
                "page_size must be greater than 0",
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier,
                "backoff_multiplier must be at least 1.0",
            ));
        }

        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(invalid(
                "retry.initial_backoff",
                format!("{:?}", self.retry.initial_backoff),
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if self.rate_limit.global_per_second == 0 || self.rate_limit.per_container_per_second == 0
        {
            return Err(invalid(
                "rate_limit",
                format!(
                    "{}/{}",
                    self.rate_limit.global_per_second, self.rate_limit.per_container_per_second
                ),
                "rates must be greater than 0",
            ));
        }

        if self.rate_limit.max_in_flight == 0 {
            return Err(invalid(
                "rate_limit.max_in_flight",
                self.rate_limit.max_in_flight,
                "max_in_flight must be greater than 0",
            ));
        }

        if self.call_timeout.is_zero() {
            return Err(invalid(
                "call_timeout",
                format!("{:?}", self.call_timeout),
                "call_timeout must be positive",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
