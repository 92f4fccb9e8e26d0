//! Configuration types for chunk-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration
///
/// Every section has sensible defaults, so an empty document deserializes
/// into a usable configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-batch retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Sequential pipe settings
    #[serde(default)]
    pub pipe: PipeConfig,
}

impl Config {
    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

/// Concurrent engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers (default: 4)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Delay inserted between two worker launches (default: 250 ms)
    #[serde(default = "default_stagger_delay", with = "millis_serde")]
    pub stagger_delay: Duration,

    /// Upper bound on the time workers may take once launched (default: 1 hour)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            stagger_delay: default_stagger_delay(),
            timeout: default_timeout(),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::config("engine.threads", "at least one worker is required"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("engine.timeout", "timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Retry configuration for a single batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry policy with no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "multiplier must be a finite value >= 1.0",
            ));
        }
        Ok(())
    }
}

/// HTTP transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout (default: 5 minutes)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Bearer token sent as `Authorization` header
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            auth_token: None,
        }
    }
}

/// Sequential pipe configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Keep going past non-auth failures (default: false)
    #[serde(default)]
    pub aggressive: bool,
}

fn default_threads() -> usize {
    4
}

fn default_stagger_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("chunk-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
