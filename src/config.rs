//! Configuration surface.
//!
//! Every component also has its own builder; [`Settings`] is the flat,
//! deserializable form used to wire them together from a file or the environment.

use serde::Deserialize;
use std::time::Duration;

/// Provider calls per resolution.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Lifetime of a cached percentage.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
/// Requests admitted per client per window.
pub const DEFAULT_QUOTA: u32 = 3;
/// Admission window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Upper bound on a single provider call.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Pending history records held before new ones are dropped.
pub const DEFAULT_HISTORY_QUEUE: usize = 1024;

/// Prefix of the environment variables read by [`Settings::from_env`].
pub const ENV_PREFIX: &str = "SURCHARGE_";

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The variable is set but is not a number, or does not fit its field.
    #[error("{key}: cannot parse {value:?} as a non-negative integer")]
    Invalid { key: String, value: String },
    /// The field must be positive.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Flat configuration for the whole stack.
///
/// Missing fields take their `DEFAULT_*` value when deserialized. Call
/// [`validate`](Self::validate) (the `from_*` constructors do) before use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider calls per resolution.
    pub max_attempts: usize,
    /// Cached percentage lifetime, in minutes.
    pub cache_ttl_minutes: u64,
    /// Requests admitted per client per window.
    pub rate_limit_quota: u32,
    /// Admission window length, in seconds.
    pub rate_limit_window_secs: u64,
    /// Per-attempt provider timeout; `0` disables it.
    pub attempt_timeout_ms: u64,
    /// Bound of the history queue.
    pub history_queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cache_ttl_minutes: DEFAULT_CACHE_TTL.as_secs() / 60,
            rate_limit_quota: DEFAULT_QUOTA,
            rate_limit_window_secs: DEFAULT_WINDOW.as_secs(),
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64,
            history_queue_capacity: DEFAULT_HISTORY_QUEUE,
        }
    }
}

impl Settings {
    /// Defaults overlaid with `SURCHARGE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each
    /// `SURCHARGE_<FIELD>` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(v) = read(&lookup, "MAX_ATTEMPTS")? {
            settings.max_attempts = narrow("MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = read(&lookup, "CACHE_TTL_MINUTES")? {
            settings.cache_ttl_minutes = v;
        }
        if let Some(v) = read(&lookup, "RATE_LIMIT_QUOTA")? {
            settings.rate_limit_quota = narrow("RATE_LIMIT_QUOTA", v)?;
        }
        if let Some(v) = read(&lookup, "RATE_LIMIT_WINDOW_SECS")? {
            settings.rate_limit_window_secs = v;
        }
        if let Some(v) = read(&lookup, "ATTEMPT_TIMEOUT_MS")? {
            settings.attempt_timeout_ms = v;
        }
        if let Some(v) = read(&lookup, "HISTORY_QUEUE_CAPACITY")? {
            settings.history_queue_capacity = narrow("HISTORY_QUEUE_CAPACITY", v)?;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Reject zero values for every field that must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("max_attempts"));
        }
        if self.cache_ttl_minutes == 0 {
            return Err(ConfigError::Zero("cache_ttl_minutes"));
        }
        if self.rate_limit_quota == 0 {
            return Err(ConfigError::Zero("rate_limit_quota"));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(ConfigError::Zero("rate_limit_window_secs"));
        }
        if self.history_queue_capacity == 0 {
            return Err(ConfigError::Zero("history_queue_capacity"));
        }
        Ok(())
    }

    /// Cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60))
    }

    /// Admission window as a [`Duration`].
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Per-attempt timeout, or `None` when disabled.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then(|| Duration::from_millis(self.attempt_timeout_ms))
    }
}

fn read<F>(lookup: &F, field: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{field}");
    match lookup(&key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// Fit a parsed value into the field's type, rejecting it if it does not fit.
fn narrow<T: TryFrom<u64>>(field: &str, value: u64) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::Invalid {
        key: format!("{ENV_PREFIX}{field}"),
        value: value.to_string(),
    })
}
