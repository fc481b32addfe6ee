//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use forum_core::{EventClass, PersistencePolicy, PolicyTable};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub filter: FilterConfig,
    pub drain: DrainConfig,
    pub timeouts: TimeoutConfig,
    pub policies: PolicyTable,
    pub snowflake: SnowflakeConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
    /// Prepended to every key the fast store touches
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Membership filter sizing
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    /// Treat an unreachable filter as "definitely absent" instead of failing the request
    #[serde(default)]
    pub degrade_on_unavailable: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            error_rate: default_error_rate(),
            capacity: default_capacity(),
            degrade_on_unavailable: false,
        }
    }
}

/// Batched event drain tuning
#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
    #[serde(default = "default_overflow_log")]
    pub overflow_log: PathBuf,
}

impl DrainConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_wait_ms: default_max_wait_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            dead_letter_capacity: default_dead_letter_capacity(),
            overflow_log: default_overflow_log(),
        }
    }
}

/// Per-store call timeouts, in milliseconds
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_relational_timeout_ms")]
    pub relational_ms: u64,
    #[serde(default = "default_fast_timeout_ms")]
    pub fast_ms: u64,
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            relational_ms: default_relational_timeout_ms(),
            fast_ms: default_fast_timeout_ms(),
            queue_ms: default_queue_timeout_ms(),
        }
    }
}

/// Snowflake ID generator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeConfig {
    #[serde(default)]
    pub worker_id: u16,
}

// Default value functions
fn default_app_name() -> String {
    "forum-core".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_redis_max_connections() -> u32 {
    10
}

fn default_key_prefix() -> String {
    "bluebell:".to_string()
}

fn default_error_rate() -> f64 {
    0.01
}

fn default_capacity() -> u64 {
    10_000
}

fn default_max_batch_size() -> usize {
    100
}

fn default_max_wait_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_dead_letter_capacity() -> usize {
    64
}

fn default_overflow_log() -> PathBuf {
    PathBuf::from("./dead_letters.jsonl")
}

fn default_relational_timeout_ms() -> u64 {
    2_000
}

fn default_fast_timeout_ms() -> u64 {
    500
}

fn default_queue_timeout_ms() -> u64 {
    1_000
}

/// Read an optional variable, falling back to `default` when unset.
/// A set but unparsable value is an error rather than a silent default.
fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        None => Ok(default),
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or(ConfigError::MissingVar(name))
}

fn policy_var(class: EventClass) -> &'static str {
    match class {
        EventClass::PostVote => "POLICY_POST_VOTE",
        EventClass::CommentVote => "POLICY_COMMENT_VOTE",
        EventClass::Collection => "POLICY_COLLECTION",
        EventClass::Follow => "POLICY_FOLLOW",
        EventClass::Click => "POLICY_CLICK",
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = match lookup("APP_ENV").map(|s| s.to_lowercase()).as_deref() {
            Some("production") => Environment::Production,
            Some("staging") => Environment::Staging,
            Some("development") | None => Environment::Development,
            Some(other) => return Err(ConfigError::InvalidValue("APP_ENV", other.to_string())),
        };

        let mut policies = PolicyTable::default();
        for class in EventClass::ALL {
            let name = policy_var(class);
            if let Some(raw) = lookup(name) {
                let policy = raw
                    .parse::<PersistencePolicy>()
                    .map_err(|_| ConfigError::InvalidValue(name, raw))?;
                policies = policies.with(class, policy);
            }
        }

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env,
            },
            database: DatabaseConfig {
                url: required(&lookup, "DATABASE_URL")?,
                max_connections: parse_or(
                    &lookup,
                    "DATABASE_MAX_CONNECTIONS",
                    default_max_connections(),
                )?,
                min_connections: parse_or(
                    &lookup,
                    "DATABASE_MIN_CONNECTIONS",
                    default_min_connections(),
                )?,
            },
            redis: RedisConfig {
                url: required(&lookup, "REDIS_URL")?,
                max_connections: parse_or(
                    &lookup,
                    "REDIS_MAX_CONNECTIONS",
                    default_redis_max_connections(),
                )?,
                key_prefix: lookup("REDIS_KEY_PREFIX").unwrap_or_else(default_key_prefix),
            },
            filter: FilterConfig {
                error_rate: parse_or(&lookup, "FILTER_ERROR_RATE", default_error_rate())?,
                capacity: parse_or(&lookup, "FILTER_CAPACITY", default_capacity())?,
                degrade_on_unavailable: parse_or(
                    &lookup,
                    "FILTER_DEGRADE_ON_UNAVAILABLE",
                    false,
                )?,
            },
            drain: DrainConfig {
                max_batch_size: parse_or(
                    &lookup,
                    "DRAIN_MAX_BATCH_SIZE",
                    default_max_batch_size(),
                )?,
                max_wait_ms: parse_or(&lookup, "DRAIN_MAX_WAIT_MS", default_max_wait_ms())?,
                max_retries: parse_or(&lookup, "DRAIN_MAX_RETRIES", default_max_retries())?,
                retry_backoff_ms: parse_or(
                    &lookup,
                    "DRAIN_RETRY_BACKOFF_MS",
                    default_retry_backoff_ms(),
                )?,
                dead_letter_capacity: parse_or(
                    &lookup,
                    "DRAIN_DEAD_LETTER_CAPACITY",
                    default_dead_letter_capacity(),
                )?,
                overflow_log: lookup("DRAIN_OVERFLOW_LOG")
                    .map_or_else(default_overflow_log, PathBuf::from),
            },
            timeouts: TimeoutConfig {
                relational_ms: parse_or(
                    &lookup,
                    "STORE_TIMEOUT_RELATIONAL_MS",
                    default_relational_timeout_ms(),
                )?,
                fast_ms: parse_or(&lookup, "STORE_TIMEOUT_FAST_MS", default_fast_timeout_ms())?,
                queue_ms: parse_or(
                    &lookup,
                    "STORE_TIMEOUT_QUEUE_MS",
                    default_queue_timeout_ms(),
                )?,
            },
            policies,
            snowflake: SnowflakeConfig {
                worker_id: parse_or(&lookup, "WORKER_ID", 0)?,
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const BASE: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/forum"),
        ("REDIS_URL", "redis://localhost"),
    ];

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&BASE)).unwrap();
        assert_eq!(config.redis.key_prefix, "bluebell:");
        assert!((config.filter.error_rate - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.filter.capacity, 10_000);
        assert!(!config.filter.degrade_on_unavailable);
        assert_eq!(config.drain.max_retries, 3);
        assert_eq!(config.drain.retry_backoff(), Duration::from_millis(100));
        assert_eq!(config.policies, PolicyTable::default());
        assert_eq!(config.app.env, Environment::Development);
    }

    #[test]
    fn test_missing_required() {
        let err = AppConfig::from_lookup(lookup_from(&BASE[..1])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("REDIS_URL")));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let mut pairs = BASE.to_vec();
        pairs.push(("DRAIN_MAX_BATCH_SIZE", "lots"));
        let err = AppConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("DRAIN_MAX_BATCH_SIZE", _)));
    }

    #[test]
    fn test_policy_override() {
        let mut pairs = BASE.to_vec();
        pairs.push(("POLICY_POST_VOTE", "batched"));
        pairs.push(("POLICY_FOLLOW", "sync"));
        let config = AppConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(
            config.policies.policy_for(EventClass::PostVote),
            PersistencePolicy::BatchedAsync
        );
        assert_eq!(
            config.policies.policy_for(EventClass::Follow),
            PersistencePolicy::Synchronous
        );

        pairs.push(("POLICY_CLICK", "whenever"));
        assert!(AppConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn test_environment_is_production() {
        assert!(!Environment::Development.is_production());
        assert!(Environment::Production.is_production());
    }
}
