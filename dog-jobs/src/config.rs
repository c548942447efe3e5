use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{backend::durable::DEFAULT_KEY_PREFIX, QueueError, QueueResult};

/// Default connection endpoint for the durable backend
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Which storage backend the queue runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Process-local, volatile
    InMemory,

    /// Networked ordered-index store
    Durable {
        /// Connection endpoint
        url: String,
        /// Namespace for every key the queue writes
        key_prefix: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::InMemory
    }
}

/// Configuration for the queue adapter and its workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: BackendConfig,

    /// Worker sleep when the queue is empty
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// Worker sleep after a backend error
    #[serde(with = "millis")]
    pub error_backoff: Duration,

    /// How long `stop` waits for an in-flight job
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,

    /// `max_retries` for jobs submitted through `QueueAdapter::enqueue`
    pub default_max_retries: u32,

    /// Attempts at persisting a job outcome before the worker gives up on it
    pub persist_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::InMemory,
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
            default_max_retries: crate::types::record::DEFAULT_MAX_RETRIES,
            persist_attempts: 3,
        }
    }
}

impl QueueConfig {
    /// Read configuration from `QUEUE_*` environment variables, falling back to defaults
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("QUEUE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") | Some("in_memory") => BackendConfig::InMemory,
            Some("durable") | Some("redis") => BackendConfig::Durable {
                url: lookup("QUEUE_REDIS_URL")
                    .or_else(|| lookup("REDIS_URL"))
                    .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
                key_prefix: lookup("QUEUE_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            },
            Some(other) => {
                return Err(QueueError::Config(format!("Unknown queue backend: {}", other)));
            }
        };

        let poll_ms = parse_or(&lookup, "QUEUE_POLL_INTERVAL_MS", defaults.poll_interval.as_millis() as u64)?;
        let backoff_ms = parse_or(&lookup, "QUEUE_ERROR_BACKOFF_MS", defaults.error_backoff.as_millis() as u64)?;
        let shutdown_secs = parse_or(&lookup, "QUEUE_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout.as_secs())?;

        Ok(Self {
            backend,
            poll_interval: Duration::from_millis(poll_ms),
            error_backoff: Duration::from_millis(backoff_ms),
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            default_max_retries: parse_or(&lookup, "QUEUE_DEFAULT_MAX_RETRIES", defaults.default_max_retries)?,
            persist_attempts: parse_or(&lookup, "QUEUE_PERSIST_ATTEMPTS", defaults.persist_attempts)?.max(1),
        })
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> QueueResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| QueueError::Config(format!("Invalid value for {}: {}", key, raw))),
        _ => Ok(default),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
