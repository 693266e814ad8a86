//! Worker configuration: JSON file first, environment overrides second.

use crate::queue::domain::{TaskDomainError, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the database connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Environment variable overriding the worker identity.
pub const ENV_WORKER_ID: &str = "TASKLOOM_WORKER_ID";
/// Environment variable for the idle poll interval in seconds.
pub const ENV_POLL_S: &str = "AIOP_POLL_S";
/// Environment variable for the lease duration in seconds.
pub const ENV_LOCK_S: &str = "AIOP_LOCK_S";
/// Environment variable for the lease renewal interval in seconds.
pub const ENV_RENEW_S: &str = "TASKLOOM_RENEW_S";
/// Environment variable for the heartbeat interval in seconds.
pub const ENV_HEARTBEAT_S: &str = "TASKLOOM_HEARTBEAT_S";
/// Environment variable for the claim batch size.
pub const ENV_BATCH: &str = "TASKLOOM_BATCH";
/// Environment variable for the connection pool size.
pub const ENV_POOL_SIZE: &str = "TASKLOOM_POOL_SIZE";

/// Errors raised while loading or validating worker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`WorkerConfig`].
    #[error("failed to parse worker config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable could not be parsed.
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
    },

    /// The assembled configuration violates a constraint.
    #[error("invalid worker config: {0}")]
    Invalid(String),

    /// No database URL was configured.
    #[error("{ENV_DATABASE_URL} is not set")]
    MissingDatabaseUrl,

    /// The worker identity is unusable.
    #[error(transparent)]
    WorkerId(#[from] TaskDomainError),
}

/// Settings of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// `PostgreSQL` connection string.
    pub database_url: Option<String>,
    /// Explicit worker identity; defaults to `<hostname>:<pid>`.
    pub worker_id: Option<String>,
    /// Idle wait between empty polls, in seconds.
    pub poll_s: u32,
    /// Lease duration, in seconds.
    pub lock_s: u32,
    /// Lease renewal interval, in seconds; defaults to a third of `lock_s`.
    pub renew_s: Option<u32>,
    /// Heartbeat interval, in seconds.
    pub heartbeat_s: u32,
    /// Tasks claimed (and run concurrently) per poll.
    pub batch: usize,
    /// Maximum database connections.
    pub pool_size: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            worker_id: None,
            poll_s: 1,
            lock_s: 60,
            renew_s: None,
            heartbeat_s: 10,
            batch: 1,
            pool_size: 4,
        }
    }
}

impl WorkerConfig {
    /// Parses a JSON document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown keys.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Loads the optional file at `path`, applies process environment
    /// overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the file cannot be read or parsed, an
    /// override is malformed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(file) => {
                let bytes = std::fs::read(file).map_err(|source| ConfigError::Read {
                    path: file.to_path_buf(),
                    source,
                })?;
                Self::from_json(&bytes)?
            }
            None => Self::default(),
        };
        let config = base.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides read through `lookup`, typically the process
    /// environment. Blank values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a numeric override does not
    /// parse.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = read(ENV_DATABASE_URL) {
            self.database_url = Some(url);
        }
        if let Some(id) = read(ENV_WORKER_ID) {
            self.worker_id = Some(id);
        }
        if let Some(raw) = read(ENV_POLL_S) {
            self.poll_s = parse_number(ENV_POLL_S, &raw)?;
        }
        if let Some(raw) = read(ENV_LOCK_S) {
            self.lock_s = parse_number(ENV_LOCK_S, &raw)?;
        }
        if let Some(raw) = read(ENV_RENEW_S) {
            self.renew_s = Some(parse_number(ENV_RENEW_S, &raw)?);
        }
        if let Some(raw) = read(ENV_HEARTBEAT_S) {
            self.heartbeat_s = parse_number(ENV_HEARTBEAT_S, &raw)?;
        }
        if let Some(raw) = read(ENV_BATCH) {
            self.batch = parse_number(ENV_BATCH, &raw)?;
        }
        if let Some(raw) = read(ENV_POOL_SIZE) {
            self.pool_size = parse_number(ENV_POOL_SIZE, &raw)?;
        }
        Ok(self)
    }

    /// Checks the interval relationships the runtime depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero intervals, a zero batch or
    /// pool, or a renewal interval not shorter than the lease.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("poll_s", self.poll_s),
            ("lock_s", self.lock_s),
            ("heartbeat_s", self.heartbeat_s),
            ("pool_size", self.pool_size),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be positive")));
        }
        if self.batch == 0 {
            return Err(ConfigError::Invalid("batch must be at least 1".to_owned()));
        }
        let renew_s = self.renew_s();
        if renew_s == 0 || renew_s >= self.lock_s {
            return Err(ConfigError::Invalid(format!(
                "renew_s ({renew_s}) must be positive and shorter than lock_s ({})",
                self.lock_s
            )));
        }
        Ok(())
    }

    /// Returns the configured database URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDatabaseUrl`] when none is set.
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    /// Resolves the worker identity, defaulting to `<hostname>:<pid>`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WorkerId`] when the explicit identity is blank
    /// or too long.
    pub fn worker_id(&self) -> Result<WorkerId, ConfigError> {
        let raw = self.worker_id.clone().unwrap_or_else(default_worker_id);
        Ok(WorkerId::new(raw)?)
    }

    /// Returns the effective renewal interval in seconds.
    #[must_use]
    pub fn renew_s(&self) -> u32 {
        self.renew_s
            .unwrap_or_else(|| self.lock_s.div_euclid(3).max(1))
    }

    /// Returns the idle poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_s))
    }

    /// Returns the lease duration.
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.lock_s))
    }

    /// Returns the lease renewal interval.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.renew_s()))
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat_s))
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_owned(),
    })
}

fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_owned());
    format!("{host}:{}", std::process::id())
}
