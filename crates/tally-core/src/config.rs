//! Engine configuration.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workers must be > 0")]
    NoWorkers,

    #[error("queue capacity must be > 0")]
    ZeroCapacity,

    #[error("admission backlog must be > 0")]
    ZeroBacklog,

    #[error("max poll attempts must be > 0")]
    ZeroPollAttempts,

    #[error("base backoff {base:?} exceeds max backoff {max:?}")]
    InvertedBackoff { base: Duration, max: Duration },

    #[error("invalid value for {var}: {value}")]
    BadEnvValue { var: &'static str, value: String },
}

/// Tunables for the accrual engine.
///
/// Misconfiguration is fatal at construction, never handled at runtime:
/// [`AccrualEngine::new`](crate::engine::AccrualEngine::new) runs
/// [`validate`](Self::validate) before anything is spawned.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub workers: usize,

    /// Capacity of the dedup queue.
    pub queue_capacity: usize,

    /// Capacity of the deferred-admission channel feeding the redelivery
    /// worker. Overflow falls through to the reconciliation sweep.
    pub admission_backlog: usize,

    /// First backoff delay.
    pub base_backoff: Duration,

    /// Backoff ceiling.
    pub max_backoff: Duration,

    /// Result-poll budget per submission cycle.
    pub max_poll_attempts: u32,

    /// Reconciliation sweep period.
    pub sweep_interval: Duration,

    /// Per-request timeout for accrual service calls.
    pub request_timeout: Duration,

    /// How long `stop()` waits for each spawned task before giving up on it.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 100,
            admission_backlog: 256,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_poll_attempts: 5,
            sweep_interval: Duration::from_secs(20),
            request_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.admission_backlog == 0 {
            return Err(ConfigError::ZeroBacklog);
        }
        if self.max_poll_attempts == 0 {
            return Err(ConfigError::ZeroPollAttempts);
        }
        if self.base_backoff > self.max_backoff {
            return Err(ConfigError::InvertedBackoff {
                base: self.base_backoff,
                max: self.max_backoff,
            });
        }
        Ok(())
    }

    /// Defaults overridden by `TALLY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(workers) = read_env("TALLY_WORKERS")? {
            config.workers = workers;
        }
        if let Some(capacity) = read_env("TALLY_QUEUE_CAPACITY")? {
            config.queue_capacity = capacity;
        }
        if let Some(backlog) = read_env("TALLY_ADMISSION_BACKLOG")? {
            config.admission_backlog = backlog;
        }
        if let Some(secs) = read_env("TALLY_BASE_BACKOFF_SECS")? {
            config.base_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env("TALLY_MAX_BACKOFF_SECS")? {
            config.max_backoff = Duration::from_secs(secs);
        }
        if let Some(attempts) = read_env("TALLY_MAX_POLL_ATTEMPTS")? {
            config.max_poll_attempts = attempts;
        }
        if let Some(secs) = read_env("TALLY_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env("TALLY_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn read_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadEnvValue { var, value }),
        Err(_) => Ok(None),
    }
}
