//! Server settings read from `HUFFD_*` environment variables, optionally
//! overridden from the command line. Both sources share the same checks.

use std::str::FromStr;
use std::time::Duration;

use crate::dispatcher::{DispatchConfig, TimeoutPolicy};
use crate::transport::ws::ServerConfig;

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub workers: usize,
    /// How long a connection waits for its job's terminal event.
    pub job_timeout: Duration,
    pub dispatch: DispatchConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            workers: default_workers(),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            dispatch: DispatchConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(host) = lookup("HUFFD_HOST") {
            settings.server.host = host;
        }
        if let Some(port) = parse::<u16, _>(&lookup, "HUFFD_PORT")? {
            settings.server.port = port;
        }
        if let Some(workers) = parse::<usize, _>(&lookup, "HUFFD_WORKERS")? {
            settings.workers = positive("HUFFD_WORKERS", workers)?;
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "HUFFD_JOB_TIMEOUT_SECS")? {
            settings.job_timeout = Duration::from_secs(positive("HUFFD_JOB_TIMEOUT_SECS", secs)?);
        }
        if let Some(count) = parse::<u8, _>(&lookup, "HUFFD_CHECKPOINTS")? {
            settings.dispatch.checkpoints = checkpoints("HUFFD_CHECKPOINTS", count)?;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "HUFFD_CHECKPOINT_DELAY_MS")? {
            settings.dispatch.checkpoint_delay = Duration::from_millis(ms);
        }
        if let Some(policy) = lookup("HUFFD_TIMEOUT_POLICY") {
            settings.dispatch.timeout_policy = policy.parse::<TimeoutPolicy>().map_err(|reason| {
                ConfigError::Invalid {
                    key: "HUFFD_TIMEOUT_POLICY",
                    value: policy.clone(),
                    reason,
                }
            })?;
        }

        Ok(settings)
    }

    /// Apply command-line flags on top of these settings.
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self, ConfigError> {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(workers) = overrides.workers {
            self.workers = positive("--workers", workers)?;
        }
        if let Some(secs) = overrides.job_timeout_secs {
            self.job_timeout = Duration::from_secs(positive("--job-timeout-secs", secs)?);
        }
        if let Some(count) = overrides.checkpoints {
            self.dispatch.checkpoints = checkpoints("--checkpoints", count)?;
        }
        if let Some(policy) = overrides.timeout_policy {
            self.dispatch.timeout_policy = policy;
        }
        self.server.await_explicit_shutdown |= overrides.await_explicit_shutdown;
        Ok(self)
    }
}

/// Command-line values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    pub checkpoints: Option<u8>,
    pub timeout_policy: Option<TimeoutPolicy>,
    pub await_explicit_shutdown: bool,
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

fn positive<T>(key: &'static str, value: T) -> Result<T, ConfigError>
where
    T: Copy + Default + PartialEq + std::fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Checkpoint counts must divide 100 so percentages are evenly spaced.
fn checkpoints(key: &'static str, count: u8) -> Result<u8, ConfigError> {
    if count == 0 || count > 100 || 100 % count != 0 {
        return Err(ConfigError::Invalid {
            key,
            value: count.to_string(),
            reason: "must be a divisor of 100".to_string(),
        });
    }
    Ok(count)
}
