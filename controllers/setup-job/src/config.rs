//! Controller configuration from environment variables

use crate::error::ControllerError;
use job_store::RetryPolicy;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for all namespaces
    pub namespace: Option<String>,
    /// Requeue interval after a successful pass
    pub resync_interval: Duration,
    /// Period of the TTL collector
    pub ttl_scan_interval: Duration,
    /// Timeout of a single store call
    pub store_timeout: Duration,
    /// Attempts per store call, including the first
    pub store_max_retries: u32,
    /// Reconciliations running in parallel
    pub concurrency: u16,
    /// Quiet period before a triggered reconcile starts
    pub debounce: Duration,
    /// Minimum age of the stored probe time before a probe-only write
    pub probe_refresh: Duration,
    /// Bind address of the metrics and health server
    pub metrics_addr: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_interval: Duration::from_secs(30),
            ttl_scan_interval: Duration::from_secs(15),
            store_timeout: Duration::from_secs(10),
            store_max_retries: 5,
            concurrency: 4,
            debounce: Duration::from_secs(1),
            probe_refresh: Duration::from_secs(60),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration, ControllerError> {
    let secs: u64 = parse(lookup, key, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}

impl ControllerConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::InvalidConfig` if a variable is set to a value
    /// that does not parse.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which returns the raw value
    /// of a variable or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::InvalidConfig` for unparsable or out of range values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let config = Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            resync_interval: parse_secs(&lookup, "RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            ttl_scan_interval: parse_secs(&lookup, "TTL_SCAN_INTERVAL_SECS", defaults.ttl_scan_interval)?,
            store_timeout: parse_secs(&lookup, "STORE_TIMEOUT_SECS", defaults.store_timeout)?,
            store_max_retries: parse(&lookup, "STORE_MAX_RETRIES", defaults.store_max_retries)?,
            concurrency: parse(&lookup, "CONCURRENCY", defaults.concurrency)?,
            debounce: parse_secs(&lookup, "DEBOUNCE_SECS", defaults.debounce)?,
            probe_refresh: parse_secs(&lookup, "PROBE_REFRESH_SECS", defaults.probe_refresh)?,
            metrics_addr: parse(&lookup, "METRICS_ADDR", defaults.metrics_addr)?,
        };

        if config.ttl_scan_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "TTL_SCAN_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if config.resync_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "RESYNC_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if config.store_timeout.is_zero() || config.store_max_retries == 0 {
            return Err(ControllerError::InvalidConfig(
                "STORE_TIMEOUT_SECS and STORE_MAX_RETRIES must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    /// Retry policy for store calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            call_timeout: self.store_timeout,
            max_attempts: self.store_max_retries,
            ..RetryPolicy::default()
        }
    }
}
