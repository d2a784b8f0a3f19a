//! Operator configuration from command-line flags and environment

use std::time::Duration;

use clap::Parser;

use crate::{Error, Result};

/// Command-line and environment configuration
#[derive(Clone, Debug, Parser)]
#[command(name = "greeting-operator", version, about = "Reconciles GreetingService resources")]
pub struct OperatorConfig {
    /// Port for the metrics and health endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Restrict watches to one namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Maximum number of reconciles running at once
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 4)]
    pub max_concurrent_reconciles: usize,

    /// Safety-net re-check interval after a successful reconcile, in seconds
    #[arg(long, env = "REQUEUE_INTERVAL_SECS", default_value_t = 300)]
    pub requeue_interval_secs: u64,

    /// First retry delay after a transient failure, in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value_t = 500)]
    pub retry_base_delay_ms: u64,

    /// Upper bound for the retry delay, in seconds
    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value_t = 60)]
    pub retry_max_delay_secs: u64,

    /// Retry interval for specs that failed validation, in seconds
    #[arg(long, env = "INVALID_SPEC_RETRY_SECS", default_value_t = 300)]
    pub invalid_spec_retry_secs: u64,

    /// Timeout for a single reconcile, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    pub reconcile_timeout_secs: u64,

    /// Time allowed for in-flight reconciles on shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

impl OperatorConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::Config(
                "max-concurrent-reconciles must be >= 1".to_string(),
            ));
        }
        if self.reconcile_timeout_secs == 0 {
            return Err(Error::Config("reconcile-timeout-secs must be >= 1".to_string()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_secs.saturating_mul(1000) {
            return Err(Error::Config(
                "retry-base-delay-ms must not exceed retry-max-delay-secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Timing and concurrency settings for the controller
    pub fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_secs(self.retry_max_delay_secs),
            invalid_spec_retry: Duration::from_secs(self.invalid_spec_retry_secs),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

/// Timing and concurrency settings shared by the dispatcher and reconcile core
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    pub max_concurrent_reconciles: usize,
    pub requeue_interval: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub invalid_spec_retry: Duration,
    pub reconcile_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
            requeue_interval: Duration::from_secs(300),
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(60),
            invalid_spec_retry: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_settings_default() {
        let config = OperatorConfig::parse_from(["greeting-operator"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.settings(), ControllerSettings::default());
        assert_eq!(config.metrics_port, 8080);
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn flags_override_defaults() {
        let config = OperatorConfig::parse_from([
            "greeting-operator",
            "--namespace",
            "demo",
            "--max-concurrent-reconciles",
            "8",
            "--requeue-interval-secs",
            "60",
        ]);
        assert_eq!(config.namespace.as_deref(), Some("demo"));
        let settings = config.settings();
        assert_eq!(settings.max_concurrent_reconciles, 8);
        assert_eq!(settings.requeue_interval, Duration::from_secs(60));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config =
            OperatorConfig::parse_from(["greeting-operator", "--max-concurrent-reconciles", "0"]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
