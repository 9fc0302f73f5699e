//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the driver.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::load_balancer::BalancerKind;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::retries::RetryOption;

/// Root configuration for a driver.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DriverConfig {
    /// Seed endpoints (`host:port` or `scheme://host:port`).
    pub endpoints: Vec<String>,

    /// Load balancing settings.
    pub balancer: BalancerConfig,

    /// Retry configuration.
    pub retry: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Endpoint pool settings.
    pub pool: PoolConfig,

    /// Endpoint discovery settings.
    pub discovery: DiscoveryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl DriverConfig {
    /// Retry options equivalent to the `retry` and `timeouts` sections.
    pub fn retry_options(&self) -> Vec<RetryOption> {
        let retry = &self.retry;
        let mut options = vec![
            RetryOption::Idempotent(retry.idempotent),
            RetryOption::FastBackoff(BackoffPolicy {
                base: Duration::from_millis(retry.fast_base_ms),
                max: Duration::from_millis(retry.fast_max_ms),
                jitter: retry.jitter,
            }),
            RetryOption::SlowBackoff(BackoffPolicy {
                base: Duration::from_millis(retry.slow_base_ms),
                max: Duration::from_millis(retry.slow_max_ms),
                jitter: retry.jitter,
            }),
        ];

        options.push(match retry.max_attempts {
            0 => RetryOption::Unbounded,
            n => RetryOption::MaxAttempts(n),
        });
        if let Some(t) = self.timeouts.operation_timeout() {
            options.push(RetryOption::OperationTimeout(t));
        }
        if let Some(t) = self.timeouts.cancel_after() {
            options.push(RetryOption::CancelAfter(t));
        }
        options
    }
}

/// Balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Selection algorithm.
    pub algorithm: BalancerKind,

    /// Fall back to banned endpoints when nothing else is usable.
    pub accept_banned: bool,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per call. 0 means unbounded.
    pub max_attempts: u32,

    /// Treat operations as idempotent unless overridden per call.
    pub idempotent: bool,

    /// Fast backoff base delay in milliseconds.
    pub fast_base_ms: u64,

    /// Fast backoff cap in milliseconds.
    pub fast_max_ms: u64,

    /// Slow backoff base delay in milliseconds.
    pub slow_base_ms: u64,

    /// Slow backoff cap in milliseconds.
    pub slow_max_ms: u64,

    /// Randomized fraction of each backoff window.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            idempotent: false,
            fast_base_ms: 5,
            fast_max_ms: 320,
            slow_base_ms: 1_000,
            slow_max_ms: 64_000,
            jitter: 0.5,
        }
    }
}

/// Timeout configuration. Zero disables a timeout.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for all attempts of one call, in milliseconds.
    pub operation_timeout_ms: u64,

    /// Time for a single attempt, in milliseconds.
    pub operation_cancel_after_ms: u64,
}

impl TimeoutConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.operation_timeout_ms)
    }

    pub fn cancel_after(&self) -> Option<Duration> {
        non_zero_ms(self.operation_cancel_after_ms)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Endpoint pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrent leases allowed per endpoint.
    pub max_leases_per_endpoint: usize,

    /// Successes needed to bring an offline endpoint back online.
    pub healthy_threshold: u32,

    /// Failures needed to take an online endpoint offline.
    pub unhealthy_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_leases_per_endpoint: 100,
            healthy_threshold: 1,
            unhealthy_threshold: 3,
        }
    }
}

/// Discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Run the background discovery worker.
    pub enabled: bool,

    /// Refresh interval in seconds.
    pub interval_secs: u64,

    /// Timeout for one discovery round in seconds.
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter (trace, debug, info, warn, error, or an env-filter directive).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: DriverConfig = toml::from_str(r#"endpoints = ["localhost:2135"]"#).unwrap();
        assert_eq!(config.balancer.algorithm, BalancerKind::RoundRobin);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.pool.healthy_threshold, 1);
        assert!(config.timeouts.operation_timeout().is_none());
    }

    #[test]
    fn test_retry_options_mapping() {
        let mut config = DriverConfig::default();
        config.retry.max_attempts = 0;
        config.timeouts.operation_timeout_ms = 1_500;

        let options = config.retry_options();
        assert!(options.iter().any(|o| matches!(o, RetryOption::Unbounded)));
        assert!(options.iter().any(
            |o| matches!(o, RetryOption::OperationTimeout(t) if *t == Duration::from_millis(1_500))
        ));
        assert!(!options.iter().any(|o| matches!(o, RetryOption::CancelAfter(_))));
    }
}
