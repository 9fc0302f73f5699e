//! Per-driver settings and the options that layer them.

use crate::config::DriverConfig;
use crate::load_balancer::BalancerKind;
use crate::resilience::retries::{RetryOption, RetryOptions, RetryOptionsError};

/// One driver setting. Applied in order on top of the parent's settings.
#[derive(Clone)]
pub enum DriverOption {
    Balancer(BalancerKind),
    AcceptBanned(bool),
    Retry(RetryOption),
}

/// Effective settings of one driver in the facade tree.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub balancer: BalancerKind,
    pub accept_banned: bool,
    pub retry: RetryOptions,
}

impl DriverSettings {
    pub fn from_config(config: &DriverConfig) -> Result<Self, RetryOptionsError> {
        Ok(Self {
            balancer: config.balancer.algorithm,
            accept_banned: config.balancer.accept_banned,
            retry: RetryOptions::from_options(config.retry_options())?,
        })
    }

    /// Layer `options` on top of these settings.
    pub fn with_options(
        mut self,
        options: impl IntoIterator<Item = DriverOption>,
    ) -> Result<Self, RetryOptionsError> {
        let mut retry = Vec::new();
        for option in options {
            match option {
                DriverOption::Balancer(kind) => self.balancer = kind,
                DriverOption::AcceptBanned(v) => self.accept_banned = v,
                DriverOption::Retry(o) => retry.push(o),
            }
        }
        if !retry.is_empty() {
            self.retry = self.retry.with_options(retry)?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layering_keeps_unrelated_settings() {
        let mut config = DriverConfig::default();
        config.retry.max_attempts = 4;
        let base = DriverSettings::from_config(&config).unwrap();

        let child = base
            .clone()
            .with_options([
                DriverOption::Balancer(BalancerKind::LeastLoaded),
                DriverOption::Retry(RetryOption::Idempotent(true)),
            ])
            .unwrap();

        assert_eq!(child.balancer, BalancerKind::LeastLoaded);
        assert!(child.retry.idempotent);
        assert_eq!(child.retry.max_attempts, Some(4));
        assert_eq!(base.balancer, BalancerKind::RoundRobin);
    }

    #[test]
    fn test_invalid_retry_layer_is_rejected() {
        let base = DriverSettings::from_config(&DriverConfig::default()).unwrap();
        assert!(base
            .with_options([DriverOption::Retry(RetryOption::MaxAttempts(0))])
            .is_err());
    }
}
