//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::resilience::classify::BackoffClass;

/// One backoff tier: exponential growth from `base`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of each window that is randomized, in `[0, 1]`.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub const FAST: BackoffPolicy = BackoffPolicy {
        base: Duration::from_millis(5),
        max: Duration::from_millis(320),
        jitter: 0.5,
    };

    pub const SLOW: BackoffPolicy = BackoffPolicy {
        base: Duration::from_secs(1),
        max: Duration::from_secs(64),
        jitter: 0.5,
    };

    /// Upper bound of the delay window for `attempt` (1-based).
    pub fn window(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential_base = 2u32.saturating_pow(attempt - 1);
        self.base.saturating_mul(exponential_base).min(self.max)
    }

    /// Lower bound of the delay window for `attempt`.
    pub fn min_delay(&self, attempt: u32) -> Duration {
        let window = as_nanos(self.window(attempt));
        Duration::from_nanos(window - self.jitter_range(window).min(window))
    }

    fn jitter_range(&self, window_nanos: u64) -> u64 {
        (window_nanos as f64 * self.jitter.clamp(0.0, 1.0)) as u64
    }
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Calculate the jittered backoff delay for `attempt` under `policy`.
///
/// The delay is uniform in `[window * (1 - jitter), window]`.
pub fn calculate_backoff(attempt: u32, policy: &BackoffPolicy) -> Duration {
    let window = as_nanos(policy.window(attempt));
    let jitter_range = policy.jitter_range(window).min(window);
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };

    Duration::from_nanos(window - jitter)
}

/// Fast and slow tiers together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub fast: BackoffPolicy,
    pub slow: BackoffPolicy,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            fast: BackoffPolicy::FAST,
            slow: BackoffPolicy::SLOW,
        }
    }
}

impl Backoff {
    pub fn policy(&self, class: BackoffClass) -> Option<&BackoffPolicy> {
        match class {
            BackoffClass::None => None,
            BackoffClass::Fast => Some(&self.fast),
            BackoffClass::Slow => Some(&self.slow),
        }
    }

    /// Jittered delay before the attempt following failed `attempt`.
    pub fn delay(&self, class: BackoffClass, attempt: u32) -> Duration {
        self.policy(class)
            .map_or(Duration::ZERO, |policy| calculate_backoff(attempt, policy))
    }

    pub fn min_delay(&self, class: BackoffClass, attempt: u32) -> Duration {
        self.policy(class)
            .map_or(Duration::ZERO, |policy| policy.min_delay(attempt))
    }
}
