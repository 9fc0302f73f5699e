//! Retry budget: the time and attempt allowance for one retry loop.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::resilience::errors::BudgetReason;

/// Allowance fixed when a retry loop starts.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Option<Instant>,
    max_attempts: Option<u32>,
}

impl Budget {
    /// Start a budget now. `None` means no limit on that axis.
    pub fn start(timeout: Option<Duration>, max_attempts: Option<u32>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            max_attempts,
        }
    }

    pub fn unlimited() -> Self {
        Self::start(None, None)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether another attempt may start.
    pub fn check(&self, token: &CancellationToken) -> Result<(), BudgetReason> {
        if token.is_cancelled() {
            return Err(BudgetReason::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(BudgetReason::DeadlineExceeded);
        }
        Ok(())
    }

    /// Completes when the deadline passes; never completes without one.
    pub async fn wait_deadline(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    pub fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
