//! Metrics collection.
//!
//! # Responsibilities
//! - Define driver metrics (attempts, backoff, outcomes, endpoint states)
//! - Provide the default retry trace
//!
//! # Metrics
//! - `driver_retry_attempts_total` (counter): attempts started, by label
//! - `driver_retry_backoff_seconds` (histogram): sleeps between attempts
//! - `driver_retry_outcomes_total` (counter): final outcomes, by label and outcome
//! - `driver_conn_state_total` (counter): endpoint state transitions, by state
//! - `driver_no_connection_total` (counter): selections that found nothing usable
//! - `driver_leases_discarded_total` (counter): leases thrown away, by address
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; installing an exporter is
//!   the embedding application's job
//! - Metric updates never influence control flow

use std::time::Duration;

use crate::conn::ConnState;
use crate::resilience::errors::{OperationError, RetryError};
use crate::resilience::trace::RetryTrace;

pub fn record_attempt(label: &str) {
    metrics::counter!("driver_retry_attempts_total", "label" => label.to_string()).increment(1);
}

pub fn record_backoff(label: &str, delay: Duration) {
    metrics::histogram!("driver_retry_backoff_seconds", "label" => label.to_string())
        .record(delay.as_secs_f64());
}

pub fn record_outcome(label: &str, outcome: &'static str) {
    metrics::counter!(
        "driver_retry_outcomes_total",
        "label" => label.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_conn_state(state: ConnState) {
    metrics::counter!("driver_conn_state_total", "state" => state.as_str()).increment(1);
}

pub fn record_no_connection() {
    metrics::counter!("driver_no_connection_total").increment(1);
}

pub fn record_lease_discarded(address: &str) {
    metrics::counter!("driver_leases_discarded_total", "address" => address.to_string())
        .increment(1);
}

/// Default [`RetryTrace`]: records metrics and logs final outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTrace;

impl RetryTrace for MetricsTrace {
    fn on_attempt(&self, label: &str, _attempt: u32) {
        record_attempt(label);
    }

    fn on_backoff(&self, label: &str, _attempt: u32, delay: Duration, _error: &OperationError) {
        record_backoff(label, delay);
    }

    fn on_done(&self, label: &str, attempts: u32, error: Option<&RetryError>) {
        let outcome = error.map_or("success", RetryError::kind);
        record_outcome(label, outcome);
        if attempts > 1 {
            tracing::debug!(label = %label, attempts, outcome, "Retry loop finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::errors::StatusCode;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        let trace = MetricsTrace;
        trace.on_attempt("op", 1);
        trace.on_backoff(
            "op",
            1,
            Duration::from_millis(5),
            &OperationError::status(StatusCode::Overloaded, "busy"),
        );
        trace.on_done("op", 2, None);
        record_conn_state(ConnState::Banned);
        record_no_connection();
        record_lease_discarded("127.0.0.1:2135");
    }
}
