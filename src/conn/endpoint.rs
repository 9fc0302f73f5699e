//! Backend endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single backend node by address
//! - Track the active lease count and enforce the per-endpoint lease limit
//! - Track health state and when it was last observed

use serde::Serialize;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::conn::state::ConnState;

/// The only thing selection needs from a connection.
pub trait Conn: Send + Sync + Debug {
    /// Address used for logging and lookups.
    fn address(&self) -> &str;

    /// Current state.
    fn state(&self) -> ConnState;
}

/// A single backend node known to the pool.
#[derive(Debug)]
pub struct Endpoint {
    /// `host:port` of the node.
    pub address: String,
    /// Maximum concurrent leases allowed.
    pub max_leases: usize,
    /// Number of currently active leases.
    pub active_leases: AtomicUsize,

    state: AtomicU8,
    /// Milliseconds since the Unix epoch; 0 = never observed.
    last_observed_ms: AtomicU64,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

/// Serializable point-in-time view of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    pub address: String,
    pub state: ConnState,
    pub active_leases: usize,
    pub last_observed_ms: Option<u64>,
}

impl Endpoint {
    /// Create a new endpoint in the `Created` state.
    pub fn new(address: impl Into<String>, max_leases: usize) -> Self {
        Self {
            address: address.into(),
            max_leases,
            active_leases: AtomicUsize::new(0),
            state: AtomicU8::new(ConnState::Created as u8),
            last_observed_ms: AtomicU64::new(0),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    /// Get the current number of active leases.
    pub fn active_leases(&self) -> usize {
        self.active_leases.load(Ordering::Relaxed)
    }

    /// When this endpoint last changed state or reported an outcome.
    pub fn last_observed(&self) -> Option<SystemTime> {
        match self.last_observed_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    /// Force a state, returning the previous one.
    pub fn set_state(&self, state: ConnState) -> ConnState {
        let prev = ConnState::from(self.state.swap(state as u8, Ordering::Relaxed));
        self.touch();
        if prev != state {
            tracing::debug!(address = %self.address, from = %prev, to = %state, "Endpoint state changed");
            crate::observability::metrics::record_conn_state(state);
        }
        prev
    }

    /// Ban the endpoint. Returns true if it was not banned already.
    pub fn ban(&self) -> bool {
        self.transition(|s| match s {
            ConnState::Banned | ConnState::Destroyed => None,
            _ => Some(ConnState::Banned),
        })
        .is_some()
    }

    /// Give a banned endpoint another chance as `Offline`.
    pub fn unban(&self) -> bool {
        self.transition(|s| (s == ConnState::Banned).then_some(ConnState::Offline))
            .is_some()
    }

    // --- Health Logic ---

    /// Report a successful outcome.
    pub fn mark_success(&self, healthy_threshold: usize) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.touch();

        let current = ConnState::from(self.state.load(Ordering::Relaxed));
        if matches!(current, ConnState::Online | ConnState::Destroyed) {
            return;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.transition(|s| (s != ConnState::Destroyed).then_some(ConnState::Online));
        }
    }

    /// Report a failed outcome.
    pub fn mark_failure(&self, unhealthy_threshold: usize) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.touch();

        let current = ConnState::from(self.state.load(Ordering::Relaxed));
        if matches!(
            current,
            ConnState::Offline | ConnState::Banned | ConnState::Destroyed
        ) {
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.transition(|s| {
                matches!(s, ConnState::Created | ConnState::Online).then_some(ConnState::Offline)
            });
        }
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            address: self.address.clone(),
            state: self.state(),
            active_leases: self.active_leases(),
            last_observed_ms: match self.last_observed_ms.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            },
        }
    }

    /// Claim a lease slot unless the endpoint is at capacity.
    pub(crate) fn try_acquire_lease(&self) -> bool {
        let mut prev = self.active_leases.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_leases {
                return false;
            }
            match self.active_leases.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => prev = x,
            }
        }
    }

    pub(crate) fn release_lease(&self) {
        self.active_leases.fetch_sub(1, Ordering::Relaxed);
    }

    /// Apply `f` atomically; returns the new state if it changed.
    fn transition(&self, f: impl Fn(ConnState) -> Option<ConnState>) -> Option<ConnState> {
        let mut next = None;
        let result = self
            .state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |raw| {
                next = f(ConnState::from(raw));
                next.map(|s| s as u8)
            });
        let prev = ConnState::from(result.ok()?);
        let next = next?;
        self.touch();
        tracing::debug!(address = %self.address, from = %prev, to = %next, "Endpoint state changed");
        crate::observability::metrics::record_conn_state(next);
        Some(next)
    }

    fn touch(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_observed_ms.store(now.max(1), Ordering::Relaxed);
    }
}

impl Conn for Endpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> ConnState {
        ConnState::from(self.state.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_endpoint_is_created_and_unobserved() {
        let e = Endpoint::new("10.0.0.1:2135", 4);
        assert_eq!(e.state(), ConnState::Created);
        assert!(e.last_observed().is_none());
        assert_eq!(e.active_leases(), 0);
    }

    #[test]
    fn test_health_transitions() {
        let e = Endpoint::new("10.0.0.1:2135", 4);

        e.mark_failure(2);
        assert_eq!(e.state(), ConnState::Created);
        e.mark_failure(2);
        assert_eq!(e.state(), ConnState::Offline);
        assert!(e.last_observed().is_some());

        e.mark_success(2);
        assert_eq!(e.state(), ConnState::Offline);
        e.mark_success(2);
        assert_eq!(e.state(), ConnState::Online);
    }

    #[test]
    fn test_ban_and_unban() {
        let e = Endpoint::new("10.0.0.1:2135", 4);
        assert!(e.ban());
        assert!(!e.ban());
        assert_eq!(e.state(), ConnState::Banned);

        // failures do not move a banned endpoint
        e.mark_failure(1);
        assert_eq!(e.state(), ConnState::Banned);

        assert!(e.unban());
        assert_eq!(e.state(), ConnState::Offline);
        assert!(!e.unban());
    }

    #[test]
    fn test_destroyed_is_terminal_for_health_signals() {
        let e = Endpoint::new("10.0.0.1:2135", 4);
        e.set_state(ConnState::Destroyed);
        e.mark_success(1);
        assert!(!e.ban());
        assert_eq!(e.state(), ConnState::Destroyed);
    }

    #[test]
    fn test_lease_limit() {
        let e = Endpoint::new("10.0.0.1:2135", 2);
        assert!(e.try_acquire_lease());
        assert!(e.try_acquire_lease());
        assert!(!e.try_acquire_lease());
        e.release_lease();
        assert!(e.try_acquire_lease());
        assert_eq!(e.active_leases(), 2);
    }
}
