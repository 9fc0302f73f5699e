//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Driver needs a connection
//!     → current BalancerSnapshot (rebuilt if the pool generation moved)
//!     → Balancer::next(token, NextOptions)
//!         - round_robin.rs (rotate through endpoints)
//!         - random_choice.rs (random start, scan forward)
//!         - least_conn.rs (fewest active leases)
//!     → is_usable() filters every candidate
//!     → Some(endpoint), or None after firing OnBadState once
//! ```
//!
//! # Design Decisions
//! - A balancer's connection set is frozen at construction; topology changes
//!   go through `create`, which starts from fresh selection state
//! - Selection state lives in atomics, so `next` is safe without a lock
//! - Banned endpoints are a last resort: picked only when opted in and when
//!   nothing else is usable
//! - Algorithm selection comes from configuration (`BalancerKind`)

pub mod least_conn;
pub mod random_choice;
pub mod round_robin;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::conn::{Conn, ConnState, Endpoint};

pub use least_conn::LeastLoaded;
pub use random_choice::RandomChoice;
pub use round_robin::RoundRobin;

/// A load-balancing algorithm over a fixed set of endpoints.
pub trait Balancer: Send + Sync + fmt::Debug {
    /// Pick the next endpoint, or `None` when nothing usable exists.
    ///
    /// Must fire `options.on_bad_state` exactly once before returning `None`.
    fn next(&self, token: &CancellationToken, options: &NextOptions) -> Option<Arc<Endpoint>>;

    /// Build a new instance of the same algorithm over `conns`.
    fn create(&self, conns: &[Arc<Endpoint>]) -> Box<dyn Balancer>;

    /// The endpoints this instance selects from.
    fn conns(&self) -> &[Arc<Endpoint>];
}

/// Health predicate used by every balancer.
pub fn is_usable<C: Conn + ?Sized>(conn: &C, accept_banned: bool) -> bool {
    conn.state().is_usable(accept_banned)
}

/// Callback fired when no acceptable connection exists.
pub type OnBadState = Arc<dyn Fn(&CancellationToken) + Send + Sync>;

/// A single per-call selection option.
#[derive(Clone)]
pub enum NextOption {
    AcceptBanned(bool),
    OnBadState(OnBadState),
}

/// Per-call selection policy.
#[derive(Clone, Default)]
pub struct NextOptions {
    pub accept_banned: bool,
    pub on_bad_state: Option<OnBadState>,
}

impl NextOptions {
    /// Apply options in order; later ones override earlier ones.
    pub fn from_options(opts: impl IntoIterator<Item = NextOption>) -> Self {
        let mut options = Self::default();
        for opt in opts {
            match opt {
                NextOption::AcceptBanned(val) => options.accept_banned = val,
                NextOption::OnBadState(callback) => options.on_bad_state = Some(callback),
            }
        }
        options
    }

    /// Ask for rediscovery, if a callback is set.
    pub fn discovery(&self, token: &CancellationToken) {
        if let Some(callback) = &self.on_bad_state {
            callback(token);
        }
    }
}

impl fmt::Debug for NextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextOptions")
            .field("accept_banned", &self.accept_banned)
            .field("on_bad_state", &self.on_bad_state.is_some())
            .finish()
    }
}

/// Configurable algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    #[default]
    RoundRobin,
    RandomChoice,
    LeastLoaded,
}

impl BalancerKind {
    pub fn build(self, conns: &[Arc<Endpoint>]) -> Box<dyn Balancer> {
        match self {
            BalancerKind::RoundRobin => Box::new(RoundRobin::new(conns)),
            BalancerKind::RandomChoice => Box::new(RandomChoice::new(conns)),
            BalancerKind::LeastLoaded => Box::new(LeastLoaded::new(conns)),
        }
    }
}

impl fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BalancerKind::RoundRobin => "round_robin",
            BalancerKind::RandomChoice => "random_choice",
            BalancerKind::LeastLoaded => "least_loaded",
        })
    }
}

/// Scan `conns` starting at `start`, wrapping around.
///
/// Returns the first usable non-banned endpoint; failing that, the first
/// banned one if the caller accepts banned endpoints. Each candidate's
/// state is read once.
pub(crate) fn scan_from(
    conns: &[Arc<Endpoint>],
    start: usize,
    options: &NextOptions,
) -> Option<Arc<Endpoint>> {
    let len = conns.len();
    let mut fallback = None;
    for i in 0..len {
        let conn = &conns[(start + i) % len];
        let state = conn.state();
        if state.is_usable(false) {
            return Some(conn.clone());
        }
        if fallback.is_none() && state == ConnState::Banned && state.is_usable(options.accept_banned) {
            fallback = Some(conn.clone());
        }
    }
    fallback
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub fn endpoint(address: &str, state: ConnState) -> Arc<Endpoint> {
        let e = Arc::new(Endpoint::new(address, 100));
        e.set_state(state);
        e
    }

    /// NextOptions whose OnBadState counts invocations.
    pub fn counting_options(accept_banned: bool) -> (NextOptions, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let options = NextOptions::from_options([
            NextOption::AcceptBanned(accept_banned),
            NextOption::OnBadState(Arc::new(move |_: &CancellationToken| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        ]);
        (options, calls)
    }
}
