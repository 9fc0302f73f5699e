//! Least-loaded load balancing strategy.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::conn::{Conn, ConnState, Endpoint};
use crate::load_balancer::{Balancer, NextOptions};

/// Least leases selector.
/// Selects the usable endpoint with the minimum number of active leases.
#[derive(Debug, Default)]
pub struct LeastLoaded {
    conns: Vec<Arc<Endpoint>>,
}

impl LeastLoaded {
    pub fn new(conns: &[Arc<Endpoint>]) -> Self {
        Self {
            conns: conns.to_vec(),
        }
    }
}

impl Balancer for LeastLoaded {
    fn next(&self, token: &CancellationToken, options: &NextOptions) -> Option<Arc<Endpoint>> {
        let mut best: Option<&Arc<Endpoint>> = None;
        let mut banned: Option<&Arc<Endpoint>> = None;

        // In case of tie, the first one is selected (stability)
        for conn in &self.conns {
            let state = conn.state();
            if state.is_usable(false) {
                if best.map_or(true, |b| conn.active_leases() < b.active_leases()) {
                    best = Some(conn);
                }
            } else if state == ConnState::Banned
                && state.is_usable(options.accept_banned)
                && banned.map_or(true, |b| conn.active_leases() < b.active_leases())
            {
                banned = Some(conn);
            }
        }

        match best.or(banned) {
            Some(conn) => Some(conn.clone()),
            None => {
                options.discovery(token);
                None
            }
        }
    }

    fn create(&self, conns: &[Arc<Endpoint>]) -> Box<dyn Balancer> {
        Box::new(Self::new(conns))
    }

    fn conns(&self) -> &[Arc<Endpoint>] {
        &self.conns
    }
}
