//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::conn::Endpoint;
use crate::load_balancer::{scan_from, Balancer, NextOptions};

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
#[derive(Debug, Default)]
pub struct RoundRobin {
    conns: Vec<Arc<Endpoint>>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new(conns: &[Arc<Endpoint>]) -> Self {
        Self {
            conns: conns.to_vec(),
            counter: AtomicUsize::new(0),
        }
    }
}

impl Balancer for RoundRobin {
    fn next(&self, token: &CancellationToken, options: &NextOptions) -> Option<Arc<Endpoint>> {
        if !self.conns.is_empty() {
            let start = self.counter.fetch_add(1, Ordering::Relaxed) % self.conns.len();
            if let Some(conn) = scan_from(&self.conns, start, options) {
                return Some(conn);
            }
        }
        options.discovery(token);
        None
    }

    fn create(&self, conns: &[Arc<Endpoint>]) -> Box<dyn Balancer> {
        Box::new(Self::new(conns))
    }

    fn conns(&self) -> &[Arc<Endpoint>] {
        &self.conns
    }
}
