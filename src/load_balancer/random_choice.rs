//! Random-choice load balancing strategy.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::conn::Endpoint;
use crate::load_balancer::{scan_from, Balancer, NextOptions};

/// Picks a uniformly random start position and takes the first usable
/// endpoint from there.
#[derive(Debug, Default)]
pub struct RandomChoice {
    conns: Vec<Arc<Endpoint>>,
}

impl RandomChoice {
    pub fn new(conns: &[Arc<Endpoint>]) -> Self {
        Self {
            conns: conns.to_vec(),
        }
    }
}

impl Balancer for RandomChoice {
    fn next(&self, token: &CancellationToken, options: &NextOptions) -> Option<Arc<Endpoint>> {
        if !self.conns.is_empty() {
            let start = fastrand::usize(..self.conns.len());
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
