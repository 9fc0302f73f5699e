//! Endpoint discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Discovery source (static list, config file, ...)
//!     → worker.rs (on start, on interval, on demand)
//!     → endpoint parsing (canonical host:port)
//!     → ConnPool::sync (create / destroy / unban endpoints)
//!     → generation bump → balancer rebuilt on next selection
//! ```
//!
//! # Design Decisions
//! - On-demand refreshes are coalesced; a burst of requests costs one round
//! - An empty discovery result never empties the pool
//! - Discovery errors are logged and the current topology is kept

pub mod file;
pub mod worker;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::validation::{parse_endpoints, ValidationError};

pub use file::FileDiscovery;
pub use worker::{DiscoveryHandle, DiscoveryWorker};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("discovery parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("discovered invalid endpoints: {0:?}")]
    InvalidEndpoints(Vec<ValidationError>),

    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),

    #[error("discovery canceled")]
    Canceled,

    #[error("discovery failed: {0}")]
    Failed(String),
}

/// Source of the current endpoint list.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, token: &CancellationToken) -> Result<Vec<String>, DiscoveryError>;
}

/// A fixed endpoint list.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    endpoints: Vec<String>,
}

impl StaticDiscovery {
    pub fn new(endpoints: Vec<String>) -> Result<Self, DiscoveryError> {
        let endpoints = parse_endpoints(&endpoints).map_err(DiscoveryError::InvalidEndpoints)?;
        Ok(Self { endpoints })
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, _token: &CancellationToken) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.endpoints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_discovery_normalizes() {
        let discovery =
            StaticDiscovery::new(vec!["grpc://a:2135".into(), "b:2135".into()]).unwrap();
        let found = discovery.discover(&CancellationToken::new()).await.unwrap();
        assert_eq!(found, vec!["a:2135", "b:2135"]);

        assert!(matches!(
            StaticDiscovery::new(vec!["nope".into()]),
            Err(DiscoveryError::InvalidEndpoints(_))
        ));
    }
}
