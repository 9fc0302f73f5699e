//! Background discovery worker.
//!
//! # Responsibilities
//! - Periodically refresh the endpoint list
//! - Refresh on demand when a balancer finds nothing usable
//! - Apply results to the shared connection pool
//! - Stop on cancellation or once no handle can reach it

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::validation::parse_endpoints;
use crate::config::DiscoveryConfig;
use crate::conn::{ConnPool, SyncReport};
use crate::discovery::{Discovery, DiscoveryError};

/// Requests refreshes from a running [`DiscoveryWorker`].
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    requests: mpsc::Sender<()>,
}

impl DiscoveryHandle {
    /// Ask for a refresh. Requests made while one is already pending are
    /// merged into it. Returns false once the worker is gone.
    pub fn request_refresh(&self) -> bool {
        match self.requests.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }

    /// Whether the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

pub struct DiscoveryWorker {
    discovery: Arc<dyn Discovery>,
    pool: Arc<ConnPool>,
    config: DiscoveryConfig,
    requests: mpsc::Receiver<()>,
}

impl DiscoveryWorker {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        pool: Arc<ConnPool>,
        config: DiscoveryConfig,
    ) -> (Self, DiscoveryHandle) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                discovery,
                pool,
                config,
                requests: rx,
            },
            DiscoveryHandle { requests: tx },
        )
    }

    /// Run one discovery round and sync the pool with its result.
    pub async fn refresh(&self, token: &CancellationToken) -> Result<SyncReport, DiscoveryError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let discovered = match time::timeout(timeout, self.discovery.discover(token)).await {
            Ok(result) => result?,
            Err(_) => return Err(DiscoveryError::Timeout(timeout)),
        };

        let addresses = parse_endpoints(&discovered).map_err(DiscoveryError::InvalidEndpoints)?;
        if addresses.is_empty() {
            tracing::warn!("Discovery returned no endpoints, keeping current topology");
            return Ok(SyncReport {
                generation: self.pool.generation(),
                ..SyncReport::default()
            });
        }

        Ok(self.pool.sync(&addresses))
    }

    async fn refresh_logged(&self, token: &CancellationToken, reason: &'static str) {
        match self.refresh(token).await {
            Ok(report) => {
                if report.added > 0 || report.removed > 0 || report.restored > 0 {
                    tracing::info!(
                        reason,
                        added = report.added,
                        removed = report.removed,
                        restored = report.restored,
                        generation = report.generation,
                        "Endpoints refreshed"
                    );
                }
            }
            Err(e) => tracing::warn!(reason, error = %e, "Discovery failed, keeping current topology"),
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        tracing::info!(
            interval = self.config.interval_secs,
            "Discovery worker starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval_at(Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Discovery worker received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh_logged(&token, "interval").await;
                }
                request = self.requests.recv() => {
                    if request.is_none() {
                        tracing::info!("Every discovery handle dropped, exiting loop");
                        break;
                    }
                    self.refresh_logged(&token, "requested").await;
                    ticker.reset();
                }
            }
        }
    }
}
