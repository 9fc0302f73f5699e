//! Connection pool.
//!
//! # Responsibilities
//! - Own every endpoint; create them on discovery, destroy them when they vanish
//! - Publish a topology generation so balancers know when to rebuild
//! - Hand out leases and keep lease accounting correct on discard

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::conn::endpoint::{Conn, Endpoint, EndpointSnapshot};
use crate::conn::state::ConnState;
use crate::observability::metrics;

/// Shared set of endpoints, keyed by address.
#[derive(Debug)]
pub struct ConnPool {
    endpoints: DashMap<String, Arc<Endpoint>>,
    generation: AtomicU64,
    discarded: AtomicU64,
    config: PoolConfig,
}

/// What a [`ConnPool::sync`] call changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub restored: usize,
    pub generation: u64,
}

impl ConnPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            endpoints: DashMap::new(),
            generation: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Topology version; bumps whenever the endpoint set changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Number of leases discarded instead of released.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn get(&self, address: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.get(address).map(|e| e.value().clone())
    }

    /// Reconcile the pool with a freshly discovered address list.
    ///
    /// New addresses become `Created` endpoints, vanished ones are marked
    /// `Destroyed` and dropped, and banned survivors are unbanned.
    pub fn sync(&self, addresses: &[String]) -> SyncReport {
        let mut report = SyncReport::default();

        for address in addresses {
            match self.endpoints.entry(address.clone()) {
                Entry::Occupied(existing) => {
                    if existing.get().unban() {
                        report.restored += 1;
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Endpoint::new(
                        address.clone(),
                        self.config.max_leases_per_endpoint,
                    )));
                    report.added += 1;
                }
            }
        }

        let stale: Vec<String> = self
            .endpoints
            .iter()
            .filter(|e| !addresses.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for address in stale {
            if let Some((_, endpoint)) = self.endpoints.remove(&address) {
                endpoint.set_state(ConnState::Destroyed);
                report.removed += 1;
            }
        }

        report.generation = if report.added > 0 || report.removed > 0 {
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.generation()
        };

        tracing::debug!(
            added = report.added,
            removed = report.removed,
            restored = report.restored,
            generation = report.generation,
            "Connection pool synchronized"
        );
        report
    }

    /// All endpoints, ordered by address so balancers see a stable order.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        let mut conns: Vec<Arc<Endpoint>> =
            self.endpoints.iter().map(|e| e.value().clone()).collect();
        conns.sort_by(|a, b| a.address.cmp(&b.address));
        conns
    }

    pub fn endpoint_snapshots(&self) -> Vec<EndpointSnapshot> {
        self.snapshot().iter().map(|e| e.snapshot()).collect()
    }

    /// Lease `endpoint`, or `None` when it is at its lease limit.
    pub fn lease(self: &Arc<Self>, endpoint: &Arc<Endpoint>) -> Option<Lease> {
        if !endpoint.try_acquire_lease() {
            return None;
        }
        Some(Lease {
            endpoint: endpoint.clone(),
            pool: self.clone(),
        })
    }
}

/// A per-attempt claim on an endpoint. Dropping it releases the slot.
#[derive(Debug)]
pub struct Lease {
    endpoint: Arc<Endpoint>,
    pool: Arc<ConnPool>,
}

impl Lease {
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Return the lease after the endpoint served the attempt.
    pub fn release(self) {
        self.endpoint
            .mark_success(self.pool.config.healthy_threshold as usize);
    }

    /// Return the lease after the endpoint failed the attempt without
    /// breaking the connection, e.g. by reporting overload.
    pub fn fail(self) {
        self.endpoint
            .mark_failure(self.pool.config.unhealthy_threshold as usize);
    }

    /// Throw the lease away and ban its endpoint.
    pub fn discard(self) {
        self.pool.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::record_lease_discarded(self.endpoint.address());
        if self.endpoint.ban() {
            tracing::warn!(address = %self.endpoint.address(), "Endpoint banned after discarded lease");
        }
    }
}

impl Deref for Lease {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.endpoint.release_lease();
    }
}
