//! Driver facade.
//!
//! # Responsibilities
//! - Own the connection pool, discovery worker and balancer
//! - Create child drivers that share the pool but layer their own settings
//! - Tear the whole tree down on close
//!
//! # Design Decisions
//! - The pool and the discovery worker belong to the root and are shared by
//!   every child
//! - Each driver keeps an immutable balancer snapshot tagged with the pool
//!   generation it was built for; a stale snapshot is replaced, never mutated
//! - The balancer swap and the child registry are guarded by separate locks
//! - A child is registered only after it connected; closing a parent closes
//!   every live child first

pub mod options;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::validation::parse_endpoints;
use crate::config::{validate_config, DriverConfig, ValidationError};
use crate::conn::{ConnPool, Endpoint, EndpointSnapshot, Lease};
use crate::discovery::{Discovery, DiscoveryError, DiscoveryHandle, DiscoveryWorker, StaticDiscovery};
use crate::load_balancer::{Balancer, NextOption, NextOptions};
use crate::observability::metrics;
use crate::operations::{do_with_session, SessionPool};
use crate::resilience::errors::{OperationError, RetryError};
use crate::resilience::retries::{RetryOptions, RetryOptionsError};

pub use options::{DriverOption, DriverSettings};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("initial discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("invalid retry options: {0}")]
    RetryOptions(#[from] RetryOptionsError),

    #[error("no endpoints available after discovery")]
    NoEndpoints,

    #[error("driver is closed")]
    Closed,

    #[error("connect canceled")]
    Canceled,
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// State shared by every driver in one facade tree.
struct Shared {
    next_id: AtomicU64,
    pool: Arc<ConnPool>,
    discovery: Option<DiscoveryHandle>,
}

struct BalancerSnapshot {
    generation: u64,
    balancer: Box<dyn Balancer>,
}

struct DriverInner {
    id: u64,
    config: DriverConfig,
    settings: DriverSettings,
    shared: Arc<Shared>,
    balancer: ArcSwap<BalancerSnapshot>,
    rebuild_lock: Mutex<()>,
    children: Mutex<HashMap<u64, Driver>>,
    on_close: Mutex<Option<CloseHook>>,
    closed: AtomicBool,
    token: CancellationToken,
}

/// Handle to a driver. Cheap to clone; clones refer to the same driver.
///
/// Dropping the last handle to a driver cancels its token, which stops the
/// discovery worker when that driver is the root.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Driver {
    /// Validate `config`, discover the initial topology and start the
    /// discovery worker.
    ///
    /// The driver lives until [`Driver::close`] is called or `token` is
    /// canceled.
    pub async fn connect(
        token: &CancellationToken,
        config: DriverConfig,
        discovery: Arc<dyn Discovery>,
    ) -> Result<Driver, DriverError> {
        validate_config(&config).map_err(DriverError::Config)?;
        Self::connect_validated(token, config, discovery).await
    }

    async fn connect_validated(
        token: &CancellationToken,
        config: DriverConfig,
        discovery: Arc<dyn Discovery>,
    ) -> Result<Driver, DriverError> {
        let settings = DriverSettings::from_config(&config)?;

        let pool = Arc::new(ConnPool::new(config.pool.clone()));
        let seeds = parse_endpoints(&config.endpoints).map_err(DriverError::Config)?;
        if !seeds.is_empty() {
            pool.sync(&seeds);
        }

        let driver_token = token.child_token();
        let handle = if config.discovery.enabled {
            let (worker, handle) =
                DiscoveryWorker::new(discovery, pool.clone(), config.discovery.clone());

            let initial = tokio::select! {
                _ = token.cancelled() => return Err(DriverError::Canceled),
                result = worker.refresh(&driver_token) => result,
            };
            match initial {
                Ok(report) => tracing::debug!(added = report.added, "Initial discovery done"),
                Err(e) if pool.is_empty() => return Err(DriverError::Discovery(e)),
                Err(e) => tracing::warn!(error = %e, "Initial discovery failed, using seed endpoints"),
            }

            tokio::spawn(worker.run(driver_token.clone()));
            Some(handle)
        } else {
            None
        };

        if pool.is_empty() {
            driver_token.cancel();
            return Err(DriverError::NoEndpoints);
        }

        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(0),
            pool,
            discovery: handle,
        });

        let driver = Driver::from_parts(0, config, settings, shared, driver_token, None);
        tracing::info!(
            endpoints = driver.inner.shared.pool.len(),
            balancer = %driver.inner.settings.balancer,
            "Driver connected"
        );
        Ok(driver)
    }

    /// Connect using the configured endpoints as a static discovery source.
    pub async fn connect_static(
        token: &CancellationToken,
        config: DriverConfig,
    ) -> Result<Driver, DriverError> {
        validate_config(&config).map_err(DriverError::Config)?;
        let discovery = StaticDiscovery::new(config.endpoints.clone())?;
        Self::connect_validated(token, config, Arc::new(discovery)).await
    }

    fn from_parts(
        id: u64,
        config: DriverConfig,
        settings: DriverSettings,
        shared: Arc<Shared>,
        token: CancellationToken,
        on_close: Option<CloseHook>,
    ) -> Driver {
        let balancer = BalancerSnapshot {
            generation: shared.pool.generation(),
            balancer: settings.balancer.build(&shared.pool.snapshot()),
        };

        Driver {
            inner: Arc::new(DriverInner {
                id,
                config,
                settings,
                shared,
                balancer: ArcSwap::from_pointee(balancer),
                rebuild_lock: Mutex::new(()),
                children: Mutex::new(HashMap::new()),
                on_close: Mutex::new(on_close),
                closed: AtomicBool::new(false),
                token,
            }),
        }
    }

    /// Create a child driver sharing this driver's pool, with `options`
    /// layered over this driver's settings.
    ///
    /// The child connects to the shared topology: it fails with
    /// [`DriverError::Closed`] once this driver or an ancestor has shut
    /// down, and with [`DriverError::NoEndpoints`] if the pool is empty.
    pub async fn with(
        &self,
        token: &CancellationToken,
        options: impl IntoIterator<Item = DriverOption>,
    ) -> Result<Driver, DriverError> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if token.is_cancelled() {
            return Err(DriverError::Canceled);
        }

        let settings = self.inner.settings.clone().with_options(options)?;
        self.ensure_connected()?;
        let id = self.inner.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let parent: Weak<DriverInner> = Arc::downgrade(&self.inner);
        let on_close: CloseHook = Box::new(move || {
            if let Some(parent) = parent.upgrade() {
                lock(&parent.children).remove(&id);
            }
        });

        let child = Driver::from_parts(
            id,
            self.inner.config.clone(),
            settings,
            self.inner.shared.clone(),
            self.inner.token.child_token(),
            Some(on_close),
        );

        {
            let mut children = lock(&self.inner.children);
            if !self.is_closed() {
                children.insert(id, child.clone());
                drop(children);
                tracing::debug!(parent = self.inner.id, child = id, "Child driver created");
                return Ok(child);
            }
        }

        child.close();
        Err(DriverError::Closed)
    }

    fn ensure_connected(&self) -> Result<(), DriverError> {
        if self.inner.token.is_cancelled() {
            return Err(DriverError::Closed);
        }
        if self.inner.shared.pool.is_empty() {
            return Err(DriverError::NoEndpoints);
        }
        if self
            .inner
            .shared
            .discovery
            .as_ref()
            .is_some_and(DiscoveryHandle::is_closed)
        {
            tracing::warn!(parent = self.inner.id, "Discovery worker stopped, child sees a frozen topology");
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.inner.settings
    }

    pub fn pool(&self) -> &Arc<ConnPool> {
        &self.inner.shared.pool
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of live children registered with this driver.
    pub fn children(&self) -> usize {
        lock(&self.inner.children).len()
    }

    /// Canceled when this driver or any ancestor closes.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Retry defaults for operations run through this driver.
    pub fn retry_options(&self) -> RetryOptions {
        self.inner.settings.retry.clone()
    }

    /// Ask the discovery worker for a refresh. Returns false when discovery
    /// is disabled or stopped.
    pub fn refresh(&self) -> bool {
        self.inner
            .shared
            .discovery
            .as_ref()
            .is_some_and(DiscoveryHandle::request_refresh)
    }

    /// Handle to the shared discovery worker, if discovery is enabled.
    pub fn discovery_handle(&self) -> Option<DiscoveryHandle> {
        self.inner.shared.discovery.clone()
    }

    /// Selection options for this driver, with `extra` applied last.
    ///
    /// By default a selection that finds nothing requests rediscovery.
    pub fn next_options(&self, extra: impl IntoIterator<Item = NextOption>) -> NextOptions {
        let discovery = self.inner.shared.discovery.clone();
        let on_bad_state = Arc::new(move |_: &CancellationToken| {
            metrics::record_no_connection();
            match &discovery {
                Some(handle) if handle.request_refresh() => {
                    tracing::debug!("No usable endpoint, rediscovery requested");
                }
                _ => tracing::warn!("No usable endpoint and discovery is unavailable"),
            }
        });

        let defaults = [
            NextOption::AcceptBanned(self.inner.settings.accept_banned),
            NextOption::OnBadState(on_bad_state),
        ];
        NextOptions::from_options(defaults.into_iter().chain(extra))
    }

    /// Pick an endpoint, rebuilding the balancer first if the topology
    /// changed since it was built.
    pub fn next_conn(&self, token: &CancellationToken, options: &NextOptions) -> Option<Arc<Endpoint>> {
        self.current_balancer().balancer.next(token, options)
    }

    fn current_balancer(&self) -> Arc<BalancerSnapshot> {
        let generation = self.inner.shared.pool.generation();
        let current = self.inner.balancer.load_full();
        if current.generation >= generation {
            return current;
        }

        let _guard = lock(&self.inner.rebuild_lock);
        let current = self.inner.balancer.load_full();
        if current.generation >= generation {
            return current;
        }

        let rebuilt = Arc::new(BalancerSnapshot {
            generation,
            balancer: current.balancer.create(&self.inner.shared.pool.snapshot()),
        });
        self.inner.balancer.store(rebuilt.clone());
        tracing::debug!(driver = self.inner.id, generation, "Balancer rebuilt");
        rebuilt
    }

    /// Run `f` against a leased endpoint, retrying under `options`.
    pub async fn run<T, F>(
        &self,
        token: &CancellationToken,
        options: &RetryOptions,
        f: F,
    ) -> Result<T, RetryError>
    where
        F: for<'a> Fn(&'a CancellationToken, &'a mut Lease) -> BoxFuture<'a, Result<T, OperationError>>,
    {
        do_with_session(token, self, options, f).await
    }

    /// Endpoint diagnostics, ordered by address.
    pub fn endpoints(&self) -> Vec<EndpointSnapshot> {
        self.inner.shared.pool.endpoint_snapshots()
    }

    /// Close this driver and every live child. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let children: Vec<Driver> = lock(&self.inner.children)
            .drain()
            .map(|(_, child)| child)
            .collect();
        for child in children {
            child.close();
        }

        self.inner.token.cancel();

        let hook = lock(&self.inner.on_close).take();
        if let Some(hook) = hook {
            hook();
        }

        tracing::info!(driver = self.inner.id, "Driver closed");
    }
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        // Last handle gone without close(): stop the subtree's background work.
        self.token.cancel();
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.inner.id)
            .field("settings", &self.inner.settings)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionPool for Driver {
    type Session = Lease;

    async fn acquire(&self, token: &CancellationToken) -> Result<Lease, OperationError> {
        if self.is_closed() {
            return Err(OperationError::other(DriverError::Closed));
        }

        let options = self.next_options([]);
        let endpoint = self
            .next_conn(token, &options)
            .ok_or(OperationError::NoConnection)?;

        self.inner
            .shared
            .pool
            .lease(&endpoint)
            .ok_or_else(|| OperationError::PoolExhausted {
                address: endpoint.address.clone(),
            })
    }

    fn release(&self, lease: Lease) {
        lease.release();
    }

    fn release_failed(&self, lease: Lease) {
        lease.fail();
    }

    fn discard(&self, lease: Lease) {
        lease.discard();
    }
}
