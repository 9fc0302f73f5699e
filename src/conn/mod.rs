//! Connection subsystem.
//!
//! # Data Flow
//! ```text
//! Discovery result (addresses)
//!     → pool.rs (sync: add new endpoints, destroy vanished ones, bump generation)
//!     → endpoint.rs (per-address state, lease counter, last observation)
//!     → balancers reference Arc<Endpoint>, never own it
//!
//! Operation attempt:
//!     → pool.rs lease() (bounded by max_leases_per_endpoint)
//!     → Lease::release() on success or a non-retryable failure
//!     → Lease::fail() on a retryable failure that left the connection intact
//!     → Lease::discard() on a connection-invalidating failure (endpoint banned)
//! ```
//!
//! # Design Decisions
//! - Endpoint state lives in atomics so selection never takes a lock
//! - The pool is the only place endpoints are created or destroyed
//! - Lease accounting is RAII; a dropped lease counts as released

pub mod endpoint;
pub mod pool;
pub mod state;

pub use endpoint::{Conn, Endpoint, EndpointSnapshot};
pub use pool::{ConnPool, Lease, SyncReport};
pub use state::ConnState;
