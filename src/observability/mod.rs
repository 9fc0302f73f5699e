//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Retry loop, pool and balancers produce:
//!     → logging.rs (structured log events, one span per retry call)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Whatever subscriber / recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Every retry call carries an operation id in its span
//! - Metrics are cheap (facade calls, no-ops without a recorder)

pub mod logging;
pub mod metrics;
