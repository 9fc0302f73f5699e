//! Cluster driver library.
//!
//! Client-side connection selection and retry for a clustered backend.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller closure
//!          │
//!          ▼
//!   ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//!   │    driver    │───▶│  operations  │───▶│  resilience  │
//!   │   facade     │    │ session / tx │    │ retry engine │
//!   └──────┬───────┘    └──────────────┘    └──────┬───────┘
//!          │                                       │ classify, backoff
//!          ▼                                       ▼
//!   ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//!   │load_balancer │───▶│     conn     │◀───│  discovery   │
//!   │  selection   │    │ pool, leases │    │    worker    │
//!   └──────────────┘    └──────────────┘    └──────────────┘
//!
//!   Cross-cutting: config (TOML, validation, file watcher),
//!                  observability (tracing, metrics)
//! ```

// Core subsystems
pub mod conn;
pub mod driver;
pub mod load_balancer;
pub mod operations;

// Topology
pub mod discovery;

// Cross-cutting concerns
pub mod config;
pub mod observability;
pub mod resilience;

pub use config::schema::DriverConfig;
pub use driver::{Driver, DriverError, DriverOption};
pub use resilience::{OperationError, RetryError, RetryOption, RetryOptions};
