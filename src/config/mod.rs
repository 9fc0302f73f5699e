//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, endpoint parsing)
//!     → DriverConfig (validated, immutable)
//!     → owned by the Driver, cloned into child drivers
//!
//! On file change:
//!     watcher.rs detects change
//!     → discovery worker refresh requested
//!     → FileDiscovery re-reads the endpoint list
//!     → pool synced, balancer rebuilt lazily
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the endpoint set is reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BalancerConfig, DiscoveryConfig, DriverConfig, ObservabilityConfig, PoolConfig, RetryConfig,
    TimeoutConfig,
};
pub use validation::{parse_endpoint, parse_endpoints, validate_config, ValidationError};
pub use watcher::ConfigWatcher;
