//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → ClusterClientBuilder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The ban predicate is code, not config; it is set on the builder

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BalancingConfig, ClientConfig, DatacenterConfig, DiscoveryConfig, HealthConfig, ObservabilityConfig,
    PoolConfig, SourceConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
