//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → consumed once by Gate::from_config and GatewayServer::new
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a change requires a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{default_config, load_config, parse_config, ConfigError};
pub use schema::GatewayConfig;
pub use schema::{
    BackendConfig, BodyCondition, CacheConfig, CacheKeyConfig, InspectorConfig, JailConfig,
    ListenerConfig, ObservabilityConfig, TimeoutConfig,
};
