//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to lifecycle::startup, which wires every subsystem
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Routes and API clients are data, not config: they live in the store

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, CacheConfig, GatewayConfig, ListenerConfig, LogFormat,
    NotifierConfig, ObservabilityConfig, RateLimitConfig, SecurityConfig, SharedBackend,
    StoreBackend, StoreConfig, TimeoutConfig,
};
