//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! bridge.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, every violation collected)
//!     → BridgeConfig (validated, immutable)
//!     → Bridge::from_config wires every subsystem
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads and validates
//!     → main.rs hands the routing section to Bridge::update_routing
//!     → Router swaps its settings atomically (ArcSwap)
//! ```
//!
//! # Design Decisions
//! - Only routing is hot-reloadable; other sections require a restart
//! - All fields have defaults to allow minimal configs
//! - An invalid file is a fatal `Configuration` error at startup and is
//!   ignored on reload

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BridgeConfig, CircuitBreakerSettings, CredentialEntry, ListenerConfig, LogFormat, ObservabilityConfig,
    ProviderEndpoint, ProvidersConfig, RetrySettings, RoutingSettings, TokenSettings,
};
pub use validation::{validate_config, validate_routing, ValidationError};
