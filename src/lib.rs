//! Provider migration bridge.
//!
//! Routes each logical operation to a legacy provider, a replacement
//! provider, or both, with per-tenant circuit breakers, classified retries,
//! percentage/dual/shadow routing and a single-flight token cache.

pub mod bridge;
pub mod config;
pub mod credentials;
pub mod error;
pub mod provider;
pub mod rng;
pub mod routing;

// Service surface
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use bridge::Bridge;
pub use config::schema::BridgeConfig;
pub use error::ForwardError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{ForwardRequest, RoutingMode, RoutingResult};
