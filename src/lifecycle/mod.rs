//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → HTTP server stops accepting and drains
//!               → config watcher loop exits
//! ```
//!
//! # Design Decisions
//! - Ordered startup in main.rs: config, logging, metrics, bridge, listener
//! - In-flight requests finish within their own deadline during drain

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
