//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! ForwardRequest (operation, tenant, payload, deadline)
//!     → mode.rs (determine_routing: which provider(s)?)
//!     → router.rs
//!         single-legacy / single-new / percentage:
//!             → one provider via RetryExecutor
//!             → on failure, optionally one call to the alternate provider
//!         dual / shadow:
//!             → both providers concurrently
//!             → comparison.rs (divergence, status and payload match)
//!             → pick the result to return
//!     → RoutingResult
//! ```
//!
//! # Design Decisions
//! - The random source is injected so traffic splits are reproducible
//! - Settings are hot-swappable without touching in-flight requests
//! - Divergence means one provider succeeded and the other failed;
//!   payload differences are reported but do not count as divergence

pub mod comparison;
pub mod mode;
pub mod router;

pub use comparison::{compare, normalize, ComparisonResult};
pub use mode::{determine_routing, RoutingDecision, RoutingMode};
pub use router::{ExecutionResult, ForwardRequest, Router, RoutingResult};
