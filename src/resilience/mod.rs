//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Provider call:
//!     → retries.rs (bounded loop, deadline aware)
//!     → registry.rs (pick the (org, provider) breaker)
//!     → circuit_breaker.rs (gate the call, record the outcome)
//!     → On failure: classifier.rs (retryable? how long to wait?)
//!     → backoff.rs (exponential delay with jitter)
//!     → timeouts.rs (sleep only within the request budget)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Only classified-retryable failures are retried
//! - Circuit breakers are per tenant and per provider
//! - Fast-fail rejections never count against a breaker

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerKey, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState,
    CircuitTransition,
};
pub use classifier::{classify, ClassifiedError, ErrorKind, RawFailure, Severity};
pub use registry::CircuitBreakerRegistry;
pub use retries::{RetryExecutor, RetryOutcome, RetryPolicy};
pub use timeouts::Deadline;
