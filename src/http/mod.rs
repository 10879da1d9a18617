//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, middleware stack)
//!     → request.rs (request ID, tenant headers → ForwardRequest)
//!     → Bridge::execute (routing, retries, breakers)
//!     → response.rs (status mapping, Retry-After, bridge headers)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{X_BRANCH_ID, X_MEMBER_ID, X_ORGANIZATION_ID, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
