//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!     → telemetry.rs (named events for migration dashboards)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → TelemetrySink implementation injected into the Bridge
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all request spans
//! - Metrics are cheap (atomic increments)
//! - Telemetry is best effort and never fails a request

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use telemetry::{BufferedTelemetry, NoopTelemetry, TelemetrySink, TracingTelemetry};
