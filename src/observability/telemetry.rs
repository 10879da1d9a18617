//! Telemetry events.
//!
//! # Responsibilities
//! - Define the sink the core reports notable events to
//! - Provide a tracing-backed sink and an in-memory sink
//!
//! # Events
//! - `routing.decision`, `routing.fallback`, `routing.comparison`
//! - `retry.scheduled`
//! - `circuit.transition`
//! - `token.refresh`
//!
//! # Design Decisions
//! - Best effort: emitting never fails and never blocks the request
//! - Properties are free-form JSON objects

use std::sync::{Mutex, PoisonError};

use serde_json::Value;

/// Receives named telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &str, properties: Value);
}

/// Writes every event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: &str, properties: Value) {
        tracing::info!(target: "provider_bridge::telemetry", event, properties = %properties);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _event: &str, _properties: Value) {}
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct BufferedTelemetry {
    events: Mutex<Vec<(String, Value)>>,
}

impl BufferedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of recorded events named `event`.
    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }
}

impl TelemetrySink for BufferedTelemetry {
    fn emit(&self, event: &str, properties: Value) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_string(), properties));
    }
}
