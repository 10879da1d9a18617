//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_provider_calls_total` (counter): provider, outcome
//! - `bridge_provider_call_duration_seconds` (histogram): provider
//! - `bridge_retries_total` (counter): provider
//! - `bridge_circuit_transitions_total` (counter): key, state
//! - `bridge_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `bridge_circuit_rejections_total` (counter): key
//! - `bridge_routing_decisions_total` (counter): mode, provider
//! - `bridge_fallbacks_total` (counter): from, to
//! - `bridge_divergences_total` (counter): mode
//! - `bridge_token_refreshes_total` (counter): outcome
//! - `bridge_requests_total` (counter): operation, status
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so the core never
//!   checks whether metrics are enabled
//! - Labels stay low cardinality: tenant IDs only appear in breaker keys

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::provider::Provider;
use crate::resilience::{BreakerKey, CircuitState};

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!("bridge_provider_calls_total", "Provider calls by outcome");
    describe_histogram!(
        "bridge_provider_call_duration_seconds",
        "Provider call latency in seconds"
    );
    describe_counter!("bridge_retries_total", "Scheduled retries");
    describe_counter!("bridge_circuit_transitions_total", "Circuit breaker state changes");
    describe_gauge!("bridge_circuit_state", "0=closed, 1=half-open, 2=open");
    describe_counter!(
        "bridge_circuit_rejections_total",
        "Calls rejected by an open circuit"
    );
    describe_counter!("bridge_routing_decisions_total", "Routing decisions by target");
    describe_counter!("bridge_fallbacks_total", "Fallbacks to the alternate provider");
    describe_counter!("bridge_divergences_total", "Divergent dual/shadow results");
    describe_counter!("bridge_token_refreshes_total", "Token refreshes by outcome");
    describe_counter!("bridge_requests_total", "Forwarded client requests by status");
}

pub fn record_provider_call(provider: Provider, success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "bridge_provider_calls_total",
        "provider" => provider.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("bridge_provider_call_duration_seconds", "provider" => provider.as_str())
        .record(duration.as_secs_f64());
}

pub fn record_retry(provider: Provider) {
    counter!("bridge_retries_total", "provider" => provider.as_str()).increment(1);
}

pub fn record_circuit_transition(key: &BreakerKey, to: CircuitState) {
    let state = match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    counter!(
        "bridge_circuit_transitions_total",
        "key" => key.to_string(),
        "state" => to.as_str()
    )
    .increment(1);
    gauge!("bridge_circuit_state", "key" => key.to_string()).set(state);
}

pub fn record_circuit_rejection(key: &BreakerKey) {
    counter!("bridge_circuit_rejections_total", "key" => key.to_string()).increment(1);
}

pub fn record_routing(mode: &str, provider: Provider) {
    counter!(
        "bridge_routing_decisions_total",
        "mode" => mode.to_string(),
        "provider" => provider.as_str()
    )
    .increment(1);
}

pub fn record_fallback(from: Provider, to: Provider) {
    counter!(
        "bridge_fallbacks_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_divergence(mode: &str) {
    counter!("bridge_divergences_total", "mode" => mode.to_string()).increment(1);
}

pub fn record_token_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("bridge_token_refreshes_total", "outcome" => outcome).increment(1);
}

pub fn record_request(operation: &str, status: u16) {
    counter!(
        "bridge_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
