use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::RoutingSettings;
use crate::http::server::AppState;
use crate::resilience::{BreakerSnapshot, CircuitState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub routing: RoutingSettings,
    pub circuits_total: usize,
    pub circuits_open: usize,
    pub circuits_half_open: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let stats = state.bridge.stats();
    let count = |wanted: CircuitState| stats.iter().filter(|s| s.state == wanted).count();
    let circuits_open = count(CircuitState::Open);

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if circuits_open == 0 { "operational" } else { "degraded" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        routing: state.bridge.routing().as_ref().clone(),
        circuits_total: stats.len(),
        circuits_open,
        circuits_half_open: count(CircuitState::HalfOpen),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.bridge.stats())
}
