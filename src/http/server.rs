//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the forwarding, health and admin routes
//! - Wire up middleware (request ID, tracing, timeout)
//! - Bind to a listener and serve until shutdown
//! - Hand every forwarded request to the bridge

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::http::request::{forward_request, propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::routing_response;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::CircuitState;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub config: Arc<BridgeConfig>,
    pub started_at: Instant,
}

/// HTTP front end for the bridge.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(bridge: Arc<Bridge>, config: Arc<BridgeConfig>) -> Self {
        let state = AppState {
            bridge,
            config,
            started_at: Instant::now(),
        };
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The timeout layer is a backstop a little past the bridge's own request
    /// deadline, so deadline errors keep their structured body.
    #[allow(deprecated)]
    pub fn build_router(state: AppState) -> Router {
        let backstop = Duration::from_secs(state.config.listener.request_timeout_secs) + Duration::from_secs(1);

        let mut router = Router::new()
            .route("/v1/{operation}", post(forward_handler))
            .route("/health", get(health_handler))
            .with_state(state.clone());

        if state.config.admin.enabled {
            router = router.merge(setup_admin_router(state));
        }

        router
            .layer(TimeoutLayer::new(backstop))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Serve on `listener` until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut rx = shutdown.subscribe();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Forward one operation through the bridge.
async fn forward_handler(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers).to_string();
    let payload = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(request_id = %request_id, error = %e, "Rejecting malformed JSON body");
                metrics::record_request(&operation, StatusCode::BAD_REQUEST.as_u16());
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid JSON body: {}", e), "request_id": request_id })),
                )
                    .into_response();
            }
        }
    };
    let request = forward_request(&operation, &headers, payload);

    tracing::debug!(
        request_id = %request_id,
        operation = %operation,
        organization_id = ?request.organization_id,
        "Forwarding request"
    );

    let result = state.bridge.execute(request).await;
    let response = routing_response(result, &request_id);
    metrics::record_request(&operation, response.status().as_u16());
    response
}

/// Liveness plus a summary of open circuits.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.bridge.stats();
    let open: Vec<&str> = stats
        .iter()
        .filter(|s| s.state == CircuitState::Open)
        .map(|s| s.key.as_str())
        .collect();
    let routing = state.bridge.routing();

    let status = if open.is_empty() { "healthy" } else { "degraded" };
    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "mode": routing.mode,
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "open_circuits": open,
        })),
    )
}
