//! Health and Prometheus metrics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use ledger::Ledger;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::routes::orders::{AppState, Backends};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub stock_policy: &'static str,
    pub backends: Backends,
}

/// GET /health: Liveness plus the configured backends.
pub async fn health<L: Ledger + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stock_policy: state.orders.policy().as_str(),
        backends: state.backends.clone(),
    })
}

/// GET /metrics: Returns Prometheus-formatted metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
