//! Liveness endpoint (§6.6). Separate from the health/telemetry bus: this
//! is the process-liveness probe a load balancer polls, not the
//! operator-facing C9 event stream `ws.rs` exposes.

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}
