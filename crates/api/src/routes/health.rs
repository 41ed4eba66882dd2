//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health and GET /healthz: the process is up and serving.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
