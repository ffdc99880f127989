//! Health check endpoint

use crate::ApiState;
use axum::extract::State;
use axum::Json;
use quotagate_core::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Health check body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` while serving
    pub status: String,
    /// Crate version
    pub version: String,
    /// Server time, RFC 3339
    pub timestamp: String,
}

/// Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: state.version.clone(),
        timestamp: state.gateway.clock.now().to_rfc3339(),
    })
}
