//! GET /api/v1/system/status, GET /api/v1/capabilities

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::ApiResult;
use crate::models::{Capability, CAPABILITIES};
use crate::services::SystemStatus;
use crate::AppState;

/// Pipeline contract plus the active and most recently completed scan
pub async fn system_status(State(state): State<AppState>) -> ApiResult<Json<SystemStatus>> {
    Ok(Json(state.scans.system_status().await?))
}

/// GET /api/v1/capabilities response
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub data: &'static [Capability],
}

/// Offer catalogue the strategy stage selects from
pub async fn list_capabilities() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        data: &CAPABILITIES,
    })
}

pub fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/system/status", get(system_status))
        .route("/api/v1/capabilities", get(list_capabilities))
}
