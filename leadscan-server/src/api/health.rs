//! Health check endpoint
//!
//! Build stamp, uptime and the most recent server-side error, for monitoring.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("leadscan-server")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short commit hash the binary was built from ("unknown" outside git)
    pub git_hash: String,
    /// RFC 3339 time the binary was built
    pub build_timestamp: String,
    /// Cargo profile (debug or release)
    pub build_profile: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Last 5xx response, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "leadscan-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
        uptime_seconds,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
