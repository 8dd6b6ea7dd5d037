//! Scan trigger/poll API
//!
//! POST /api/v1/scan, GET /api/v1/scan/active, GET /api/v1/scan/{id},
//! POST /api/v1/scan/{id}/cancel

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{ScanDepth, ScanSnapshot};
use crate::services::{ScanAccepted, ScanTarget};
use crate::AppState;

/// POST /api/v1/scan request
///
/// Either `query` (discover a new company) or `company_ids` (refresh exactly
/// one existing company).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<ScanDepth>,
}

impl ScanRequest {
    /// Discover `query`
    pub fn discover(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Refresh the existing company `company_id`
    pub fn refresh(company_id: impl Into<String>) -> Self {
        Self {
            company_ids: Some(vec![company_id.into()]),
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: ScanDepth) -> Self {
        self.depth = Some(depth);
        self
    }
}

impl ScanRequest {
    fn target(&self) -> ApiResult<ScanTarget> {
        match (&self.query, &self.company_ids) {
            (Some(_), Some(_)) => Err(ApiError::Validation(
                "provide either query or company_ids, not both".to_string(),
            )),
            (None, None) => Err(ApiError::Validation(
                "query or company_ids is required".to_string(),
            )),
            (Some(query), None) => Ok(ScanTarget::Discover(query.clone())),
            (None, Some(ids)) => match ids.as_slice() {
                [id] if !id.trim().is_empty() => Ok(ScanTarget::Refresh(id.trim().to_string())),
                [_] => Err(ApiError::Validation("company id must not be empty".to_string())),
                _ => Err(ApiError::Validation(format!(
                    "company_ids must contain exactly one id (got {})",
                    ids.len()
                ))),
            },
        }
    }
}

/// POST /api/v1/scan
///
/// 202 with the queued scan id, or 429 while another scan holds the flight.
pub async fn trigger_scan(
    State(state): State<AppState>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ScanAccepted>)> {
    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let target = request.target()?;
    let depth = request.depth.unwrap_or_default();

    let accepted = state
        .scans
        .trigger(target, request.sources, depth)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/v1/scan/active
pub async fn get_active_scan(State(state): State<AppState>) -> ApiResult<Json<ScanSnapshot>> {
    state
        .scans
        .active()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No scan is active".to_string()))
}

/// GET /api/v1/scan/{scan_id}
///
/// Pure read of the stored job; never waits for progress.
pub async fn get_scan_status(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> ApiResult<Json<ScanSnapshot>> {
    let scan_id = parse_scan_id(&scan_id)?;
    let snapshot = state.scans.status(scan_id).await?;

    tracing::debug!(scan_id = %scan_id, status = %snapshot.status, "Status query");
    Ok(Json(snapshot))
}

/// POST /api/v1/scan/{scan_id}/cancel
pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> ApiResult<Json<ScanSnapshot>> {
    let scan_id = parse_scan_id(&scan_id)?;
    Ok(Json(state.scans.cancel(scan_id).await?))
}

fn parse_scan_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation(format!("Invalid scan id: {}", raw)))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/scan", post(trigger_scan))
        .route("/api/v1/scan/active", get(get_active_scan))
        .route("/api/v1/scan/:scan_id", get(get_scan_status))
        .route("/api/v1/scan/:scan_id/cancel", post(cancel_scan))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> ScanRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn query_request_targets_discovery() {
        let target = request(r#"{"query":"Slice"}"#).target().unwrap();
        assert_eq!(target, ScanTarget::Discover("Slice".to_string()));
    }

    #[test]
    fn single_company_id_targets_refresh() {
        let target = request(r#"{"company_ids":["slice"],"depth":"quick"}"#)
            .target()
            .unwrap();
        assert_eq!(target, ScanTarget::Refresh("slice".to_string()));
    }

    #[test]
    fn ambiguous_or_empty_requests_are_rejected() {
        assert!(request(r#"{}"#).target().is_err());
        assert!(request(r#"{"query":"a","company_ids":["a"]}"#).target().is_err());
        assert!(request(r#"{"company_ids":["a","b"]}"#).target().is_err());
        assert!(request(r#"{"company_ids":[]}"#).target().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<ScanRequest>(r#"{"query":"a","priority":1}"#).is_err());
    }
}
