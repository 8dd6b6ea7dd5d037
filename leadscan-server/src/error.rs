//! Error types for leadscan-server
//!
//! Every failed request returns the same envelope:
//! `{"error": "<message>", "code": "<CODE>", "details": {...}}`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::db::JobStoreError;
use crate::services::{ReconcileError, ScanError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Request failed validation (400)
    #[error("{0}")]
    Validation(String),

    /// Operation not allowed in the resource's current state (400)
    #[error("{0}")]
    BadRequest(String),

    /// Target company was already analyzed (409)
    #[error("Company '{0}' has already been analyzed")]
    AlreadyAnalyzed(String),

    /// Another scan holds the single-flight guard (429)
    #[error("A scan is already in progress")]
    ScanInProgress { active_scan_id: Option<Uuid> },

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// leadscan-common error
    #[error(transparent)]
    Common(#[from] leadscan_common::Error),
}

impl ApiError {
    /// Machine-readable code carried in the envelope
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::AlreadyAnalyzed(_) => "ALREADY_ANALYZED",
            ApiError::ScanInProgress { .. } => "SCAN_IN_PROGRESS",
            ApiError::Internal(_) | ApiError::Other(_) => "INTERNAL_ERROR",
            ApiError::Common(leadscan_common::Error::NotFound(_)) => "NOT_FOUND",
            ApiError::Common(leadscan_common::Error::InvalidInput(_)) => "VALIDATION_ERROR",
            ApiError::Common(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AlreadyAnalyzed(_) => StatusCode::CONFLICT,
            ApiError::ScanInProgress { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Common(leadscan_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Common(leadscan_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Value {
        match self {
            ApiError::ScanInProgress { active_scan_id } => json!({
                "active_scan_id": active_scan_id,
                "retry": "Poll the active scan and trigger again once it is terminal",
            }),
            ApiError::AlreadyAnalyzed(company_id) => json!({ "company_id": company_id }),
            _ => json!({}),
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Validation(msg) => ApiError::Validation(msg),
            ScanError::AlreadyAnalyzed(company_id) => ApiError::AlreadyAnalyzed(company_id),
            ScanError::NotFound(msg) => ApiError::NotFound(msg),
            ScanError::Busy { active_scan_id } => ApiError::ScanInProgress { active_scan_id },
            err @ ScanError::NotCancellable { .. } => ApiError::BadRequest(err.to_string()),
            ScanError::Jobs(JobStoreError::NotFound(id)) => {
                ApiError::NotFound(format!("Scan not found: {}", id))
            }
            ScanError::Reconcile(ReconcileError::UnknownCompany(id)) => {
                ApiError::NotFound(format!("Company not found: {}", id))
            }
            ScanError::Storage(err) => ApiError::Common(err),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "details": self.details(),
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_error_carries_active_scan_id() {
        let id = Uuid::new_v4();
        let err = ApiError::ScanInProgress {
            active_scan_id: Some(id),
        };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code(), "SCAN_IN_PROGRESS");
        assert_eq!(err.details()["active_scan_id"], id.to_string());
    }

    #[test]
    fn common_not_found_maps_to_404() {
        let err = ApiError::from(leadscan_common::Error::NotFound("scan".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
