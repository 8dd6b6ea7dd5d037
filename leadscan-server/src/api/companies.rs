//! Company read API and outreach regeneration
//!
//! GET /api/v1/companies, GET /api/v1/companies/{id},
//! GET /api/v1/companies/{id}/trace, GET /api/v1/companies/{id}/capability-match,
//! POST /api/v1/companies/{id}/outreach/generate

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::companies::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::db::{CompanyPage, CompanyQuery, CompanySort, SortOrder};
use crate::error::{ApiError, ApiResult};
use crate::models::{CapabilityMatch, Company, Level, OutreachDraft, TraceEntry};
use crate::AppState;

/// GET /api/v1/companies query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub sort_by: Option<CompanySort>,
    pub order: Option<SortOrder>,
    pub confidence: Option<String>,
    pub min_score: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListParams {
    fn into_query(self) -> ApiResult<CompanyQuery> {
        let confidence = self
            .confidence
            .map(|value| {
                Level::parse(&value).ok_or_else(|| {
                    ApiError::Validation(format!(
                        "confidence must be HIGH, MEDIUM or LOW (got '{}')",
                        value
                    ))
                })
            })
            .transpose()?;

        if let Some(min_score) = self.min_score {
            if !(0..=100).contains(&min_score) {
                return Err(ApiError::Validation(
                    "min_score must be between 0 and 100".to_string(),
                ));
            }
        }

        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ApiError::Validation("offset must not be negative".to_string()));
        }

        Ok(CompanyQuery {
            confidence,
            min_score: self.min_score,
            sort: self.sort_by.unwrap_or_default(),
            order: self.order.unwrap_or_default(),
            limit,
            offset,
        })
    }
}

/// GET /api/v1/companies/{id}/trace response
#[derive(Debug, Serialize)]
pub struct TraceResponse {
    pub company_id: String,
    pub verdict: Level,
    pub recommended_persona: String,
    pub window: String,
    pub trace: Vec<TraceEntry>,
}

/// GET /api/v1/companies
pub async fn list_companies(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<CompanyPage>> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let query = params.into_query()?;
    Ok(Json(state.scans.companies().list(&query).await?))
}

/// GET /api/v1/companies/{company_id}
pub async fn get_company(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<Company>> {
    Ok(Json(load_company(&state, &company_id).await?))
}

/// GET /api/v1/companies/{company_id}/trace
pub async fn get_company_trace(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<TraceResponse>> {
    let company = load_company(&state, &company_id).await?;

    Ok(Json(TraceResponse {
        company_id: company.id,
        verdict: company.confidence,
        recommended_persona: company.strategy.persona,
        window: company.strategy.timing_window,
        trace: company.trace,
    }))
}

/// GET /api/v1/companies/{company_id}/capability-match
pub async fn get_capability_match(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<CapabilityMatch>> {
    let company = load_company(&state, &company_id).await?;
    Ok(Json(CapabilityMatch::for_company(&company)))
}

/// POST /api/v1/companies/{company_id}/outreach/generate
///
/// Re-runs only the outreach stage against the stored record.
pub async fn generate_outreach(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<OutreachDraft>> {
    Ok(Json(state.scans.regenerate_outreach(&company_id).await?))
}

async fn load_company(state: &AppState, company_id: &str) -> ApiResult<Company> {
    state
        .scans
        .companies()
        .get(company_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Company not found: {}", company_id)))
}

/// Build company routes
pub fn company_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/companies", get(list_companies))
        .route("/api/v1/companies/:company_id", get(get_company))
        .route("/api/v1/companies/:company_id/trace", get(get_company_trace))
        .route(
            "/api/v1/companies/:company_id/capability-match",
            get(get_capability_match),
        )
        .route(
            "/api/v1/companies/:company_id/outreach/generate",
            post(generate_outreach),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sort_by_score_descending() {
        let query = ListParams::default().into_query().unwrap();
        assert_eq!(query.sort, CompanySort::Score);
        assert_eq!(query.order, SortOrder::Desc);
        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
    }

    #[test]
    fn limit_outside_range_is_rejected() {
        for limit in [0, 101] {
            let params = ListParams {
                limit: Some(limit),
                ..Default::default()
            };
            assert!(params.into_query().is_err());
        }
    }

    #[test]
    fn confidence_filter_is_case_insensitive() {
        let params = ListParams {
            confidence: Some("high".to_string()),
            ..Default::default()
        };
        assert_eq!(params.into_query().unwrap().confidence, Some(Level::High));

        let params = ListParams {
            confidence: Some("urgent".to_string()),
            ..Default::default()
        };
        assert!(params.into_query().is_err());
    }
}
