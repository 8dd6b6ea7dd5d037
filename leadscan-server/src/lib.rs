//! leadscan-server library interface
//!
//! Exposes the scan orchestrator, its stores and the HTTP router for the
//! binary and for integration tests.

pub mod api;
pub mod client;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod stages;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use leadscan_common::config::ServiceConfig;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::{CompanyStore, JobStore};
use crate::services::{PipelineExecutor, Reconciler, ScanService, SingleFlightGuard, Watchdog};
use crate::stages::StageSet;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Scan orchestration (job store, company store, guard, executor)
    pub scans: ScanService,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side error for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(scans: ScanService) -> Self {
        Self {
            scans,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Wire stores, guard and executor around `pool`
pub fn build_scan_service(pool: SqlitePool, stages: StageSet, config: &ServiceConfig) -> ScanService {
    let max_lock_wait_ms = config.database.max_lock_wait_ms;
    let jobs = JobStore::new(pool.clone(), max_lock_wait_ms);
    let companies = CompanyStore::new(pool, max_lock_wait_ms);
    let executor = PipelineExecutor::new(
        stages,
        jobs.clone(),
        Reconciler::new(companies.clone()),
        Duration::from_secs(config.scan.stage_timeout_secs),
    );

    ScanService::new(
        jobs,
        companies,
        SingleFlightGuard::new(),
        executor,
        Arc::new(RwLock::new(HashMap::new())),
    )
}

/// Watchdog sharing the service's job store, guard and cancellation tokens
pub fn build_watchdog(scans: &ScanService, config: &ServiceConfig) -> Watchdog {
    Watchdog::new(
        scans.jobs().clone(),
        scans.guard().clone(),
        Arc::clone(scans.tokens()),
        Duration::from_secs(config.scan.watchdog_interval_secs),
        Duration::from_secs(config.scan.stale_after_secs),
    )
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::scan_routes())
        .merge(api::company_routes())
        .merge(api::system_routes())
        .merge(api::health_routes())
        .layer(middleware::from_fn_with_state(state.clone(), record_server_errors))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Remember the last 5xx response for `/health`
async fn record_server_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if response.status().is_server_error() {
        let message = format!(
            "{} {} -> {} at {}",
            method,
            path,
            response.status(),
            Utc::now().to_rfc3339()
        );
        *state.last_error.write().await = Some(message);
    }
    response
}
