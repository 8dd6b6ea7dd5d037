//! Service and app builders over in-memory SQLite

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use leadscan_common::config::ServiceConfig;
use leadscan_server::db::{init_memory_pool, CompanyStore, JobStore};
use leadscan_server::models::ScanSnapshot;
use leadscan_server::services::{PipelineExecutor, Reconciler, ScanService, SingleFlightGuard};
use leadscan_server::stages::StageSet;
use leadscan_server::AppState;
use tokio::sync::RwLock;
use uuid::Uuid;

const POLL_STEP: Duration = Duration::from_millis(10);
const POLL_LIMIT: Duration = Duration::from_secs(10);

/// Scan service with default configuration
pub async fn create_test_service(stages: StageSet) -> ScanService {
    let pool = init_memory_pool()
        .await
        .expect("Failed to create in-memory database");
    leadscan_server::build_scan_service(pool, stages, &ServiceConfig::default())
}

/// Scan service with a sub-second stage deadline
pub async fn create_test_service_with_timeout(stages: StageSet, stage_timeout: Duration) -> ScanService {
    let pool = init_memory_pool()
        .await
        .expect("Failed to create in-memory database");
    let jobs = JobStore::new(pool.clone(), 1000);
    let companies = CompanyStore::new(pool, 1000);
    let executor = PipelineExecutor::new(
        stages,
        jobs.clone(),
        Reconciler::new(companies.clone()),
        stage_timeout,
    );
    ScanService::new(
        jobs,
        companies,
        SingleFlightGuard::new(),
        executor,
        Arc::new(RwLock::new(HashMap::new())),
    )
}

/// Router plus the service behind it
pub async fn create_test_app(stages: StageSet) -> (axum::Router, ScanService) {
    let scans = create_test_service(stages).await;
    let app = leadscan_server::build_router(AppState::new(scans.clone()));
    (app, scans)
}

/// Poll the store until the job is terminal and the flight is free
pub async fn wait_for_terminal(scans: &ScanService, scan_id: Uuid) -> ScanSnapshot {
    let deadline = tokio::time::Instant::now() + POLL_LIMIT;
    loop {
        let snapshot = scans.status(scan_id).await.expect("status failed");
        if snapshot.is_terminal() && scans.guard().is_idle() {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "scan {} did not finish: {:?}",
            scan_id,
            snapshot
        );
        tokio::time::sleep(POLL_STEP).await;
    }
}

/// Poll until `predicate` holds for the job's snapshot
pub async fn wait_for<F>(scans: &ScanService, scan_id: Uuid, predicate: F) -> ScanSnapshot
where
    F: Fn(&ScanSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + POLL_LIMIT;
    loop {
        let snapshot = scans.status(scan_id).await.expect("status failed");
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never held for scan {}: {:?}",
            scan_id,
            snapshot
        );
        tokio::time::sleep(POLL_STEP).await;
    }
}
