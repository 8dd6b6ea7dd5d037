//! Scan service
//!
//! Trigger/poll boundary behind the HTTP API: validates trigger requests,
//! takes the single-flight guard, creates the job record and spawns the
//! executor. Status reads are pure store reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::pipeline::PipelineExecutor;
use super::reconciler::ReconcileError;
use super::single_flight::SingleFlightGuard;
use crate::db::{CompanyStore, JobStore, JobStoreError};
use crate::models::{
    company_slug, resolve_company_name, FailureCode, JobFailure, JobUpdate, OutreachDraft,
    ScanDepth, ScanSnapshot, ScanStatus, StageId, StageOutput, TraceEntry,
};
use crate::stages::{RunContext, StageError};

/// Sources consulted when a trigger does not name any
pub const DEFAULT_SOURCES: [&str; 3] = ["github", "web", "news"];

/// Longest accepted query
pub const MAX_QUERY_CHARS: usize = 200;

/// How long a cancel request waits for the executor to persist CANCELLED
const CANCEL_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cancellation tokens of jobs running in this process
pub type CancelTokens = Arc<RwLock<HashMap<Uuid, CancellationToken>>>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    AlreadyAnalyzed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("a scan is already in progress")]
    Busy { active_scan_id: Option<Uuid> },

    #[error("Scan {id} is already {status} and cannot be cancelled")]
    NotCancellable { id: Uuid, status: ScanStatus },

    #[error("Outreach regeneration failed: {0}")]
    Stage(#[from] StageError),

    #[error(transparent)]
    Jobs(#[from] JobStoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Storage(#[from] leadscan_common::Error),
}

/// What a trigger asks to analyze
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// Discover a new company from a free-text query
    Discover(String),
    /// Re-analyze an already reconciled company
    Refresh(String),
}

/// `202` body of a successful trigger
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanAccepted {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub estimated_duration_seconds: u64,
}

/// `/system/status` body
#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub pipeline_version: &'static str,
    pub stages: Vec<StageId>,
    pub active_scan: Option<ScanSnapshot>,
    pub last_scan: Option<ScanSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ScanService {
    jobs: JobStore,
    companies: CompanyStore,
    guard: SingleFlightGuard,
    executor: Arc<PipelineExecutor>,
    tokens: CancelTokens,
}

impl ScanService {
    pub fn new(
        jobs: JobStore,
        companies: CompanyStore,
        guard: SingleFlightGuard,
        executor: PipelineExecutor,
        tokens: CancelTokens,
    ) -> Self {
        Self {
            jobs,
            companies,
            guard,
            executor: Arc::new(executor),
            tokens,
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn companies(&self) -> &CompanyStore {
        &self.companies
    }

    pub fn guard(&self) -> &SingleFlightGuard {
        &self.guard
    }

    pub fn tokens(&self) -> &CancelTokens {
        &self.tokens
    }

    /// Admit a scan and start it in the background
    ///
    /// Rejections (validation, existence, busy) create no job and leave the
    /// guard untouched.
    pub async fn trigger(
        &self,
        target: ScanTarget,
        sources: Option<Vec<String>>,
        depth: ScanDepth,
    ) -> Result<ScanAccepted, ScanError> {
        let sources = normalize_sources(sources)?;

        let target_hint = match target {
            ScanTarget::Discover(query) => {
                let query = query.trim().to_string();
                if query.is_empty() {
                    return Err(ScanError::Validation("query must not be empty".to_string()));
                }
                if query.chars().count() > MAX_QUERY_CHARS {
                    return Err(ScanError::Validation(format!(
                        "query must be at most {} characters",
                        MAX_QUERY_CHARS
                    )));
                }
                // Same name the research stage will resolve, so "Analyze Slice" maps to "slice"
                let slug = company_slug(&resolve_company_name(&query));
                if slug.is_empty() {
                    return Err(ScanError::Validation(
                        "query must contain letters or digits".to_string(),
                    ));
                }
                if self.companies.exists(&slug).await? {
                    return Err(ScanError::AlreadyAnalyzed(slug));
                }
                query
            }
            ScanTarget::Refresh(company_id) => match self.companies.get(&company_id).await? {
                Some(company) => company.name,
                None => {
                    return Err(ScanError::NotFound(format!(
                        "Company not found: {}",
                        company_id
                    )))
                }
            },
        };

        let scan_id = Uuid::new_v4();
        let permit = self.guard.try_acquire(scan_id).ok_or_else(|| ScanError::Busy {
            active_scan_id: self.guard.active_job(),
        })?;

        // Permit drops (and releases) if the job record cannot be written
        let job = self
            .jobs
            .create(scan_id, &target_hint, depth, sources)
            .await?;

        let token = CancellationToken::new();
        self.tokens.write().await.insert(scan_id, token.clone());

        let accepted = ScanAccepted {
            scan_id,
            status: job.status,
            estimated_duration_seconds: depth.estimated_duration_seconds(),
        };

        let executor = Arc::clone(&self.executor);
        let jobs = self.jobs.clone();
        let tokens = Arc::clone(&self.tokens);
        tokio::spawn(async move {
            let run = tokio::spawn(async move { executor.run(job, permit, token).await });

            if let Err(join_error) = run.await {
                tracing::error!(
                    scan_id = %scan_id,
                    error = %join_error,
                    "Scan executor task aborted"
                );
                let failure = JobFailure::new(
                    FailureCode::Internal,
                    format!("Scan executor task aborted: {}", join_error),
                );
                if let Err(e) = jobs.update(scan_id, JobUpdate::failed(failure)).await {
                    tracing::error!(scan_id = %scan_id, error = %e, "Failed to mark aborted scan as failed");
                }
            }

            tokens.write().await.remove(&scan_id);
        });

        tracing::info!(scan_id = %scan_id, query = %target_hint, depth = depth.as_str(), "Scan accepted");
        Ok(accepted)
    }

    /// Current snapshot of a job
    pub async fn status(&self, scan_id: Uuid) -> Result<ScanSnapshot, ScanError> {
        self.jobs
            .get(scan_id)
            .await?
            .map(|job| job.snapshot())
            .ok_or_else(|| ScanError::NotFound(format!("Scan not found: {}", scan_id)))
    }

    /// Snapshot of the job that is queued or running, if any
    pub async fn active(&self) -> Result<Option<ScanSnapshot>, ScanError> {
        Ok(self.jobs.active().await?.map(|job| job.snapshot()))
    }

    /// Request cancellation and return the job as it stands afterwards
    pub async fn cancel(&self, scan_id: Uuid) -> Result<ScanSnapshot, ScanError> {
        let job = self
            .jobs
            .get(scan_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("Scan not found: {}", scan_id)))?;
        if job.is_terminal() {
            return Err(ScanError::NotCancellable {
                id: scan_id,
                status: job.status,
            });
        }

        let token = self.tokens.read().await.get(&scan_id).cloned();
        match token {
            Some(token) => {
                tracing::info!(scan_id = %scan_id, "Cancellation requested");
                token.cancel();
                self.wait_for_terminal(scan_id).await
            }
            None => {
                // No executor in this process owns the job
                tracing::warn!(scan_id = %scan_id, "Cancelling scan with no running executor");
                let job = match self.jobs.update(scan_id, JobUpdate::cancelled()).await {
                    Ok(job) => job,
                    Err(JobStoreError::Rejected { .. }) => self
                        .jobs
                        .get(scan_id)
                        .await?
                        .ok_or_else(|| ScanError::NotFound(format!("Scan not found: {}", scan_id)))?,
                    Err(e) => return Err(e.into()),
                };
                self.guard.force_release(scan_id);
                Ok(job.snapshot())
            }
        }
    }

    async fn wait_for_terminal(&self, scan_id: Uuid) -> Result<ScanSnapshot, ScanError> {
        let deadline = tokio::time::Instant::now() + CANCEL_SETTLE_TIMEOUT;
        loop {
            let snapshot = self.status(scan_id).await?;
            if snapshot.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Re-run only the outreach stage for a reconciled company
    pub async fn regenerate_outreach(&self, company_id: &str) -> Result<OutreachDraft, ScanError> {
        let company = self
            .companies
            .get(company_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("Company not found: {}", company_id)))?;

        let stage = self
            .executor
            .stages()
            .get(StageId::Outreach)
            .ok_or(StageError::MissingDependency(StageId::Outreach))?;
        let ctx = RunContext::for_outreach(&company);
        let timeout = self.executor.stage_timeout();

        let output = tokio::time::timeout(timeout, stage.run(&ctx))
            .await
            .map_err(|_| StageError::Timeout(timeout))??;
        let draft = match output {
            StageOutput::Outreach(draft) => draft,
            other => {
                return Err(StageError::UnexpectedOutput {
                    expected: StageId::Outreach,
                    actual: other.stage(),
                }
                .into())
            }
        };

        let entry = TraceEntry::now(
            StageId::Outreach,
            format!("Regenerated: {}", StageOutput::Outreach(draft.clone()).describe()),
        );
        self.executor
            .reconciler()
            .replace_outreach(&company.id, &draft, &entry)
            .await?;

        tracing::info!(company_id = %company.id, "Outreach regenerated");
        Ok(draft)
    }

    pub async fn system_status(&self) -> Result<SystemStatus, ScanError> {
        let active_scan = self.active().await?;
        let last_scan = self.jobs.last_completed().await?.map(|job| job.snapshot());

        Ok(SystemStatus {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            pipeline_version: crate::models::PIPELINE_VERSION,
            stages: self.executor.stages().iter().map(|s| s.id()).collect(),
            active_scan,
            last_scan,
        })
    }
}

/// Default, trim and validate requested sources
fn normalize_sources(sources: Option<Vec<String>>) -> Result<Vec<String>, ScanError> {
    let Some(sources) = sources else {
        return Ok(DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect());
    };

    let mut normalized: Vec<String> = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.trim().to_lowercase();
        if source.is_empty() {
            return Err(ScanError::Validation("sources must not contain empty names".to_string()));
        }
        if !normalized.contains(&source) {
            normalized.push(source);
        }
    }
    if normalized.is_empty() {
        return Err(ScanError::Validation("sources must not be empty".to_string()));
    }
    Ok(normalized)
}
