//! Pipeline executor
//!
//! Drives one job through the stage set:
//! QUEUED → RUNNING → (per stage: run, record, trace) → reconcile → COMPLETED.
//!
//! A stage error, timeout or wrong output variant stops the run with FAILED.
//! Cancellation stops it with CANCELLED. The terminal status is persisted
//! before the flight permit is released.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::reconciler::Reconciler;
use super::single_flight::FlightPermit;
use crate::db::{JobStore, JobStoreError};
use crate::models::{
    FailureCode, JobFailure, JobUpdate, ScanJob, StageId, StageOutput, TraceEntry,
    TransitionError,
};
use crate::stages::{RunContext, StageError, StageSet};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Company id written by the reconciler
    Completed(String),
    Failed(JobFailure),
    Cancelled,
}

impl RunOutcome {
    fn terminal_update(&self) -> JobUpdate {
        match self {
            RunOutcome::Completed(company_id) => JobUpdate::completed(company_id.clone()),
            RunOutcome::Failed(failure) => JobUpdate::failed(failure.clone()),
            RunOutcome::Cancelled => JobUpdate::cancelled(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    stages: StageSet,
    jobs: JobStore,
    reconciler: Reconciler,
    stage_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        stages: StageSet,
        jobs: JobStore,
        reconciler: Reconciler,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            stages,
            jobs,
            reconciler,
            stage_timeout,
        }
    }

    pub fn stages(&self) -> &StageSet {
        &self.stages
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Run `job` to a terminal state, then give the flight back
    pub async fn run(
        &self,
        job: ScanJob,
        permit: FlightPermit,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let started = std::time::Instant::now();
        tracing::info!(scan_id = %job.id, query = %job.query, "Scan started");

        let outcome = self.drive(&job, &cancel).await;
        self.persist_outcome(&job, &outcome).await;

        permit.release();

        match &outcome {
            RunOutcome::Completed(company_id) => tracing::info!(
                scan_id = %job.id,
                company_id = %company_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Scan completed"
            ),
            RunOutcome::Failed(failure) => tracing::warn!(
                scan_id = %job.id,
                code = failure.code.as_str(),
                error = %failure.message,
                "Scan failed"
            ),
            RunOutcome::Cancelled => tracing::info!(scan_id = %job.id, "Scan cancelled"),
        }
        outcome
    }

    async fn drive(&self, job: &ScanJob, cancel: &CancellationToken) -> RunOutcome {
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        if let Err(e) = self.jobs.update(job.id, JobUpdate::running()).await {
            return bookkeeping_failure("start", e);
        }

        let mut ctx = RunContext::new(job.id, job.query.clone(), job.depth, job.sources.clone());
        let mut completed = Vec::with_capacity(StageId::COUNT);
        let mut trace = Vec::new();

        for stage in self.stages.iter() {
            let stage_id = stage.id();
            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            tracing::debug!(scan_id = %job.id, stage = %stage_id, "Stage started");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RunOutcome::Cancelled,
                result = tokio::time::timeout(self.stage_timeout, stage.run(&ctx)) => result,
            };

            let output = match result {
                Err(_) => {
                    return stage_failure(
                        FailureCode::StageTimeout,
                        stage_id,
                        StageError::Timeout(self.stage_timeout),
                    )
                }
                Ok(Err(e)) => return stage_failure(FailureCode::StageFailed, stage_id, e),
                Ok(Ok(output)) if output.stage() != stage_id => {
                    return stage_failure(
                        FailureCode::StageFailed,
                        stage_id,
                        StageError::UnexpectedOutput {
                            expected: stage_id,
                            actual: output.stage(),
                        },
                    )
                }
                Ok(Ok(output)) => output,
            };

            trace.push(TraceEntry::now(stage_id, output.describe()));
            completed.push(stage_id);
            let mut update = JobUpdate::stages_completed(completed.clone());
            if let StageOutput::Research(profile) = &output {
                update = update.with_target_label(profile.company_name.clone());
            }
            ctx.push(output);

            match self.jobs.update(job.id, update).await {
                Ok(updated) => tracing::info!(
                    scan_id = %job.id,
                    stage = %stage_id,
                    progress = updated.progress,
                    "Stage completed"
                ),
                Err(e) => return bookkeeping_failure("record progress", e),
            }
        }

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        match self
            .reconciler
            .reconcile(job.id, ctx.outputs(), trace)
            .await
        {
            Ok(company_id) => RunOutcome::Completed(company_id),
            Err(e) => RunOutcome::Failed(JobFailure::new(
                FailureCode::ReconciliationFailed,
                format!("Analysis succeeded but could not be saved: {}", e),
            )),
        }
    }

    async fn persist_outcome(&self, job: &ScanJob, outcome: &RunOutcome) {
        match self.jobs.update(job.id, outcome.terminal_update()).await {
            Ok(_) => {}
            Err(JobStoreError::Rejected {
                source: TransitionError::TerminalState(status),
                ..
            }) => {
                tracing::warn!(
                    scan_id = %job.id,
                    status = %status,
                    "Job was already terminal (taken over by watchdog), outcome discarded"
                );
            }
            Err(e) => {
                tracing::error!(scan_id = %job.id, error = %e, "Failed to persist scan outcome");
                // Never leave the job non-terminal once the executor is done with it
                let fallback = JobFailure::new(
                    FailureCode::Internal,
                    format!("Failed to persist scan outcome: {}", e),
                );
                if let Err(e) = self.jobs.update(job.id, JobUpdate::failed(fallback)).await {
                    tracing::error!(scan_id = %job.id, error = %e, "Failed to mark scan as failed");
                }
            }
        }
    }
}

fn stage_failure(code: FailureCode, stage: StageId, error: StageError) -> RunOutcome {
    RunOutcome::Failed(JobFailure::new(
        code,
        format!("Stage '{}' failed: {}", stage, error),
    ))
}

fn bookkeeping_failure(step: &str, error: JobStoreError) -> RunOutcome {
    RunOutcome::Failed(JobFailure::new(
        FailureCode::Internal,
        format!("Failed to {} scan job: {}", step, error),
    ))
}
