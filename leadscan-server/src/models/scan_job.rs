//! Scan job state machine
//!
//! QUEUED → RUNNING → {COMPLETED | FAILED | CANCELLED}
//!
//! `ScanJob::apply` is the single merge point for job updates. It rejects any
//! write that would move a terminal job, regress `agents_completed`, or reach
//! a terminal state without the data that state requires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::stage::{StageId, PIPELINE_VERSION};

/// Longest error message persisted on a job
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Job record created, executor not started
    Queued,
    /// Executor is working through the stages
    Running,
    /// All stages succeeded and the company record was written
    Completed,
    /// A stage or the reconciliation failed
    Failed,
    /// Stopped on request before finishing
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(ScanStatus::Queued),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            "cancelled" => Some(ScanStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }

    fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested scan depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDepth {
    Quick,
    #[default]
    Full,
}

impl ScanDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDepth::Quick => "quick",
            ScanDepth::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "quick" => Some(ScanDepth::Quick),
            "full" => Some(ScanDepth::Full),
            _ => None,
        }
    }

    /// Rough wall-clock estimate reported to the caller at trigger time
    pub fn estimated_duration_seconds(&self) -> u64 {
        match self {
            ScanDepth::Quick => 30,
            ScanDepth::Full => 120,
        }
    }
}

/// Error class of a failed job
///
/// Lets clients tell "analysis failed" apart from "analysis succeeded but
/// could not be saved".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// A stage returned an error
    StageFailed,
    /// A stage exceeded its deadline
    StageTimeout,
    /// All stages succeeded but the company store write failed
    ReconciliationFailed,
    /// Watchdog found the job making no progress
    WatchdogTimeout,
    /// Job was still active when the previous process stopped
    Interrupted,
    /// Executor bookkeeping failed
    Internal,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::StageFailed => "STAGE_FAILED",
            FailureCode::StageTimeout => "STAGE_TIMEOUT",
            FailureCode::ReconciliationFailed => "RECONCILIATION_FAILED",
            FailureCode::WatchdogTimeout => "WATCHDOG_TIMEOUT",
            FailureCode::Interrupted => "INTERRUPTED",
            FailureCode::Internal => "INTERNAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STAGE_FAILED" => Some(FailureCode::StageFailed),
            "STAGE_TIMEOUT" => Some(FailureCode::StageTimeout),
            "RECONCILIATION_FAILED" => Some(FailureCode::ReconciliationFailed),
            "WATCHDOG_TIMEOUT" => Some(FailureCode::WatchdogTimeout),
            "INTERRUPTED" => Some(FailureCode::Interrupted),
            "INTERNAL" => Some(FailureCode::Internal),
            _ => None,
        }
    }
}

/// Diagnostic attached to a failed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub code: FailureCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: truncate_message(&message.into()),
        }
    }
}

/// Rejected job update
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job is already {0} and cannot change")]
    TerminalState(ScanStatus),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: ScanStatus, to: ScanStatus },

    #[error("agents_completed {proposed:?} does not extend {current:?} in pipeline order")]
    CompletedRegression {
        current: Vec<StageId>,
        proposed: Vec<StageId>,
    },

    #[error("stages can only complete while the job is running (status: {0})")]
    NotRunning(ScanStatus),

    #[error("completed job requires a result_ref")]
    MissingResultRef,

    #[error("completed job still has pending stages: {0:?}")]
    PendingStages(Vec<StageId>),

    #[error("failed job requires an error")]
    MissingFailure,

    #[error("error supplied for non-failed status {0}")]
    UnexpectedFailure(ScanStatus),
}

/// Partial update merged into a job by `ScanJob::apply`
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<ScanStatus>,
    pub target_label: Option<String>,
    /// Full new `agents_completed` list; must extend the current one
    pub agents_completed: Option<Vec<StageId>>,
    pub failure: Option<JobFailure>,
    pub result_ref: Option<String>,
}

impl JobUpdate {
    pub fn running() -> Self {
        Self {
            status: Some(ScanStatus::Running),
            ..Default::default()
        }
    }

    pub fn stages_completed(agents_completed: Vec<StageId>) -> Self {
        Self {
            agents_completed: Some(agents_completed),
            ..Default::default()
        }
    }

    pub fn with_target_label(mut self, label: impl Into<String>) -> Self {
        self.target_label = Some(label.into());
        self
    }

    pub fn completed(result_ref: impl Into<String>) -> Self {
        Self {
            status: Some(ScanStatus::Completed),
            result_ref: Some(result_ref.into()),
            ..Default::default()
        }
    }

    pub fn failed(failure: JobFailure) -> Self {
        Self {
            status: Some(ScanStatus::Failed),
            failure: Some(failure),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: Some(ScanStatus::Cancelled),
            ..Default::default()
        }
    }
}

/// Durable scan job record
#[derive(Debug, Clone, PartialEq)]
pub struct ScanJob {
    pub id: Uuid,
    pub status: ScanStatus,
    /// Original request string
    pub query: String,
    /// Query until research resolves a company name
    pub target_label: String,
    /// `agents_completed.len() / StageId::COUNT`
    pub progress: f64,
    pub agents_completed: Vec<StageId>,
    pub agents_pending: Vec<StageId>,
    pub error_message: Option<String>,
    pub error_code: Option<FailureCode>,
    /// Company id produced by a completed job
    pub result_ref: Option<String>,
    pub depth: ScanDepth,
    pub sources: Vec<String>,
    pub pipeline_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    /// New queued job with every stage pending
    pub fn new(id: Uuid, query: impl Into<String>, depth: ScanDepth, sources: Vec<String>) -> Self {
        let query = query.into();
        let now = Utc::now();
        Self {
            id,
            status: ScanStatus::Queued,
            target_label: query.clone(),
            query,
            progress: 0.0,
            agents_completed: Vec::new(),
            agents_pending: StageId::ALL.to_vec(),
            error_message: None,
            error_code: None,
            result_ref: None,
            depth,
            sources,
            pipeline_version: PIPELINE_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress implied by a number of completed stages
    pub fn progress_for(completed: usize) -> f64 {
        (completed.min(StageId::COUNT) as f64) / (StageId::COUNT as f64)
    }

    /// Merge `update` into this job, or leave it untouched and explain why not
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::TerminalState(self.status));
        }

        let next_status = update.status.unwrap_or(self.status);
        if next_status != self.status && !self.status.can_transition_to(next_status) {
            return Err(TransitionError::IllegalTransition {
                from: self.status,
                to: next_status,
            });
        }

        let completed = match update.agents_completed {
            Some(proposed) => {
                let in_order = proposed.len() <= StageId::COUNT
                    && proposed.iter().zip(StageId::ALL.iter()).all(|(a, b)| a == b);
                if !in_order || proposed.len() < self.agents_completed.len() {
                    return Err(TransitionError::CompletedRegression {
                        current: self.agents_completed.clone(),
                        proposed,
                    });
                }
                if proposed.len() > self.agents_completed.len()
                    && next_status != ScanStatus::Running
                {
                    return Err(TransitionError::NotRunning(next_status));
                }
                proposed
            }
            None => self.agents_completed.clone(),
        };

        let pending: Vec<StageId> = StageId::ALL
            .iter()
            .copied()
            .filter(|s| !completed.contains(s))
            .collect();

        match next_status {
            ScanStatus::Completed => {
                if update.result_ref.is_none() && self.result_ref.is_none() {
                    return Err(TransitionError::MissingResultRef);
                }
                if !pending.is_empty() {
                    return Err(TransitionError::PendingStages(pending));
                }
            }
            ScanStatus::Failed => {
                if update.failure.is_none() {
                    return Err(TransitionError::MissingFailure);
                }
            }
            other => {
                if update.failure.is_some() {
                    return Err(TransitionError::UnexpectedFailure(other));
                }
            }
        }
        if next_status != ScanStatus::Completed && update.result_ref.is_some() {
            return Err(TransitionError::IllegalTransition {
                from: self.status,
                to: next_status,
            });
        }

        let now = Utc::now();
        self.status = next_status;
        self.progress = Self::progress_for(completed.len());
        self.agents_completed = completed;
        self.agents_pending = pending;
        if let Some(label) = update.target_label {
            self.target_label = label;
        }
        if let Some(failure) = update.failure {
            self.error_code = Some(failure.code);
            self.error_message = Some(failure.message);
        }
        if let Some(result_ref) = update.result_ref {
            self.result_ref = Some(result_ref);
        }
        self.updated_at = now;
        if next_status.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// Client-facing view of this job
    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            scan_id: self.id,
            status: self.status,
            progress: self.progress,
            target_label: self.target_label.clone(),
            agents_completed: self.agents_completed.clone(),
            agents_pending: self.agents_pending.clone(),
            error_message: self.error_message.clone(),
            error_code: self.error_code,
            result_ref: self.result_ref.clone(),
            pipeline_version: self.pipeline_version.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Poll response for `GET /api/v1/scan/{id}`
///
/// Holds no read-time derived values, so re-polling a terminal job yields an
/// identical body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub progress: f64,
    pub target_label: String,
    pub agents_completed: Vec<StageId>,
    pub agents_pending: Vec<StageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    pub pipeline_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Cut a message to `MAX_ERROR_MESSAGE_CHARS` characters
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ScanJob {
        ScanJob::new(Uuid::new_v4(), "Slice", ScanDepth::Full, vec!["web".to_string()])
    }

    fn running_job() -> ScanJob {
        let mut job = job();
        job.apply(JobUpdate::running()).unwrap();
        job
    }

    #[test]
    fn new_job_is_queued_with_all_stages_pending() {
        let job = job();
        assert_eq!(job.status, ScanStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert!(job.agents_completed.is_empty());
        assert_eq!(job.agents_pending, StageId::ALL.to_vec());
        assert_eq!(job.target_label, "Slice");
    }

    #[test]
    fn completing_a_stage_moves_it_out_of_pending() {
        let mut job = running_job();
        job.apply(JobUpdate::stages_completed(vec![StageId::Research]).with_target_label("Slice Inc"))
            .unwrap();

        assert_eq!(job.agents_completed, vec![StageId::Research]);
        assert_eq!(job.agents_pending.len(), 4);
        assert!(!job.agents_pending.contains(&StageId::Research));
        assert!((job.progress - 0.2).abs() < 1e-9);
        assert_eq!(job.target_label, "Slice Inc");
    }

    #[test]
    fn completed_list_cannot_regress_or_skip() {
        let mut job = running_job();
        job.apply(JobUpdate::stages_completed(vec![StageId::Research, StageId::Signals]))
            .unwrap();

        let backwards = job.apply(JobUpdate::stages_completed(vec![StageId::Research]));
        assert!(matches!(backwards, Err(TransitionError::CompletedRegression { .. })));

        let skipping = job.apply(JobUpdate::stages_completed(vec![
            StageId::Research,
            StageId::Signals,
            StageId::Strategy,
        ]));
        assert!(matches!(skipping, Err(TransitionError::CompletedRegression { .. })));

        let duplicate = job.apply(JobUpdate::stages_completed(vec![
            StageId::Research,
            StageId::Signals,
            StageId::Signals,
        ]));
        assert!(matches!(duplicate, Err(TransitionError::CompletedRegression { .. })));

        assert_eq!(job.agents_completed, vec![StageId::Research, StageId::Signals]);
    }

    #[test]
    fn stages_cannot_complete_before_running() {
        let mut job = job();
        let result = job.apply(JobUpdate::stages_completed(vec![StageId::Research]));
        assert_eq!(result, Err(TransitionError::NotRunning(ScanStatus::Queued)));
    }

    #[test]
    fn completion_requires_result_ref_and_all_stages() {
        let mut job = running_job();
        job.apply(JobUpdate::stages_completed(StageId::ALL[..4].to_vec()))
            .unwrap();

        let early = job.apply(JobUpdate::completed("slice"));
        assert_eq!(early, Err(TransitionError::PendingStages(vec![StageId::Outreach])));

        job.apply(JobUpdate::stages_completed(StageId::ALL.to_vec())).unwrap();
        let missing_ref = job.apply(JobUpdate {
            status: Some(ScanStatus::Completed),
            ..Default::default()
        });
        assert_eq!(missing_ref, Err(TransitionError::MissingResultRef));

        job.apply(JobUpdate::completed("slice")).unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.progress, 1.0);
        assert_eq!(job.result_ref.as_deref(), Some("slice"));
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn failure_keeps_pending_stages_and_records_error() {
        let mut job = running_job();
        job.apply(JobUpdate::stages_completed(vec![StageId::Research, StageId::Signals]))
            .unwrap();
        job.apply(JobUpdate::failed(JobFailure::new(
            FailureCode::StageFailed,
            "stage 'scoring' failed: upstream returned garbage",
        )))
        .unwrap();

        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(job.error_code, Some(FailureCode::StageFailed));
        assert_eq!(
            job.agents_pending,
            vec![StageId::Scoring, StageId::Strategy, StageId::Outreach]
        );
        assert!((job.progress - 0.4).abs() < 1e-9);
    }

    #[test]
    fn terminal_jobs_are_immutable() {
        let mut job = running_job();
        job.apply(JobUpdate::cancelled()).unwrap();
        let before = job.clone();

        let result = job.apply(JobUpdate::failed(JobFailure::new(FailureCode::Internal, "late")));
        assert_eq!(result, Err(TransitionError::TerminalState(ScanStatus::Cancelled)));
        assert_eq!(job, before);
    }

    #[test]
    fn failed_requires_error_and_others_reject_it() {
        let mut job = running_job();
        let missing = job.apply(JobUpdate {
            status: Some(ScanStatus::Failed),
            ..Default::default()
        });
        assert_eq!(missing, Err(TransitionError::MissingFailure));

        let unexpected = job.apply(JobUpdate {
            failure: Some(JobFailure::new(FailureCode::Internal, "x")),
            ..Default::default()
        });
        assert_eq!(unexpected, Err(TransitionError::UnexpectedFailure(ScanStatus::Running)));
    }

    #[test]
    fn queued_cannot_jump_to_completed() {
        let mut job = job();
        let result = job.apply(JobUpdate::completed("slice"));
        assert_eq!(
            result,
            Err(TransitionError::IllegalTransition {
                from: ScanStatus::Queued,
                to: ScanStatus::Completed
            })
        );
    }

    #[test]
    fn error_messages_are_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_MESSAGE_CHARS + 20);
        let failure = JobFailure::new(FailureCode::StageFailed, long);
        assert_eq!(failure.message.chars().count(), MAX_ERROR_MESSAGE_CHARS);
    }

    #[test]
    fn snapshot_omits_absent_optionals() {
        let json = serde_json::to_value(job().snapshot()).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json.get("error_message").is_none());
        assert!(json.get("result_ref").is_none());
        assert_eq!(json["agents_pending"].as_array().unwrap().len(), 5);
    }
}
