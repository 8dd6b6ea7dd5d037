//! Stage contract
//!
//! Every analysis stage implements [`Stage`]: given the accumulated
//! [`RunContext`] it returns its typed [`StageOutput`] or a [`StageError`].
//! The executor owns ordering, deadlines and persistence; stages only compute.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Company, OutreachDraft, ResearchProfile, ScanDepth, ScoreBreakdown, SignalSet, StageId,
    StageOutput, StrategyPlan,
};

pub mod builtin;

pub use builtin::{OutreachStage, ResearchStage, ScoringStage, SignalsStage, StrategyStage};

/// Stage failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// External source could not be reached or returned an error
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Input or upstream data could not be interpreted
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// Stage exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A required upstream output is absent from the context
    #[error("missing output from stage '{0}'")]
    MissingDependency(StageId),

    /// Stage returned a variant that belongs to another stage
    #[error("stage '{expected}' returned output for '{actual}'")]
    UnexpectedOutput { expected: StageId, actual: StageId },
}

/// One step of the analysis pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which canonical stage this implements
    fn id(&self) -> StageId;

    /// Run against the outputs of all prior stages
    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError>;
}

/// Accumulating input for one pipeline run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: Uuid,
    /// Query or company name the run was triggered with
    pub target_hint: String,
    pub depth: ScanDepth,
    pub sources: Vec<String>,
    outputs: Vec<StageOutput>,
}

impl RunContext {
    pub fn new(job_id: Uuid, target_hint: impl Into<String>, depth: ScanDepth, sources: Vec<String>) -> Self {
        Self {
            job_id,
            target_hint: target_hint.into(),
            depth,
            sources,
            outputs: Vec::new(),
        }
    }

    /// Context holding every upstream output of an already reconciled company,
    /// used to re-run the outreach stage alone
    pub fn for_outreach(company: &Company) -> Self {
        Self {
            job_id: company.job_id,
            target_hint: company.name.clone(),
            depth: ScanDepth::Full,
            sources: company.profile.sources.clone(),
            outputs: vec![
                StageOutput::Research(company.profile.clone()),
                StageOutput::Signals(company.signals.clone()),
                StageOutput::Scoring(company.scoring.clone()),
                StageOutput::Strategy(company.strategy.clone()),
            ],
        }
    }

    /// Record a stage output (executor only)
    pub(crate) fn push(&mut self, output: StageOutput) {
        self.outputs.push(output);
    }

    pub fn outputs(&self) -> &[StageOutput] {
        &self.outputs
    }

    pub fn into_outputs(self) -> Vec<StageOutput> {
        self.outputs
    }

    pub fn research(&self) -> Result<&ResearchProfile, StageError> {
        self.outputs
            .iter()
            .find_map(|o| match o {
                StageOutput::Research(p) => Some(p),
                _ => None,
            })
            .ok_or(StageError::MissingDependency(StageId::Research))
    }

    pub fn signals(&self) -> Result<&SignalSet, StageError> {
        self.outputs
            .iter()
            .find_map(|o| match o {
                StageOutput::Signals(s) => Some(s),
                _ => None,
            })
            .ok_or(StageError::MissingDependency(StageId::Signals))
    }

    pub fn scoring(&self) -> Result<&ScoreBreakdown, StageError> {
        self.outputs
            .iter()
            .find_map(|o| match o {
                StageOutput::Scoring(s) => Some(s),
                _ => None,
            })
            .ok_or(StageError::MissingDependency(StageId::Scoring))
    }

    pub fn strategy(&self) -> Result<&StrategyPlan, StageError> {
        self.outputs
            .iter()
            .find_map(|o| match o {
                StageOutput::Strategy(s) => Some(s),
                _ => None,
            })
            .ok_or(StageError::MissingDependency(StageId::Strategy))
    }

    pub fn outreach(&self) -> Result<&OutreachDraft, StageError> {
        self.outputs
            .iter()
            .find_map(|o| match o {
                StageOutput::Outreach(d) => Some(d),
                _ => None,
            })
            .ok_or(StageError::MissingDependency(StageId::Outreach))
    }
}

/// Stage list that does not match the canonical pipeline
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageSetError {
    #[error("expected {expected} stages, got {actual}")]
    WrongCount { expected: usize, actual: usize },

    #[error("position {position}: expected stage '{expected}', found '{found}'")]
    OutOfOrder {
        position: usize,
        expected: StageId,
        found: StageId,
    },
}

/// The canonical stages, validated to appear once each in pipeline order
#[derive(Clone)]
pub struct StageSet {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageSet {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self, StageSetError> {
        if stages.len() != StageId::COUNT {
            return Err(StageSetError::WrongCount {
                expected: StageId::COUNT,
                actual: stages.len(),
            });
        }
        for (position, (stage, expected)) in stages.iter().zip(StageId::ALL.iter()).enumerate() {
            if stage.id() != *expected {
                return Err(StageSetError::OutOfOrder {
                    position,
                    expected: *expected,
                    found: stage.id(),
                });
            }
        }
        Ok(Self { stages })
    }

    /// Deterministic built-in stages that need no external sources
    pub fn offline() -> Self {
        Self {
            stages: vec![
                Arc::new(ResearchStage),
                Arc::new(SignalsStage),
                Arc::new(ScoringStage),
                Arc::new(StrategyStage),
                Arc::new(OutreachStage),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    pub fn get(&self, id: StageId) -> Option<&Arc<dyn Stage>> {
        self.stages.iter().find(|s| s.id() == id)
    }
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_set_is_canonical() {
        let set = StageSet::offline();
        let ids: Vec<StageId> = set.iter().map(|s| s.id()).collect();
        assert_eq!(ids, StageId::ALL.to_vec());
        assert!(StageSet::new(set.iter().cloned().collect()).is_ok());
    }

    #[test]
    fn out_of_order_set_is_rejected() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ResearchStage),
            Arc::new(ScoringStage),
            Arc::new(SignalsStage),
            Arc::new(StrategyStage),
            Arc::new(OutreachStage),
        ];
        assert_eq!(
            StageSet::new(stages).unwrap_err(),
            StageSetError::OutOfOrder {
                position: 1,
                expected: StageId::Signals,
                found: StageId::Scoring,
            }
        );
    }

    #[test]
    fn short_set_is_rejected() {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(ResearchStage)];
        assert!(matches!(
            StageSet::new(stages),
            Err(StageSetError::WrongCount { expected: 5, actual: 1 })
        ));
    }

    #[test]
    fn accessors_report_missing_dependency() {
        let ctx = RunContext::new(Uuid::new_v4(), "Slice", ScanDepth::Full, Vec::new());
        assert_eq!(
            ctx.scoring().unwrap_err(),
            StageError::MissingDependency(StageId::Scoring)
        );
    }
}
