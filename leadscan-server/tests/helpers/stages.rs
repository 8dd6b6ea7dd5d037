//! Test doubles for the stage contract

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leadscan_server::models::{StageId, StageOutput};
use leadscan_server::stages::{
    OutreachStage, ResearchStage, RunContext, ScoringStage, SignalsStage, Stage, StageError,
    StageSet, StrategyStage,
};

/// Always fails with `error`
pub struct FailingStage {
    pub id: StageId,
    pub error: StageError,
}

#[async_trait]
impl Stage for FailingStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn run(&self, _ctx: &RunContext) -> Result<StageOutput, StageError> {
        Err(self.error.clone())
    }
}

/// Never returns
pub struct HangingStage {
    pub id: StageId,
}

#[async_trait]
impl Stage for HangingStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn run(&self, _ctx: &RunContext) -> Result<StageOutput, StageError> {
        std::future::pending::<Result<StageOutput, StageError>>().await
    }
}

/// Delays, then delegates to the built-in stage
pub struct SlowStage {
    pub inner: Arc<dyn Stage>,
    pub delay: Duration,
}

#[async_trait]
impl Stage for SlowStage {
    fn id(&self) -> StageId {
        self.inner.id()
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.run(ctx).await
    }
}

/// Claims to be `signals` but returns a research profile
pub struct MislabelledStage;

#[async_trait]
impl Stage for MislabelledStage {
    fn id(&self) -> StageId {
        StageId::Signals
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        ResearchStage.run(ctx).await
    }
}

/// Built-in research whose resolved name has no letters or digits
pub struct UnnamedResearchStage;

#[async_trait]
impl Stage for UnnamedResearchStage {
    fn id(&self) -> StageId {
        StageId::Research
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        match ResearchStage.run(ctx).await? {
            StageOutput::Research(mut profile) => {
                profile.company_name = "???".to_string();
                Ok(StageOutput::Research(profile))
            }
            other => Ok(other),
        }
    }
}

/// Built-in stage for `id`
pub fn builtin(id: StageId) -> Arc<dyn Stage> {
    match id {
        StageId::Research => Arc::new(ResearchStage),
        StageId::Signals => Arc::new(SignalsStage),
        StageId::Scoring => Arc::new(ScoringStage),
        StageId::Strategy => Arc::new(StrategyStage),
        StageId::Outreach => Arc::new(OutreachStage),
    }
}

/// Offline stage set with the stage of the same id swapped for `replacement`
pub fn with_stage(replacement: Arc<dyn Stage>) -> StageSet {
    let stages = StageId::ALL
        .iter()
        .map(|id| {
            if *id == replacement.id() {
                Arc::clone(&replacement)
            } else {
                builtin(*id)
            }
        })
        .collect();
    StageSet::new(stages).expect("canonical stage order")
}

/// Every built-in stage slowed by `delay`
pub fn slow_stages(delay: Duration) -> StageSet {
    let stages = StageId::ALL
        .iter()
        .map(|id| Arc::new(SlowStage { inner: builtin(*id), delay }) as Arc<dyn Stage>)
        .collect();
    StageSet::new(stages).expect("canonical stage order")
}
