//! Reconciler
//!
//! Turns the five stage outputs of a successful job into one `Company` and
//! commits it. The merge is pure; the commit upserts the company and records
//! the job in `reconciliations` in one transaction, so a job is reconciled at
//! most once and a company row is either fully written or untouched.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::companies::{existing_created_at, reconciled_company_id, upsert_reconciled};
use crate::db::CompanyStore;
use crate::models::{
    company_slug, receptivity_for, Company, OutreachDraft, StageId, StageOutput, TraceEntry,
};
use crate::utils::retry_on_lock;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("missing output for stage '{0}'")]
    MissingOutput(StageId),

    #[error("duplicate output for stage '{0}'")]
    DuplicateOutput(StageId),

    #[error("resolved company name '{0}' does not yield a usable id")]
    EmptyIdentity(String),

    #[error("company '{0}' not found")]
    UnknownCompany(String),

    #[error(transparent)]
    Storage(#[from] leadscan_common::Error),
}

/// Sole writer of the company store
#[derive(Debug, Clone)]
pub struct Reconciler {
    companies: CompanyStore,
}

impl Reconciler {
    pub fn new(companies: CompanyStore) -> Self {
        Self { companies }
    }

    pub fn companies(&self) -> &CompanyStore {
        &self.companies
    }

    /// Assemble a company record from stage outputs
    ///
    /// Each canonical stage must appear exactly once.
    pub fn merge(
        job_id: Uuid,
        outputs: &[StageOutput],
        trace: Vec<TraceEntry>,
        now: DateTime<Utc>,
    ) -> Result<Company, ReconcileError> {
        let mut profile = None;
        let mut signals = None;
        let mut scoring = None;
        let mut strategy = None;
        let mut outreach = None;

        for output in outputs {
            let duplicate = match output {
                StageOutput::Research(p) => profile.replace(p.clone()).is_some(),
                StageOutput::Signals(s) => signals.replace(s.clone()).is_some(),
                StageOutput::Scoring(s) => scoring.replace(s.clone()).is_some(),
                StageOutput::Strategy(s) => strategy.replace(s.clone()).is_some(),
                StageOutput::Outreach(o) => outreach.replace(o.clone()).is_some(),
            };
            if duplicate {
                return Err(ReconcileError::DuplicateOutput(output.stage()));
            }
        }

        let profile = profile.ok_or(ReconcileError::MissingOutput(StageId::Research))?;
        let signals = signals.ok_or(ReconcileError::MissingOutput(StageId::Signals))?;
        let scoring = scoring.ok_or(ReconcileError::MissingOutput(StageId::Scoring))?;
        let strategy = strategy.ok_or(ReconcileError::MissingOutput(StageId::Strategy))?;
        let outreach = outreach.ok_or(ReconcileError::MissingOutput(StageId::Outreach))?;

        let id = company_slug(&profile.company_name);
        if id.is_empty() {
            return Err(ReconcileError::EmptyIdentity(profile.company_name));
        }

        Ok(Company {
            id,
            name: profile.company_name.clone(),
            descriptor: profile.descriptor.clone(),
            score: scoring.score(),
            confidence: scoring.priority,
            coverage: ((signals.coverage * 100.0).round() as i64).clamp(0, 100),
            receptivity: receptivity_for(scoring.priority).to_string(),
            job_id,
            profile,
            signals,
            scoring,
            strategy,
            outreach,
            trace,
            created_at: now,
            updated_at: now,
        })
    }

    /// Merge and commit; returns the company id
    ///
    /// Idempotent per job id: a job that was already reconciled returns its
    /// recorded company id without writing anything.
    pub async fn reconcile(
        &self,
        job_id: Uuid,
        outputs: &[StageOutput],
        trace: Vec<TraceEntry>,
    ) -> Result<String, ReconcileError> {
        let company = Self::merge(job_id, outputs, trace, Utc::now())?;

        let company_id = retry_on_lock("reconcile company", self.companies.max_lock_wait_ms(), || {
            commit(&self.companies, &company)
        })
        .await?;

        Ok(company_id)
    }

    /// Replace a company's outreach draft after regeneration
    pub async fn replace_outreach(
        &self,
        company_id: &str,
        outreach: &OutreachDraft,
        entry: &TraceEntry,
    ) -> Result<(), ReconcileError> {
        if self
            .companies
            .replace_outreach(company_id, outreach, entry)
            .await?
        {
            Ok(())
        } else {
            Err(ReconcileError::UnknownCompany(company_id.to_string()))
        }
    }
}

async fn commit(companies: &CompanyStore, company: &Company) -> leadscan_common::Result<String> {
    let mut tx = companies.pool().begin().await?;

    if let Some(existing) = reconciled_company_id(&mut tx, company.job_id).await? {
        tx.rollback().await?;
        tracing::debug!(scan_id = %company.job_id, company_id = %existing, "Job already reconciled");
        return Ok(existing);
    }

    let mut record = company.clone();
    if let Some(created_at) = existing_created_at(&mut tx, &record.id).await? {
        record.created_at = created_at;
    }
    upsert_reconciled(&mut tx, &record).await?;
    tx.commit().await?;

    tracing::info!(
        scan_id = %record.job_id,
        company_id = %record.id,
        score = record.score,
        "Company reconciled"
    );
    Ok(record.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanDepth;
    use crate::stages::{RunContext, StageSet};

    async fn outputs_for(name: &str) -> Vec<StageOutput> {
        let mut ctx = RunContext::new(Uuid::new_v4(), name, ScanDepth::Full, vec!["web".into()]);
        for stage in StageSet::offline().iter() {
            let output = stage.run(&ctx).await.unwrap();
            ctx.push(output);
        }
        ctx.into_outputs()
    }

    #[tokio::test]
    async fn merge_builds_company_from_all_stages() {
        let outputs = outputs_for("Slice").await;
        let company = Reconciler::merge(Uuid::new_v4(), &outputs, Vec::new(), Utc::now()).unwrap();

        assert_eq!(company.id, "slice");
        assert_eq!(company.name, "Slice");
        assert_eq!(company.confidence, company.scoring.priority);
        assert_eq!(company.score, company.scoring.score());
        assert_eq!(company.receptivity, receptivity_for(company.confidence));
    }

    #[tokio::test]
    async fn merge_rejects_missing_and_duplicate_outputs() {
        let outputs = outputs_for("Slice").await;

        let missing = Reconciler::merge(Uuid::new_v4(), &outputs[..4], Vec::new(), Utc::now());
        assert!(matches!(missing, Err(ReconcileError::MissingOutput(StageId::Outreach))));

        let mut doubled = outputs.clone();
        doubled.push(outputs[1].clone());
        let duplicate = Reconciler::merge(Uuid::new_v4(), &doubled, Vec::new(), Utc::now());
        assert!(matches!(duplicate, Err(ReconcileError::DuplicateOutput(StageId::Signals))));
    }

    #[tokio::test]
    async fn merge_rejects_empty_identity() {
        let mut outputs = outputs_for("Slice").await;
        if let StageOutput::Research(profile) = &mut outputs[0] {
            profile.company_name = "!!!".to_string();
        }
        let result = Reconciler::merge(Uuid::new_v4(), &outputs, Vec::new(), Utc::now());
        assert!(matches!(result, Err(ReconcileError::EmptyIdentity(_))));
    }
}
