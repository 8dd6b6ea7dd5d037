//! Scan job persistence
//!
//! `update` loads, merges (`ScanJob::apply`) and writes inside one
//! transaction, so a poller never observes a half-applied update and an
//! illegal update leaves the stored row untouched.

use chrono::{DateTime, Utc};
use leadscan_common::Error;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use thiserror::Error as ThisError;
use uuid::Uuid;

use super::companies::reconciled_company_id;
use super::{format_time, parse_time};
use crate::models::{
    FailureCode, JobFailure, JobUpdate, ScanDepth, ScanJob, ScanStatus, StageId, TransitionError,
};
use crate::utils::retry_on_lock;

const SELECT_JOB: &str = r#"
    SELECT id, status, query, target_label, progress, agents_completed, agents_pending,
           error_message, error_code, result_ref, depth, sources, pipeline_version,
           created_at, updated_at, ended_at
    FROM scan_jobs
"#;

/// Job store failure
#[derive(Debug, ThisError)]
pub enum JobStoreError {
    #[error("Scan job not found: {0}")]
    NotFound(Uuid),

    /// Update rejected by the state machine; the row is unchanged
    #[error("Rejected update for scan job {id}: {source}")]
    Rejected {
        id: Uuid,
        #[source]
        source: TransitionError,
    },

    #[error(transparent)]
    Storage(#[from] Error),
}

/// Durable scan job table
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl JobStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Insert a new queued job under an id reserved by the caller
    pub async fn create(
        &self,
        id: Uuid,
        query: &str,
        depth: ScanDepth,
        sources: Vec<String>,
    ) -> Result<ScanJob, JobStoreError> {
        let job = ScanJob::new(id, query, depth, sources);

        retry_on_lock("create scan job", self.max_lock_wait_ms, || {
            insert_job(&self.pool, &job)
        })
        .await?;

        tracing::debug!(scan_id = %job.id, query, "Scan job created");
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ScanJob>, JobStoreError> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_JOB))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    /// Merge `update` into the stored job atomically
    pub async fn update(&self, id: Uuid, update: JobUpdate) -> Result<ScanJob, JobStoreError> {
        let outcome = retry_on_lock("update scan job", self.max_lock_wait_ms, || {
            apply_in_transaction(&self.pool, id, update.clone())
        })
        .await?;

        match outcome {
            None => Err(JobStoreError::NotFound(id)),
            Some(Err(source)) => Err(JobStoreError::Rejected { id, source }),
            Some(Ok(job)) => Ok(job),
        }
    }

    /// Most recent job that is still queued or running
    pub async fn active(&self) -> Result<Option<ScanJob>, JobStoreError> {
        let row = sqlx::query(&format!(
            "{} WHERE status IN ('queued', 'running') ORDER BY created_at DESC LIMIT 1",
            SELECT_JOB
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    /// Non-terminal jobs not updated since `cutoff`
    pub async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<ScanJob>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE status IN ('queued', 'running') AND updated_at < ? ORDER BY created_at",
            SELECT_JOB
        ))
        .bind(format_time(&cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(rows.iter().map(job_from_row).collect::<Result<_, _>>()?)
    }

    /// Most recently finished successful job
    pub async fn last_completed(&self) -> Result<Option<ScanJob>, JobStoreError> {
        let row = sqlx::query(&format!(
            "{} WHERE status = 'completed' ORDER BY ended_at DESC LIMIT 1",
            SELECT_JOB
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    /// Close out every job a previous process left queued or running
    ///
    /// Run once at startup, before the API accepts triggers. Jobs whose
    /// company was already committed are completed, the rest fail as
    /// interrupted. Returns the number of jobs closed out.
    pub async fn cleanup_stale_jobs(&self) -> Result<usize, JobStoreError> {
        let leftovers = self.stale(Utc::now() + chrono::Duration::seconds(1)).await?;
        let mut cleaned = 0;

        for job in leftovers {
            let failure = JobFailure::new(
                FailureCode::Interrupted,
                format!(
                    "Scan was {} when the service stopped; trigger a new scan",
                    job.status
                ),
            );
            match self.finish_abandoned(job.id, failure).await {
                Ok(_) => cleaned += 1,
                Err(JobStoreError::Rejected { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if cleaned > 0 {
            tracing::warn!(count = cleaned, "Closed out scan jobs left by previous process");
        }
        Ok(cleaned)
    }

    /// Close out a job whose executor is gone or wedged
    ///
    /// A job already recorded in `reconciliations` owns a company record, so
    /// it is completed with that company id; any other job gets `failure`.
    pub async fn finish_abandoned(
        &self,
        id: Uuid,
        failure: JobFailure,
    ) -> Result<ScanJob, JobStoreError> {
        let mut conn = self.pool.acquire().await.map_err(Error::from)?;
        let company_id = reconciled_company_id(&mut *conn, id).await?;
        // Memory pools hold a single connection
        drop(conn);

        match company_id {
            Some(company_id) => {
                tracing::info!(
                    scan_id = %id,
                    company_id = %company_id,
                    "Abandoned scan was already reconciled, completing it"
                );
                self.update(id, JobUpdate::completed(company_id)).await
            }
            None => self.update(id, JobUpdate::failed(failure)).await,
        }
    }
}

/// Load, merge and write one job inside a transaction
///
/// `Ok(None)` when the job does not exist, `Ok(Some(Err(_)))` when the merge
/// was rejected and the transaction rolled back.
async fn apply_in_transaction(
    pool: &SqlitePool,
    id: Uuid,
    update: JobUpdate,
) -> leadscan_common::Result<Option<Result<ScanJob, TransitionError>>> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_JOB))
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut job = job_from_row(&row)?;

    if let Err(rejected) = job.apply(update) {
        tx.rollback().await?;
        return Ok(Some(Err(rejected)));
    }

    write_job(&mut tx, &job).await?;
    tx.commit().await?;
    Ok(Some(Ok(job)))
}

async fn insert_job(pool: &SqlitePool, job: &ScanJob) -> leadscan_common::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scan_jobs (
            id, status, query, target_label, progress, agents_completed, agents_pending,
            error_message, error_code, result_ref, depth, sources, pipeline_version,
            created_at, updated_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.status.as_str())
    .bind(&job.query)
    .bind(&job.target_label)
    .bind(job.progress)
    .bind(to_json(&job.agents_completed)?)
    .bind(to_json(&job.agents_pending)?)
    .bind(&job.error_message)
    .bind(job.error_code.map(|c| c.as_str()))
    .bind(&job.result_ref)
    .bind(job.depth.as_str())
    .bind(to_json(&job.sources)?)
    .bind(&job.pipeline_version)
    .bind(format_time(&job.created_at))
    .bind(format_time(&job.updated_at))
    .bind(job.ended_at.as_ref().map(format_time))
    .execute(pool)
    .await?;

    Ok(())
}

async fn write_job(conn: &mut SqliteConnection, job: &ScanJob) -> leadscan_common::Result<()> {
    sqlx::query(
        r#"
        UPDATE scan_jobs SET
            status = ?, target_label = ?, progress = ?, agents_completed = ?,
            agents_pending = ?, error_message = ?, error_code = ?, result_ref = ?,
            updated_at = ?, ended_at = ?
        WHERE id = ?
        "#,
    )
    .bind(job.status.as_str())
    .bind(&job.target_label)
    .bind(job.progress)
    .bind(to_json(&job.agents_completed)?)
    .bind(to_json(&job.agents_pending)?)
    .bind(&job.error_message)
    .bind(job.error_code.map(|c| c.as_str()))
    .bind(&job.result_ref)
    .bind(format_time(&job.updated_at))
    .bind(job.ended_at.as_ref().map(format_time))
    .bind(job.id.to_string())
    .execute(conn)
    .await?;

    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> leadscan_common::Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("Failed to serialize: {}", e)))
}

fn from_json<T: serde::de::DeserializeOwned>(column: &str, value: &str) -> leadscan_common::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

fn job_from_row(row: &SqliteRow) -> leadscan_common::Result<ScanJob> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid scan job id '{}': {}", id, e)))?;

    let status: String = row.get("status");
    let status = ScanStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown scan status '{}'", status)))?;

    let depth: String = row.get("depth");
    let depth = ScanDepth::parse(&depth)
        .ok_or_else(|| Error::Internal(format!("Unknown scan depth '{}'", depth)))?;

    let error_code: Option<String> = row.get("error_code");
    let error_code = error_code
        .map(|code| {
            FailureCode::parse(&code)
                .ok_or_else(|| Error::Internal(format!("Unknown error code '{}'", code)))
        })
        .transpose()?;

    let agents_completed: Vec<StageId> =
        from_json("agents_completed", row.get::<String, _>("agents_completed").as_str())?;
    let agents_pending: Vec<StageId> =
        from_json("agents_pending", row.get::<String, _>("agents_pending").as_str())?;
    let sources: Vec<String> = from_json("sources", row.get::<String, _>("sources").as_str())?;

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|value| parse_time("ended_at", &value))
        .transpose()?;

    Ok(ScanJob {
        id,
        status,
        query: row.get("query"),
        target_label: row.get("target_label"),
        progress: row.get("progress"),
        agents_completed,
        agents_pending,
        error_message: row.get("error_message"),
        error_code,
        result_ref: row.get("result_ref"),
        depth,
        sources,
        pipeline_version: row.get("pipeline_version"),
        created_at: parse_time("created_at", row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_time("updated_at", row.get::<String, _>("updated_at").as_str())?,
        ended_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    async fn store() -> JobStore {
        JobStore::new(init_memory_pool().await.unwrap(), 1000)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store().await;
        let job = store
            .create(Uuid::new_v4(), "Slice", ScanDepth::Quick, vec!["web".to_string()])
            .await
            .unwrap();

        let loaded = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScanStatus::Queued);
        assert_eq!(loaded.query, "Slice");
        assert_eq!(loaded.depth, ScanDepth::Quick);
        assert_eq!(loaded.agents_pending, StageId::ALL.to_vec());
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_update_leaves_row_unchanged() {
        let store = store().await;
        let job = store.create(Uuid::new_v4(), "Slice", ScanDepth::Full, Vec::new()).await.unwrap();
        store.update(job.id, JobUpdate::running()).await.unwrap();
        store
            .update(job.id, JobUpdate::stages_completed(vec![StageId::Research]))
            .await
            .unwrap();
        let before = store.get(job.id).await.unwrap().unwrap();

        let result = store
            .update(job.id, JobUpdate::stages_completed(Vec::new()))
            .await;
        assert!(matches!(result, Err(JobStoreError::Rejected { .. })));
        assert_eq!(store.get(job.id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn update_of_unknown_job_is_not_found() {
        let store = store().await;
        let result = store.update(Uuid::new_v4(), JobUpdate::running()).await;
        assert!(matches!(result, Err(JobStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn active_ignores_terminal_jobs() {
        let store = store().await;
        let done = store.create(Uuid::new_v4(), "Old", ScanDepth::Full, Vec::new()).await.unwrap();
        store.update(done.id, JobUpdate::cancelled()).await.unwrap();
        assert!(store.active().await.unwrap().is_none());

        let live = store.create(Uuid::new_v4(), "New", ScanDepth::Full, Vec::new()).await.unwrap();
        assert_eq!(store.active().await.unwrap().unwrap().id, live.id);
    }

    #[tokio::test]
    async fn cleanup_fails_leftover_jobs_as_interrupted() {
        let store = store().await;
        let queued = store.create(Uuid::new_v4(), "A", ScanDepth::Full, Vec::new()).await.unwrap();
        let running = store.create(Uuid::new_v4(), "B", ScanDepth::Full, Vec::new()).await.unwrap();
        store.update(running.id, JobUpdate::running()).await.unwrap();

        assert_eq!(store.cleanup_stale_jobs().await.unwrap(), 2);

        for id in [queued.id, running.id] {
            let job = store.get(id).await.unwrap().unwrap();
            assert_eq!(job.status, ScanStatus::Failed);
            assert_eq!(job.error_code, Some(FailureCode::Interrupted));
        }
        assert!(store.active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_completes_job_that_was_already_reconciled() {
        let store = store().await;
        let job = store.create(Uuid::new_v4(), "Slice", ScanDepth::Full, Vec::new()).await.unwrap();
        store.update(job.id, JobUpdate::running()).await.unwrap();
        store
            .update(job.id, JobUpdate::stages_completed(StageId::ALL.to_vec()))
            .await
            .unwrap();

        // Company committed, process gone before the COMPLETED write
        sqlx::query("INSERT INTO reconciliations (job_id, company_id, reconciled_at) VALUES (?, ?, ?)")
            .bind(job.id.to_string())
            .bind("slice")
            .bind(format_time(&Utc::now()))
            .execute(&store.pool)
            .await
            .unwrap();

        assert_eq!(store.cleanup_stale_jobs().await.unwrap(), 1);

        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.result_ref.as_deref(), Some("slice"));
        assert!(job.error_code.is_none());
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn stale_uses_updated_at_cutoff() {
        let store = store().await;
        let job = store.create(Uuid::new_v4(), "Slice", ScanDepth::Full, Vec::new()).await.unwrap();

        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(store.stale(past).await.unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::seconds(60);
        let stale = store.stale(future).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, job.id);
    }
}
