//! Company store
//!
//! Read side for the lead board and report views. Writes go through the
//! reconciler only: `upsert_reconciled` inside its transaction, and
//! `replace_outreach` for outreach regeneration.

use leadscan_common::Error;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_time, parse_time};
use crate::models::{Company, CompanySummary, Level, OutreachDraft, TraceEntry};
use crate::utils::retry_on_lock;

const SELECT_COMPANY: &str = r#"
    SELECT id, name, descriptor, score, confidence, coverage, receptivity, job_id,
           profile, signals, scoring, strategy, outreach, trace, created_at, updated_at
    FROM companies
"#;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Lead board sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySort {
    #[default]
    Score,
    Name,
    Confidence,
    UpdatedAt,
}

impl CompanySort {
    fn column(&self) -> &'static str {
        match self {
            CompanySort::Score => "score",
            CompanySort::Name => "name COLLATE NOCASE",
            CompanySort::Confidence => "confidence_rank",
            CompanySort::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter, sort and page for `CompanyStore::list`
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyQuery {
    pub confidence: Option<Level>,
    pub min_score: Option<i64>,
    pub sort: CompanySort,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for CompanyQuery {
    fn default() -> Self {
        Self {
            confidence: None,
            min_score: None,
            sort: CompanySort::default(),
            order: SortOrder::default(),
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

/// One page of lead board rows
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CompanyPage {
    pub data: Vec<CompanySummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Durable company records
#[derive(Debug, Clone)]
pub struct CompanyStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl CompanyStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn max_lock_wait_ms(&self) -> u64 {
        self.max_lock_wait_ms
    }

    pub async fn get(&self, id: &str) -> leadscan_common::Result<Option<Company>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COMPANY))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(company_from_row).transpose()
    }

    pub async fn exists(&self, id: &str) -> leadscan_common::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM companies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Filtered, sorted page of lead board rows plus the unpaged total
    pub async fn list(&self, query: &CompanyQuery) -> leadscan_common::Result<CompanyPage> {
        let mut conditions = Vec::new();
        if query.confidence.is_some() {
            conditions.push("confidence = ?");
        }
        if query.min_score.is_some() {
            conditions.push("score >= ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM companies{}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(confidence) = query.confidence {
            count_query = count_query.bind(confidence.as_str());
        }
        if let Some(min_score) = query.min_score {
            count_query = count_query.bind(min_score);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            "{}{} ORDER BY {} {}, id ASC LIMIT ? OFFSET ?",
            SELECT_COMPANY,
            where_clause,
            query.sort.column(),
            query.order.keyword()
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(confidence) = query.confidence {
            list_query = list_query.bind(confidence.as_str());
        }
        if let Some(min_score) = query.min_score {
            list_query = list_query.bind(min_score);
        }
        let rows = list_query
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await?;

        let data = rows
            .iter()
            .map(|row| company_from_row(row).map(|c| c.summary()))
            .collect::<leadscan_common::Result<Vec<_>>>()?;

        Ok(CompanyPage {
            data,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Replace the outreach block and append its trace entry in one statement
    ///
    /// Returns false when no company has this id.
    pub async fn replace_outreach(
        &self,
        id: &str,
        outreach: &OutreachDraft,
        entry: &TraceEntry,
    ) -> leadscan_common::Result<bool> {
        let updated_at = format_time(&entry.time);
        let outreach = to_json(outreach)?;
        let entry = to_json(entry)?;

        let affected = retry_on_lock("replace outreach", self.max_lock_wait_ms, || {
            write_outreach(&self.pool, id, &outreach, &entry, &updated_at)
        })
        .await?;

        Ok(affected > 0)
    }
}

/// Company id already recorded for a reconciled job
pub(crate) async fn reconciled_company_id(
    conn: &mut SqliteConnection,
    job_id: Uuid,
) -> leadscan_common::Result<Option<String>> {
    let id: Option<String> = sqlx::query_scalar("SELECT company_id FROM reconciliations WHERE job_id = ?")
        .bind(job_id.to_string())
        .fetch_optional(conn)
        .await?;
    Ok(id)
}

/// `created_at` of an existing company, kept across overwrites
pub(crate) async fn existing_created_at(
    conn: &mut SqliteConnection,
    id: &str,
) -> leadscan_common::Result<Option<chrono::DateTime<chrono::Utc>>> {
    let created_at: Option<String> =
        sqlx::query_scalar("SELECT created_at FROM companies WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    created_at
        .map(|value| parse_time("created_at", &value))
        .transpose()
}

/// Upsert the full company row and record the reconciliation
pub(crate) async fn upsert_reconciled(
    conn: &mut SqliteConnection,
    company: &Company,
) -> leadscan_common::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO companies (
            id, name, descriptor, score, confidence, confidence_rank, coverage, receptivity,
            job_id, profile, signals, scoring, strategy, outreach, trace, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            descriptor = excluded.descriptor,
            score = excluded.score,
            confidence = excluded.confidence,
            confidence_rank = excluded.confidence_rank,
            coverage = excluded.coverage,
            receptivity = excluded.receptivity,
            job_id = excluded.job_id,
            profile = excluded.profile,
            signals = excluded.signals,
            scoring = excluded.scoring,
            strategy = excluded.strategy,
            outreach = excluded.outreach,
            trace = excluded.trace,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&company.id)
    .bind(&company.name)
    .bind(&company.descriptor)
    .bind(company.score)
    .bind(company.confidence.as_str())
    .bind(company.confidence.rank())
    .bind(company.coverage)
    .bind(&company.receptivity)
    .bind(company.job_id.to_string())
    .bind(to_json(&company.profile)?)
    .bind(to_json(&company.signals)?)
    .bind(to_json(&company.scoring)?)
    .bind(to_json(&company.strategy)?)
    .bind(to_json(&company.outreach)?)
    .bind(to_json(&company.trace)?)
    .bind(format_time(&company.created_at))
    .bind(format_time(&company.updated_at))
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO reconciliations (job_id, company_id, reconciled_at) VALUES (?, ?, ?)")
        .bind(company.job_id.to_string())
        .bind(&company.id)
        .bind(format_time(&company.updated_at))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn write_outreach(
    pool: &SqlitePool,
    id: &str,
    outreach: &str,
    entry: &str,
    updated_at: &str,
) -> leadscan_common::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE companies SET
            outreach = ?,
            trace = json_insert(trace, '$[#]', json(?)),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(outreach)
    .bind(entry)
    .bind(updated_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

fn to_json<T: serde::Serialize>(value: &T) -> leadscan_common::Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("Failed to serialize: {}", e)))
}

fn from_json<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> leadscan_common::Result<T> {
    let value: String = row.get(column);
    serde_json::from_str(&value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

fn company_from_row(row: &SqliteRow) -> leadscan_common::Result<Company> {
    let confidence: String = row.get("confidence");
    let confidence = Level::parse(&confidence)
        .ok_or_else(|| Error::Internal(format!("Unknown confidence '{}'", confidence)))?;

    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Invalid job id '{}': {}", job_id, e)))?;

    Ok(Company {
        id: row.get("id"),
        name: row.get("name"),
        descriptor: row.get("descriptor"),
        score: row.get("score"),
        confidence,
        coverage: row.get("coverage"),
        receptivity: row.get("receptivity"),
        job_id,
        profile: from_json(row, "profile")?,
        signals: from_json(row, "signals")?,
        scoring: from_json(row, "scoring")?,
        strategy: from_json(row, "strategy")?,
        outreach: from_json(row, "outreach")?,
        trace: from_json(row, "trace")?,
        created_at: parse_time("created_at", row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_time("updated_at", row.get::<String, _>("updated_at").as_str())?,
    })
}
