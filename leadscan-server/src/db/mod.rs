//! Database access for leadscan-server
//!
//! One SQLite file holds the scan job table and the company store.

pub mod companies;
pub mod jobs;

pub use companies::{CompanyPage, CompanyQuery, CompanySort, CompanyStore, SortOrder};
pub use jobs::{JobStore, JobStoreError};

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the file (and its parent folder) when missing, enables WAL so
/// pollers read consistent snapshots while the executor writes.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(100));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with tables created
///
/// Every connection to `sqlite::memory:` is its own database, so the pool is
/// pinned to one connection that never expires.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create scan_jobs, companies and reconciliations if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            query TEXT NOT NULL,
            target_label TEXT NOT NULL,
            progress REAL NOT NULL DEFAULT 0.0,
            agents_completed TEXT NOT NULL DEFAULT '[]',
            agents_pending TEXT NOT NULL DEFAULT '[]',
            error_message TEXT,
            error_code TEXT,
            result_ref TEXT,
            depth TEXT NOT NULL,
            sources TEXT NOT NULL DEFAULT '[]',
            pipeline_version TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_jobs_status ON scan_jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            descriptor TEXT NOT NULL,
            score INTEGER NOT NULL,
            confidence TEXT NOT NULL,
            confidence_rank INTEGER NOT NULL,
            coverage INTEGER NOT NULL,
            receptivity TEXT NOT NULL,
            job_id TEXT NOT NULL,
            profile TEXT NOT NULL,
            signals TEXT NOT NULL,
            scoring TEXT NOT NULL,
            strategy TEXT NOT NULL,
            outreach TEXT NOT NULL,
            trace TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliations (
            job_id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            reconciled_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (scan_jobs, companies, reconciliations)");

    Ok(())
}

/// Timestamp format stored in every TEXT time column
///
/// Fixed-width so lexical order matches chronological order.
pub(crate) fn format_time(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(column: &str, value: &str) -> leadscan_common::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| leadscan_common::Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
