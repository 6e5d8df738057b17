//! SQLite-based run history store

use crate::core::Verdict;
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, pipeline_name, verdict, event, branch, started_at, \
     finished_at, succeeded, failed, skipped, cancelled FROM runs";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("jobflow");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("runs.db");
        Self::new(&db_path.to_string_lossy()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                verdict TEXT NOT NULL,
                event TEXT NOT NULL,
                branch TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                succeeded INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                cancelled INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            verdict: row
                .get::<String, _>("verdict")
                .parse::<Verdict>()
                .map_err(|e| anyhow!(e))?,
            event: row.get("event"),
            branch: row.get("branch"),
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: Self::from_naive(row.get("finished_at")),
            succeeded: row.get::<i64, _>("succeeded") as usize,
            failed: row.get::<i64, _>("failed") as usize,
            skipped: row.get::<i64, _>("skipped") as usize,
            cancelled: row.get::<i64, _>("cancelled") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, verdict, event, branch, started_at, finished_at,
             succeeded, failed, skipped, cancelled)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline_name)
        .bind(run.verdict.as_str())
        .bind(&run.event)
        .bind(&run.branch)
        .bind(run.started_at.naive_utc())
        .bind(run.finished_at.naive_utc())
        .bind(run.succeeded as i64)
        .bind(run.failed as i64)
        .bind(run.skipped as i64)
        .bind(run.cancelled as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "{} WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            SELECT_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT pipeline_name FROM runs ORDER BY pipeline_name ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}
