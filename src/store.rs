use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::models::{Category, FilesChanged, LearningLog, NewLearningLog};

/// Result of a single deduplicating insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    AlreadyExists,
    Failed(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS learning_logs (
    id             TEXT PRIMARY KEY NOT NULL,
    commit_hash    TEXT NOT NULL UNIQUE,
    commit_message TEXT NOT NULL,
    commit_date    TEXT NOT NULL,
    repository     TEXT NOT NULL,
    lines_added    INTEGER NOT NULL,
    lines_deleted  INTEGER NOT NULL,
    files_changed  TEXT NOT NULL,
    category       TEXT,
    summary        TEXT,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_learning_logs_commit_date ON learning_logs (commit_date);
CREATE INDEX IF NOT EXISTS idx_learning_logs_category ON learning_logs (category);
"#;

const SELECT_COLUMNS: &str = "id, commit_hash, commit_message, commit_date, repository, \
     lines_added, lines_deleted, files_changed, category, summary, created_at";

#[derive(Debug, sqlx::FromRow)]
struct LearningLogRow {
    id: String,
    commit_hash: String,
    commit_message: String,
    commit_date: DateTime<Utc>,
    repository: String,
    lines_added: i64,
    lines_deleted: i64,
    files_changed: String,
    category: Option<String>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LearningLogRow> for LearningLog {
    type Error = anyhow::Error;

    fn try_from(row: LearningLogRow) -> Result<Self> {
        let files_changed: FilesChanged = serde_json::from_str(&row.files_changed)
            .with_context(|| format!("corrupt files_changed for {}", row.commit_hash))?;

        let category = match row.category.as_deref() {
            Some(label) => match label.parse::<Category>() {
                Ok(category) => Some(category),
                Err(e) => {
                    tracing::warn!("Ignoring stored category on {}: {}", row.commit_hash, e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            id: row.id,
            commit_hash: row.commit_hash,
            commit_message: row.commit_message,
            commit_date: row.commit_date,
            repository: row.repository,
            lines_added: u32::try_from(row.lines_added).unwrap_or(0),
            lines_deleted: u32::try_from(row.lines_deleted).unwrap_or(0),
            files_changed,
            category,
            summary: row.summary,
            created_at: row.created_at,
        })
    }
}

/// Learning log persistence keyed by commit hash.
#[derive(Clone)]
pub struct LogStore {
    pool: SqlitePool,
}

impl LogStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open database {}", database_url))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Single-connection in-memory store; the database lives as long as the connection.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run ad-hoc SQL against the pool, for fault-injection in tests.
    #[cfg(test)]
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to create learning_logs schema")?;
        Ok(())
    }

    pub async fn find_by_hash(&self, commit_hash: &str) -> Result<Option<LearningLog>> {
        let row: Option<LearningLogRow> = sqlx::query_as(&format!(
            "SELECT {} FROM learning_logs WHERE commit_hash = ?",
            SELECT_COLUMNS
        ))
        .bind(commit_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LearningLog::try_from).transpose()
    }

    /// Insert the record unless its hash is already stored.
    ///
    /// The unique constraint on `commit_hash` decides races: the loser of two
    /// concurrent inserts affects zero rows and reports `AlreadyExists`.
    pub async fn write(&self, record: &NewLearningLog) -> WriteOutcome {
        match self.insert_if_absent(record).await {
            Ok(true) => WriteOutcome::Inserted,
            Ok(false) => WriteOutcome::AlreadyExists,
            Err(e) => WriteOutcome::Failed(e.to_string()),
        }
    }

    async fn insert_if_absent(&self, record: &NewLearningLog) -> Result<bool> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM learning_logs WHERE commit_hash = ?")
                .bind(&record.commit_hash)
                .fetch_optional(&self.pool)
                .await?;

        if existing.is_some() {
            return Ok(false);
        }

        let files_changed = serde_json::to_string(&record.files_changed)?;

        let result = sqlx::query(
            r#"
            INSERT INTO learning_logs (
                id, commit_hash, commit_message, commit_date, repository,
                lines_added, lines_deleted, files_changed, category, summary, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)
            ON CONFLICT(commit_hash) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&record.commit_hash)
        .bind(&record.commit_message)
        .bind(record.commit_date)
        .bind(&record.repository)
        .bind(i64::from(record.lines_added))
        .bind(i64::from(record.lines_deleted))
        .bind(files_changed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All records, newest commit first.
    pub async fn list_all(&self) -> Result<Vec<LearningLog>> {
        let rows: Vec<LearningLogRow> = sqlx::query_as(&format!(
            "SELECT {} FROM learning_logs ORDER BY commit_date DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LearningLog::try_from).collect()
    }

    pub async fn list_by_category(&self, category: Category) -> Result<Vec<LearningLog>> {
        let rows: Vec<LearningLogRow> = sqlx::query_as(&format!(
            "SELECT {} FROM learning_logs WHERE category = ? ORDER BY commit_date DESC",
            SELECT_COLUMNS
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LearningLog::try_from).collect()
    }

    /// Newest records without a category, at most `limit`.
    pub async fn find_unclassified(&self, limit: usize) -> Result<Vec<LearningLog>> {
        self.find_where_null("category", limit).await
    }

    /// Newest records without a summary, at most `limit`.
    pub async fn find_unsummarized(&self, limit: usize) -> Result<Vec<LearningLog>> {
        self.find_where_null("summary", limit).await
    }

    async fn find_where_null(&self, column: &'static str, limit: usize) -> Result<Vec<LearningLog>> {
        let rows: Vec<LearningLogRow> = sqlx::query_as(&format!(
            "SELECT {} FROM learning_logs WHERE {} IS NULL ORDER BY commit_date DESC LIMIT ?",
            SELECT_COLUMNS, column
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LearningLog::try_from).collect()
    }

    /// Returns false when the record already had a category (or does not exist).
    pub async fn set_category_if_unset(&self, commit_hash: &str, category: Category) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE learning_logs SET category = ? WHERE commit_hash = ? AND category IS NULL",
        )
        .bind(category.as_str())
        .bind(commit_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_summary_if_unset(&self, commit_hash: &str, summary: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE learning_logs SET summary = ? WHERE commit_hash = ? AND summary IS NULL",
        )
        .bind(summary)
        .bind(commit_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM learning_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
