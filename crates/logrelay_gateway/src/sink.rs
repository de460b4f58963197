//! Result sink: durable per-file result records, upserted by file name.

use async_trait::async_trait;
use logrelay_protocol::{PersistedResult, PersistedStatus};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored row that does not map back onto a result record
    #[error("Invalid stored record: {0}")]
    Invalid(String),
}

/// Upsert-by-file-name store. The last write for a file name wins.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn upsert(&self, record: &PersistedResult) -> Result<(), SinkError>;

    async fn get(&self, file_name: &str) -> Result<Option<PersistedResult>, SinkError>;

    /// All records ordered by file name.
    async fn list(&self) -> Result<Vec<PersistedResult>, SinkError>;

    /// Release the store. Writes after this fail.
    async fn close(&self) {}
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryResultSink {
    records: Mutex<BTreeMap<String, PersistedResult>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn upsert(&self, record: &PersistedResult) -> Result<(), SinkError> {
        self.records
            .lock()
            .await
            .insert(record.file_name.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, file_name: &str) -> Result<Option<PersistedResult>, SinkError> {
        Ok(self.records.lock().await.get(file_name).cloned())
    }

    async fn list(&self) -> Result<Vec<PersistedResult>, SinkError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

// ============================================================================
// SQLite
// ============================================================================

#[derive(Clone)]
pub struct SqliteResultSink {
    pool: SqlitePool,
}

impl SqliteResultSink {
    /// Open or create the database at `path` and ensure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let sink = Self { pool };
        sink.ensure_schema(true).await?;
        info!(path = %path.display(), "Result database opened");
        Ok(sink)
    }

    /// Private in-memory database. One connection, so every query sees the same data.
    pub async fn open_in_memory() -> Result<Self, SinkError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let sink = Self { pool };
        sink.ensure_schema(false).await?;
        Ok(sink)
    }

    async fn ensure_schema(&self, wal: bool) -> Result<(), SinkError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&self.pool)
                .await?;
            sqlx::query("PRAGMA synchronous=NORMAL")
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS log_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL UNIQUE,
                client_id TEXT NOT NULL,
                status TEXT NOT NULL,
                warn_count INTEGER,
                error_count INTEGER,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn row_to_record(row: &SqliteRow) -> Result<PersistedResult, SinkError> {
        let status: String = row.try_get("status")?;
        let status: PersistedStatus = status.parse().map_err(SinkError::Invalid)?;

        Ok(PersistedResult {
            file_name: row.try_get("file_name")?,
            client_id: row.try_get("client_id")?,
            status,
            warn_count: row.try_get::<Option<i64>, _>("warn_count")?.map(|v| v as u64),
            error_count: row.try_get::<Option<i64>, _>("error_count")?.map(|v| v as u64),
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl ResultSink for SqliteResultSink {
    async fn upsert(&self, record: &PersistedResult) -> Result<(), SinkError> {
        let now = Self::now_millis();

        sqlx::query(
            r#"
            INSERT INTO log_stats (file_name, client_id, status, warn_count, error_count, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_name) DO UPDATE SET
                client_id = excluded.client_id,
                status = excluded.status,
                warn_count = excluded.warn_count,
                error_count = excluded.error_count,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.file_name)
        .bind(&record.client_id)
        .bind(record.status.as_str())
        .bind(record.warn_count.map(|v| v as i64))
        .bind(record.error_count.map(|v| v as i64))
        .bind(&record.error)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, file_name: &str) -> Result<Option<PersistedResult>, SinkError> {
        let row = sqlx::query(
            "SELECT file_name, client_id, status, warn_count, error_count, error FROM log_stats WHERE file_name = ?",
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Result database closed");
    }

    async fn list(&self) -> Result<Vec<PersistedResult>, SinkError> {
        let rows = sqlx::query(
            "SELECT file_name, client_id, status, warn_count, error_count, error FROM log_stats ORDER BY file_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_last_write_wins() {
        let tmp = TempDir::new().unwrap();
        let sink = SqliteResultSink::open(tmp.path().join("results.sqlite"))
            .await
            .unwrap();

        sink.upsert(&PersistedResult::completed("app.log", "c1", 3, 5))
            .await
            .unwrap();
        sink.upsert(&PersistedResult::completed("app.log", "c1", 4, 5))
            .await
            .unwrap();

        let all = sink.list().await.unwrap();
        assert_eq!(all.len(), 1);
        let record = &all[0];
        assert_eq!(record.status, PersistedStatus::Completed);
        assert_eq!(record.error_count, Some(4));
        assert_eq!(record.warn_count, Some(5));

        sink.close().await;
    }

    #[tokio::test]
    async fn test_failed_overwrites_counts() {
        let sink = SqliteResultSink::open_in_memory().await.unwrap();
        sink.upsert(&PersistedResult::completed("db.log", "c1", 1, 1))
            .await
            .unwrap();
        sink.upsert(&PersistedResult::failed("db.log", "c2", "mismatch"))
            .await
            .unwrap();

        let record = sink.get("db.log").await.unwrap().unwrap();
        assert_eq!(record.status, PersistedStatus::Failed);
        assert_eq!(record.client_id, "c2");
        assert_eq!(record.error_count, None);
        assert_eq!(record.warn_count, None);
        assert_eq!(record.error.as_deref(), Some("mismatch"));
    }

    #[tokio::test]
    async fn test_close_rejects_further_writes() {
        let sink = SqliteResultSink::open_in_memory().await.unwrap();
        sink.close().await;
        let err = sink
            .upsert(&PersistedResult::completed("late.log", "c1", 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Sqlx(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let sink = SqliteResultSink::open_in_memory().await.unwrap();
        assert!(sink.get("nope.log").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("results.sqlite");
        {
            let sink = SqliteResultSink::open(&path).await.unwrap();
            sink.upsert(&PersistedResult::completed("b.log", "c1", 0, 2))
                .await
                .unwrap();
            sink.upsert(&PersistedResult::completed("a.log", "c1", 1, 0))
                .await
                .unwrap();
            sink.close().await;
        }

        let sink = SqliteResultSink::open(&path).await.unwrap();
        let names: Vec<String> = sink
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(names, vec!["a.log", "b.log"]);
    }

    #[tokio::test]
    async fn test_memory_sink_last_write_wins() {
        let sink = MemoryResultSink::new();
        sink.upsert(&PersistedResult::completed("app.log", "c1", 3, 5))
            .await
            .unwrap();
        sink.upsert(&PersistedResult::completed("app.log", "c1", 4, 5))
            .await
            .unwrap();
        let all = sink.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].error_count, Some(4));
    }
}
