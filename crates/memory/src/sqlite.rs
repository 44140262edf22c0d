//! SQLite audit sink.
//!
//! One table, `audit_entries`, written with INSERT only. Each row keeps the
//! filterable columns plus the full entry as JSON.

use async_trait::async_trait;
use mindloop_core::audit::{AuditFilter, AuditSink, ExternalMemoryEntry};
use mindloop_core::error::MemoryError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // A single connection keeps `:memory:` databases shared across queries.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let sink = Self { pool };
        sink.run_migrations().await?;
        info!("SQLite audit sink initialized at {path}");
        Ok(sink)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT UNIQUE NOT NULL,
                agent_id   TEXT NOT NULL,
                run_id     TEXT,
                user_id    TEXT,
                action     TEXT NOT NULL,
                phase      TEXT,
                timestamp  TEXT NOT NULL,
                body       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("audit_entries table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_run ON audit_entries(run_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("run_id index: {e}")))?;

        debug!("SQLite audit migrations complete");
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, entry: &ExternalMemoryEntry) -> Result<(), MemoryError> {
        let body = serde_json::to_string(entry)
            .map_err(|e| MemoryError::AppendFailed(format!("Entry serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO audit_entries (id, agent_id, run_id, user_id, action, phase, timestamp, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.agent_id)
        .bind(&entry.run_id)
        .bind(&entry.user_id)
        .bind(entry.action.to_string())
        .bind(entry.phase.map(|p| p.to_string()))
        .bind(entry.timestamp.to_rfc3339())
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::AppendFailed(format!("INSERT failed: {e}")))?;

        Ok(())
    }

    async fn read(&self, filter: &AuditFilter) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        // Narrow by indexed run id in SQL; the rest is applied in memory.
        let rows = match &filter.run_id {
            Some(run_id) => {
                sqlx::query("SELECT body FROM audit_entries WHERE run_id = ?1 ORDER BY seq")
                    .bind(run_id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT body FROM audit_entries ORDER BY seq")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| MemoryError::QueryFailed(format!("SELECT failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row
                .try_get("body")
                .map_err(|e| MemoryError::QueryFailed(format!("body column: {e}")))?;
            match serde_json::from_str::<ExternalMemoryEntry>(&body) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "Skipping unreadable audit row"),
            }
        }
        Ok(filter.apply(entries))
    }
}
