use std::collections::HashMap;
use std::path::Path;

use sqlx::{Row, SqlitePool};

use crate::db;
use crate::error::IngestionError;

/// Last-seen state of one vault file, durable across process restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub document_id: String,
    pub content_hash: String,
    /// Unix seconds of the file's modification time at last ingestion.
    pub modified_at: i64,
}

/// Durable mapping from vault-relative file path to last-seen content hash
/// and modification time, scoped to one vault. Drives incremental runs and
/// deletion detection.
pub struct IngestStateDb {
    pool: SqlitePool,
}

impl IngestStateDb {
    pub async fn open(path: &Path) -> Result<Self, IngestionError> {
        let pool = db::connect(path).await?;
        let state = Self { pool };
        state.migrate().await?;
        Ok(state)
    }

    /// In-memory state database, for tests.
    pub async fn open_memory() -> Result<Self, IngestionError> {
        let pool = db::connect_memory().await?;
        let state = Self { pool };
        state.migrate().await?;
        Ok(state)
    }

    async fn migrate(&self) -> Result<(), IngestionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_state (
                path TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                modified_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_all(&self) -> Result<HashMap<String, FileState>, IngestionError> {
        let rows = sqlx::query("SELECT path, document_id, content_hash, modified_at FROM file_state")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let path: String = row.get("path");
                let state = FileState {
                    document_id: row.get("document_id"),
                    content_hash: row.get("content_hash"),
                    modified_at: row.get("modified_at"),
                };
                (path, state)
            })
            .collect())
    }

    pub async fn upsert(
        &self,
        path: &str,
        document_id: &str,
        content_hash: &str,
        modified_at: i64,
    ) -> Result<(), IngestionError> {
        sqlx::query(
            r#"
            INSERT INTO file_state (path, document_id, content_hash, modified_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                document_id = excluded.document_id,
                content_hash = excluded.content_hash,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(path)
        .bind(document_id)
        .bind(content_hash)
        .bind(modified_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, path: &str) -> Result<(), IngestionError> {
        sqlx::query("DELETE FROM file_state WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
