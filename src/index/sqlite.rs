//! SQLite-backed [`VectorIndex`].
//!
//! Vectors are stored as little-endian f32 BLOBs next to a JSON payload;
//! similarity is computed in-process over the collection's points.
//! Upserts and document deletions run inside transactions, so a reader
//! never observes a half-written entry.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::error::IndexError;
use crate::models::RetrievalResult;

use super::{blob_to_vec, rank, vec_to_blob, ChunkPayload, DistanceMetric, IndexPoint, VectorIndex};

pub struct SqliteIndex {
    pool: SqlitePool,
    collection: String,
}

impl SqliteIndex {
    /// Open (creating if missing) the index database at `path`.
    pub async fn open(path: &Path, collection: &str) -> Result<Self, IndexError> {
        let pool = db::connect(path).await?;
        let index = Self {
            pool,
            collection: collection.to_string(),
        };
        index.migrate().await?;
        Ok(index)
    }

    /// Open an in-memory index, for tests.
    pub async fn open_memory(collection: &str) -> Result<Self, IndexError> {
        let pool = db::connect_memory().await?;
        let index = Self {
            pool,
            collection: collection.to_string(),
        };
        index.migrate().await?;
        Ok(index)
    }

    async fn migrate(&self) -> Result<(), IndexError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                metric TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS points (
                collection TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (collection, chunk_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_points_document ON points(collection, document_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Dims and metric of the collection, or `CollectionMissing`.
    async fn collection_info(&self) -> Result<(usize, DistanceMetric), IndexError> {
        let row = sqlx::query("SELECT dims, metric FROM collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or_else(|| IndexError::CollectionMissing(self.collection.clone()))?;
        let dims: i64 = row.get("dims");
        let metric: String = row.get("metric");
        Ok((dims as usize, DistanceMetric::from_str(&metric)?))
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn ensure_collection(
        &self,
        dims: usize,
        metric: DistanceMetric,
    ) -> Result<(), IndexError> {
        match self.collection_info().await {
            Ok((existing_dims, existing_metric)) => {
                if existing_dims != dims {
                    return Err(IndexError::DimensionMismatch {
                        expected: existing_dims,
                        actual: dims,
                    });
                }
                if existing_metric != metric {
                    return Err(IndexError::Unavailable(format!(
                        "collection {} metric is {}, requested {}",
                        self.collection,
                        existing_metric.as_str(),
                        metric.as_str()
                    )));
                }
                Ok(())
            }
            Err(IndexError::CollectionMissing(_)) => {
                sqlx::query("INSERT INTO collections (name, dims, metric) VALUES (?, ?, ?)")
                    .bind(&self.collection)
                    .bind(dims as i64)
                    .bind(metric.as_str())
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), IndexError> {
        let (dims, _) = self.collection_info().await?;
        for point in points {
            if point.vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    actual: point.vector.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        for point in points {
            let payload = serde_json::to_string(&point.payload)
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO points (collection, chunk_id, document_id, embedding, payload)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    embedding = excluded.embedding,
                    payload = excluded.payload
                "#,
            )
            .bind(&self.collection)
            .bind(&point.chunk_id)
            .bind(&point.payload.document_id)
            .bind(vec_to_blob(&point.vector))
            .bind(payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, IndexError> {
        let result = sqlx::query("DELETE FROM points WHERE collection = ? AND document_id = ?")
            .bind(&self.collection)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        let (dims, metric) = self.collection_info().await?;
        if query.len() != dims {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }

        let rows = sqlx::query("SELECT chunk_id, embedding, payload FROM points WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_id: String = row.get("chunk_id");
            let blob: Vec<u8> = row.get("embedding");
            let payload: String = row.get("payload");
            let payload: ChunkPayload = serde_json::from_str(&payload)
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;
            let score = metric.score(query, &blob_to_vec(&blob));
            scored.push(payload.into_result(chunk_id, score));
        }

        Ok(rank(scored, top_k, min_score))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM points WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
