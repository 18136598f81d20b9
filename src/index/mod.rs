//! Vector index backends.
//!
//! The [`VectorIndex`] trait abstracts over similarity-search storage so the
//! pipeline and retriever can work with any backend:
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorIndex trait│
//!                  │   (async CRUD)   │
//!                  └────────┬─────────┘
//!                           │
//!                ┌──────────┴──────────┐
//!                ▼                     ▼
//!         ┌─────────────┐       ┌─────────────┐
//!         │   SQLite    │       │  in-memory  │
//!         │  (durable)  │       │ (tests/dev) │
//!         └─────────────┘       └─────────────┘
//! ```
//!
//! A collection is created once with a fixed dimensionality and distance
//! metric; operations with mismatched dimensionality fail with
//! [`IndexError::DimensionMismatch`]. Upserts are keyed by chunk id and
//! replace the prior entry atomically from a reader's perspective.

pub mod memory;
pub mod sqlite;

use std::cmp::Ordering;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::{Metadata, RetrievalResult};

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Similarity measure for a collection. Higher is always more relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    Dot,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        }
    }

    /// Score a stored vector against a query vector.
    pub fn score(&self, query: &[f32], vector: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_similarity(query, vector),
            DistanceMetric::Dot => dot_product(query, vector),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" => Ok(DistanceMetric::Dot),
            other => Err(IndexError::Unavailable(format!(
                "unknown distance metric: {other}"
            ))),
        }
    }
}

/// Stored alongside each vector; everything retrieval needs to cite the
/// chunk without consulting any other store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub document_path: String,
    pub ordinal: usize,
    pub span: (usize, usize),
    pub text: String,
    pub metadata: Metadata,
}

impl ChunkPayload {
    pub fn into_result(self, chunk_id: String, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk_id,
            score,
            document_path: self.document_path,
            text: self.text,
            metadata: self.metadata,
        }
    }
}

/// A (vector, payload) pair keyed by chunk identity, ready for upsert.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// Pluggable similarity-search backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection on first use; verify dimensionality and metric
    /// on subsequent calls.
    async fn ensure_collection(&self, dims: usize, metric: DistanceMetric)
        -> Result<(), IndexError>;

    /// Insert-or-replace points keyed by chunk id. Idempotent.
    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), IndexError>;

    /// Remove every point whose payload references the document. Returns
    /// the number of points removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, IndexError>;

    /// Nearest-neighbor search: at most `top_k` results with score ≥
    /// `min_score`, descending by score, ties broken by ascending chunk id.
    /// An empty result is not an error.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalResult>, IndexError>;

    /// Total number of stored points.
    async fn count(&self) -> Result<usize, IndexError>;
}

/// Apply the retrieval contract to raw scored results: threshold, ordering
/// (score desc, chunk id asc), truncation. Shared by all backends so the
/// contract cannot drift between them.
pub(crate) fn rank(
    mut results: Vec<RetrievalResult>,
    top_k: usize,
    min_score: f32,
) -> Vec<RetrievalResult> {
    results.retain(|r| r.score >= min_score);
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(top_k);
    results
}

/// Cosine similarity in `[-1, 1]`. Returns `0.0` for empty or
/// length-mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Plain dot product; meaningful when the embedding model produces
/// normalized vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
