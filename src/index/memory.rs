//! In-memory [`VectorIndex`] for tests and ephemeral use.
//!
//! Brute-force similarity over a `BTreeMap` behind a `std::sync::RwLock`;
//! iteration order is keyed by chunk id, so results are deterministic.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::RetrievalResult;

use super::{rank, ChunkPayload, DistanceMetric, IndexPoint, VectorIndex};

struct StoredPoint {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

#[derive(Default)]
struct Inner {
    collection: Option<(usize, DistanceMetric)>,
    points: BTreeMap<String, StoredPoint>,
}

/// In-memory vector index.
#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<Inner>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(
        &self,
        dims: usize,
        metric: DistanceMetric,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.write().unwrap();
        match inner.collection {
            Some((existing_dims, _)) if existing_dims != dims => {
                Err(IndexError::DimensionMismatch {
                    expected: existing_dims,
                    actual: dims,
                })
            }
            Some((_, existing_metric)) if existing_metric != metric => {
                Err(IndexError::Unavailable(format!(
                    "collection metric is {}, requested {}",
                    existing_metric.as_str(),
                    metric.as_str()
                )))
            }
            Some(_) => Ok(()),
            None => {
                inner.collection = Some((dims, metric));
                Ok(())
            }
        }
    }

    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), IndexError> {
        let mut inner = self.inner.write().unwrap();
        let (dims, _) = inner
            .collection
            .ok_or_else(|| IndexError::CollectionMissing("memory".to_string()))?;

        for point in points {
            if point.vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    actual: point.vector.len(),
                });
            }
        }
        for point in points {
            inner.points.insert(
                point.chunk_id.clone(),
                StoredPoint {
                    vector: point.vector.clone(),
                    payload: point.payload.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, IndexError> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.points.len();
        inner
            .points
            .retain(|_, stored| stored.payload.document_id != document_id);
        Ok(before - inner.points.len())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        let inner = self.inner.read().unwrap();
        let (dims, metric) = inner
            .collection
            .ok_or_else(|| IndexError::CollectionMissing("memory".to_string()))?;
        if query.len() != dims {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }

        let scored: Vec<RetrievalResult> = inner
            .points
            .iter()
            .map(|(chunk_id, stored)| {
                let score = metric.score(query, &stored.vector);
                stored.payload.clone().into_result(chunk_id.clone(), score)
            })
            .collect();

        Ok(rank(scored, top_k, min_score))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.inner.read().unwrap().points.len())
    }
}
