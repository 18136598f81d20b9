//! Query-time retrieval.
//!
//! Embeds a query with the same provider used at ingestion time, searches
//! the vector index, and passes ranked results through unchanged — any
//! re-ranking would be an explicit, documented post-filter, never a silent
//! reordering. Failures surface as [`RetrievalError`] so callers can
//! distinguish "no matches" from "retrieval broke".
//!
//! Sharp edge: the provider/model configured here must be the one the
//! index was built with. A mismatch is not detectable from vector shape
//! alone and silently corrupts similarity semantics — version collections
//! by model identifier.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::embed::Embedder;
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::models::{MetaValue, RetrievalResult};

/// Retrieves ranked, scored, cited chunks for a natural-language query.
pub struct Retriever {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    defaults: RetrievalConfig,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: Arc<dyn VectorIndex>, defaults: RetrievalConfig) -> Self {
        Self {
            embedder,
            index,
            defaults,
        }
    }

    /// Retrieve at most `top_k` chunks scoring at least `min_score`,
    /// descending by score. `None` arguments fall back to the configured
    /// defaults.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let top_k = top_k.unwrap_or(self.defaults.top_k);
        let min_score = min_score.unwrap_or(self.defaults.min_score);

        debug!(top_k, min_score, "retrieving for query");

        let query_vector = self.embedder.embed_query(query).await?;
        let results = self.index.search(&query_vector, top_k, min_score).await?;

        info!(matches = results.len(), "retrieval complete");
        Ok(results)
    }
}

/// Format retrieval results into a context block for a downstream answer
/// generator. Pure presentation; ordering is untouched.
pub fn format_context(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "No relevant information found in your notes.".to_string();
    }

    let mut parts = Vec::with_capacity(results.len());
    for (i, result) in results.iter().enumerate() {
        let title = result
            .metadata
            .get("title")
            .and_then(MetaValue::as_str)
            .unwrap_or(&result.document_path);

        let mut part = format!("[Document {}: {}]\n{}", i + 1, title, result.text);
        if let Some(tags) = result.metadata.get("tags").and_then(MetaValue::as_list) {
            if !tags.is_empty() {
                part.push_str(&format!("\nTags: {}", tags.join(", ")));
            }
        }
        parts.push(part);
    }

    parts.join("\n\n---\n\n")
}

/// A source citation extracted from a retrieval result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Citation {
    pub document_path: String,
    pub chunk_id: String,
    pub score: f32,
}

/// Citations for a result set, in result order.
pub fn citations(results: &[RetrievalResult]) -> Vec<Citation> {
    results
        .iter()
        .map(|r| Citation {
            document_path: r.document_path.clone(),
            chunk_id: r.chunk_id.clone(),
            score: r.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbeddingProvider, ItemResult};
    use crate::error::{EmbeddingError, IndexError};
    use crate::index::{ChunkPayload, DistanceMetric, IndexPoint, MemoryIndex};
    use crate::models::Metadata;
    use async_trait::async_trait;

    /// Maps a few known texts to fixed directions so scores are exact.
    struct FixtureProvider;

    #[async_trait]
    impl EmbeddingProvider for FixtureProvider {
        fn model_name(&self) -> &str {
            "fixture"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<ItemResult>, EmbeddingError> {
            Ok(texts.iter().map(|_| Ok(vec![1.0, 0.0])).collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _: &[String]) -> Result<Vec<ItemResult>, EmbeddingError> {
            Err(EmbeddingError::ProviderUnavailable("offline".into()))
        }
    }

    fn point(chunk_id: &str, score: f32) -> IndexPoint {
        IndexPoint {
            chunk_id: chunk_id.to_string(),
            vector: vec![score, (1.0 - score * score).sqrt()],
            payload: ChunkPayload {
                document_id: "d1".to_string(),
                document_path: "notes/a.md".to_string(),
                ordinal: 0,
                span: (0, 5),
                text: format!("text of {chunk_id}"),
                metadata: Metadata::new(),
            },
        }
    }

    async fn fixture_index() -> Arc<dyn VectorIndex> {
        let index = MemoryIndex::new();
        index
            .ensure_collection(2, DistanceMetric::Cosine)
            .await
            .unwrap();
        index
            .upsert(&[point("a", 0.95), point("b", 0.8), point("c", 0.5)])
            .await
            .unwrap();
        Arc::new(index)
    }

    #[tokio::test]
    async fn passes_index_results_through_unchanged() {
        let retriever = Retriever::new(
            Embedder::new(Arc::new(FixtureProvider), 8),
            fixture_index().await,
            RetrievalConfig {
                top_k: 5,
                min_score: 0.7,
            },
        );

        let results = retriever.retrieve("hello", None, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "a");
        assert_eq!(results[1].chunk_id, "b");
        assert_eq!(results[0].document_path, "notes/a.md");
    }

    #[tokio::test]
    async fn explicit_arguments_override_defaults() {
        let retriever = Retriever::new(
            Embedder::new(Arc::new(FixtureProvider), 8),
            fixture_index().await,
            RetrievalConfig {
                top_k: 5,
                min_score: 0.7,
            },
        );

        let results = retriever
            .retrieve("hello", Some(1), Some(0.0))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn embedding_failure_is_surfaced_not_swallowed() {
        let retriever = Retriever::new(
            Embedder::new(Arc::new(FailingProvider), 8),
            fixture_index().await,
            RetrievalConfig::default(),
        );

        let err = retriever.retrieve("hello", None, None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingFailed(_)));
    }

    #[tokio::test]
    async fn index_failure_is_surfaced() {
        struct BrokenIndex;

        #[async_trait]
        impl VectorIndex for BrokenIndex {
            async fn ensure_collection(
                &self,
                _: usize,
                _: DistanceMetric,
            ) -> Result<(), IndexError> {
                Ok(())
            }
            async fn upsert(&self, _: &[IndexPoint]) -> Result<(), IndexError> {
                Ok(())
            }
            async fn delete_by_document(&self, _: &str) -> Result<usize, IndexError> {
                Ok(0)
            }
            async fn search(
                &self,
                _: &[f32],
                _: usize,
                _: f32,
            ) -> Result<Vec<crate::models::RetrievalResult>, IndexError> {
                Err(IndexError::Unavailable("backend down".into()))
            }
            async fn count(&self) -> Result<usize, IndexError> {
                Ok(0)
            }
        }

        let retriever = Retriever::new(
            Embedder::new(Arc::new(FixtureProvider), 8),
            Arc::new(BrokenIndex),
            RetrievalConfig::default(),
        );

        let err = retriever.retrieve("hello", None, None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::IndexUnavailable(_)));
    }

    #[test]
    fn format_context_includes_titles_and_tags() {
        let mut metadata = Metadata::new();
        metadata.insert("title".to_string(), MetaValue::String("My Note".to_string()));
        metadata.insert(
            "tags".to_string(),
            MetaValue::List(vec!["x".to_string(), "y".to_string()]),
        );
        let results = vec![RetrievalResult {
            chunk_id: "c1".to_string(),
            score: 0.9,
            document_path: "notes/a.md".to_string(),
            text: "Hello world.".to_string(),
            metadata,
        }];

        let context = format_context(&results);
        assert!(context.contains("[Document 1: My Note]"));
        assert!(context.contains("Hello world."));
        assert!(context.contains("Tags: x, y"));
    }

    #[test]
    fn format_context_empty_result_set() {
        assert_eq!(
            format_context(&[]),
            "No relevant information found in your notes."
        );
    }

    #[test]
    fn citations_preserve_order() {
        let result = |id: &str, score: f32| RetrievalResult {
            chunk_id: id.to_string(),
            score,
            document_path: "a.md".to_string(),
            text: String::new(),
            metadata: Metadata::new(),
        };
        let list = citations(&[result("a", 0.9), result("b", 0.8)]);
        assert_eq!(list[0].chunk_id, "a");
        assert_eq!(list[1].chunk_id, "b");
        assert!(list[0].score > list[1].score);
    }
}
