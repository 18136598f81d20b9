//! Embedding provider abstraction and implementations.
//!
//! The [`EmbeddingProvider`] trait is the capability interface behind which
//! vendors hide; one implementation exists per provider and is selected at
//! startup by configuration, never by runtime type inspection.
//!
//! The [`Embedder`] wrapper adds batching and partial-failure reporting on
//! top of a provider: batching is purely a throughput optimization and must
//! not change output values, and failed chunk identifiers are reported
//! separately so the caller — not this module — decides whether to retry or
//! skip.
//!
//! # Retry strategy
//!
//! The OpenAI provider retries transient errors with bounded exponential
//! backoff (1s, 2s, 4s, ... capped at 32s):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//!
//! Exhausting retries surfaces [`EmbeddingError::RateLimited`] when the
//! last failure was a 429, otherwise [`EmbeddingError::ProviderUnavailable`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use crate::models::Chunk;

/// Per-item embedding outcome within a successfully transported batch.
pub type ItemResult = Result<Vec<f32>, EmbeddingError>;

/// A pluggable embedding backend.
///
/// Vectors must come from the same provider/model used to build the index
/// being searched — mixing models silently corrupts similarity semantics,
/// so callers version collections by model identifier.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Fixed dimensionality of produced vectors.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, in order.
    ///
    /// An outer `Err` means the whole batch failed; per-item failures are
    /// reported inside the `Vec` for providers capable of partial results.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<ItemResult>, EmbeddingError>;
}

// ============ OpenAI-compatible provider ============

/// Embedding provider speaking the OpenAI `/v1/embeddings` wire format.
///
/// Requires the `OPENAI_API_KEY` environment variable. The endpoint is
/// configurable, so any OpenAI-compatible service works.
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EmbeddingError::ProviderUnavailable("OPENAI_API_KEY not set".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            api_key,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;
        let mut last_was_rate_limit = false;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            EmbeddingError::ProviderUnavailable(e.to_string())
                        })?;
                        return self.parse_response(&json, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error: retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_was_rate_limit = status.as_u16() == 429;
                        last_err = Some(format!("HTTP {status}: {body_text}"));
                        continue;
                    }

                    // Other client errors are not transient.
                    return Err(EmbeddingError::ProviderUnavailable(format!(
                        "HTTP {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_was_rate_limit = false;
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        let detail = last_err.unwrap_or_else(|| "retries exhausted".to_string());
        if last_was_rate_limit {
            Err(EmbeddingError::RateLimited(detail))
        } else {
            Err(EmbeddingError::ProviderUnavailable(detail))
        }
    }

    fn parse_response(
        &self,
        json: &serde_json::Value,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
            EmbeddingError::ProviderUnavailable("response missing data array".to_string())
        })?;

        if data.len() != expected {
            return Err(EmbeddingError::ProviderUnavailable(format!(
                "response has {} items, expected {}",
                data.len(),
                expected
            )));
        }

        // Order by the response's index field; providers may reorder.
        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for item in data {
            let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let vector: Vec<f32> = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    EmbeddingError::ProviderUnavailable("response item missing embedding".to_string())
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();

            if vector.len() != self.dims {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dims,
                    actual: vector.len(),
                });
            }
            indexed.push((index, vector));
        }
        indexed.sort_by_key(|(i, _)| *i);

        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<ItemResult>, EmbeddingError> {
        let vectors = self.request(texts).await?;
        Ok(vectors.into_iter().map(Ok).collect())
    }
}

/// Instantiate the provider named by the configuration.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        other => Err(EmbeddingError::ProviderUnavailable(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

// ============ Batching wrapper ============

/// Result of embedding a set of chunks: the vectors that were produced and
/// the identifiers of chunks that were not.
#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    pub vectors: HashMap<String, Vec<f32>>,
    /// Chunk ids that failed, in chunk order.
    pub failed: Vec<String>,
}

/// Batches chunk texts through a provider and collects per-item outcomes.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Embed chunks in batches of the configured size.
    ///
    /// Never fails as a whole: chunks whose embedding could not be produced
    /// are listed in [`EmbeddingOutcome::failed`] and the rest are returned.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> EmbeddingOutcome {
        let mut outcome = EmbeddingOutcome::default();

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.provider.embed_batch(&texts).await {
                Ok(items) => {
                    let returned = items.len();
                    for (chunk, item) in batch.iter().zip(items) {
                        match item {
                            Ok(vector) => {
                                outcome.vectors.insert(chunk.id.clone(), vector);
                            }
                            Err(err) => {
                                warn!(chunk = %chunk.id, %err, "chunk embedding failed");
                                outcome.failed.push(chunk.id.clone());
                            }
                        }
                    }
                    // A provider answering short is a provider failure for
                    // the unanswered tail.
                    if returned < batch.len() {
                        warn!(
                            expected = batch.len(),
                            returned, "provider returned a short batch"
                        );
                        outcome
                            .failed
                            .extend(batch[returned..].iter().map(|c| c.id.clone()));
                    }
                }
                Err(err) => {
                    warn!(%err, batch_len = batch.len(), "embedding batch failed");
                    outcome.failed.extend(batch.iter().map(|c| c.id.clone()));
                }
            }
        }

        debug!(
            ok = outcome.vectors.len(),
            failed = outcome.failed.len(),
            "embedding pass complete"
        );
        outcome
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let items = self.provider.embed_batch(&[text.to_string()]).await?;
        items
            .into_iter()
            .next()
            .unwrap_or_else(|| Err(EmbeddingError::ProviderUnavailable("empty response".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    /// Deterministic test provider: hashes each text into a tiny vector,
    /// failing any text containing the word "poison".
    struct StubProvider {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<ItemResult>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|text| {
                    if text.contains("poison") {
                        Err(EmbeddingError::ProviderUnavailable("poisoned".into()))
                    } else {
                        let sum: u32 = text.bytes().map(u32::from).sum();
                        Ok((0..self.dims).map(|i| (sum + i as u32) as f32).collect())
                    }
                })
                .collect())
        }
    }

    fn chunk(id: usize, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id("doc0", id),
            document_id: "doc0".to_string(),
            ordinal: id,
            span: (0, text.chars().count()),
            text: text.to_string(),
            metadata: Metadata::new(),
            char_len: text.chars().count(),
        }
    }

    #[tokio::test]
    async fn partial_failure_reports_failed_ids() {
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| {
                if i == 3 || i == 7 {
                    chunk(i, &format!("poison text {i}"))
                } else {
                    chunk(i, &format!("healthy text {i}"))
                }
            })
            .collect();

        let embedder = Embedder::new(Arc::new(StubProvider { dims: 4 }), 4);
        let outcome = embedder.embed_chunks(&chunks).await;

        assert_eq!(outcome.vectors.len(), 8);
        assert_eq!(
            outcome.failed,
            vec![Chunk::make_id("doc0", 3), Chunk::make_id("doc0", 7)]
        );
        for (_, v) in &outcome.vectors {
            assert_eq!(v.len(), 4);
        }
    }

    #[tokio::test]
    async fn batching_does_not_change_output() {
        let chunks: Vec<Chunk> = (0..7).map(|i| chunk(i, &format!("note {i}"))).collect();
        let small = Embedder::new(Arc::new(StubProvider { dims: 3 }), 2);
        let large = Embedder::new(Arc::new(StubProvider { dims: 3 }), 100);

        let a = small.embed_chunks(&chunks).await;
        let b = large.embed_chunks(&chunks).await;
        assert_eq!(a.vectors, b.vectors);
        assert!(a.failed.is_empty());
    }

    #[tokio::test]
    async fn whole_batch_failure_marks_every_chunk() {
        struct DownProvider;

        #[async_trait]
        impl EmbeddingProvider for DownProvider {
            fn model_name(&self) -> &str {
                "down"
            }
            fn dims(&self) -> usize {
                4
            }
            async fn embed_batch(
                &self,
                _texts: &[String],
            ) -> Result<Vec<ItemResult>, EmbeddingError> {
                Err(EmbeddingError::ProviderUnavailable("offline".into()))
            }
        }

        let chunks: Vec<Chunk> = (0..3).map(|i| chunk(i, "text")).collect();
        let embedder = Embedder::new(Arc::new(DownProvider), 10);
        let outcome = embedder.embed_chunks(&chunks).await;
        assert!(outcome.vectors.is_empty());
        assert_eq!(outcome.failed.len(), 3);
    }

    #[tokio::test]
    async fn embed_query_returns_single_vector() {
        let embedder = Embedder::new(Arc::new(StubProvider { dims: 5 }), 8);
        let vector = embedder.embed_query("what is ownership?").await.unwrap();
        assert_eq!(vector.len(), 5);
    }
}
