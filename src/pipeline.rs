//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for a vault: discovery → parse → chunk →
//! embed → index, with per-file content hashes driving incremental runs
//! and deletion detection. One bad file never aborts a run — it is
//! recorded in the [`IngestionRecord`] and processing continues.
//!
//! Per file, the pipeline moves through
//! `Discovered → Parsed → Chunked → Embedded → Indexed`, diverting to
//! `Failed` at any stage. Independent files are processed concurrently up
//! to a configured bound; per-document ordering (delete stale entries
//! immediately before upserting fresh ones) guarantees the index never
//! holds chunks from two content versions of the same document.
//!
//! Embedding failures follow an all-or-nothing policy per document: if any
//! chunk of a document fails to embed, none of its chunks are indexed and
//! its state hash is not advanced, so the next run retries the whole file.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::chunker::chunk_document;
use crate::config::Config;
use crate::embed::Embedder;
use crate::error::IngestionError;
use crate::index::{ChunkPayload, DistanceMetric, IndexPoint, VectorIndex};
use crate::models::IngestionRecord;
use crate::parser::parse_document;
use crate::state::{FileState, IngestStateDb};
use crate::vault::{scan_vault, DiscoveredFile};

/// Cooperative cancellation signal for an ingestion run.
///
/// Cancelling stops new files from being scheduled; in-flight files finish
/// or fail cleanly, and the run still produces a valid (partial) record.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for one ingestion run.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Skip files whose content hash is unchanged since the last run.
    pub incremental: bool,
    /// Parse and chunk only; write nothing.
    pub dry_run: bool,
    pub cancel: CancelFlag,
}

enum FileOutcome {
    Skipped,
    Indexed { created: usize, deleted: usize },
    Failed { path: String, error: String },
    NotScheduled,
}

/// Orchestrates ingestion runs and serves the last run's record.
///
/// At most one run is active at a time; a request arriving while one is in
/// progress fails with [`IngestionError::AlreadyRunning`] rather than
/// interleaving writes. That guard is the pipeline's only process-wide
/// lock.
pub struct IngestionPipeline {
    config: Config,
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    state: IngestStateDb,
    run_active: AtomicBool,
    last_record: RwLock<Option<IngestionRecord>>,
}

impl IngestionPipeline {
    pub fn new(
        config: Config,
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        state: IngestStateDb,
    ) -> Self {
        Self {
            config,
            embedder,
            index,
            state,
            run_active: AtomicBool::new(false),
            last_record: RwLock::new(None),
        }
    }

    /// Run ingestion over the vault and return the finalized record.
    pub async fn run(
        &self,
        vault_path: &Path,
        options: RunOptions,
    ) -> Result<IngestionRecord, IngestionError> {
        if self.run_active.swap(true, Ordering::SeqCst) {
            return Err(IngestionError::AlreadyRunning);
        }

        let result = self.run_inner(vault_path, &options).await;
        self.run_active.store(false, Ordering::SeqCst);

        if let Ok(record) = &result {
            *self.last_record.write().unwrap() = Some(record.clone());
        }
        result
    }

    /// The most recent finished run, if any. Cheap; intended for status
    /// polling.
    pub fn last_record(&self) -> Option<IngestionRecord> {
        self.last_record.read().unwrap().clone()
    }

    async fn run_inner(
        &self,
        vault_path: &Path,
        options: &RunOptions,
    ) -> Result<IngestionRecord, IngestionError> {
        let mut record = IngestionRecord::start();
        info!(
            run_id = %record.run_id,
            vault = %vault_path.display(),
            incremental = options.incremental,
            dry_run = options.dry_run,
            "starting ingestion run"
        );

        if !options.dry_run {
            let metric = DistanceMetric::from_str(&self.config.index.metric)?;
            self.index
                .ensure_collection(self.embedder.dims(), metric)
                .await?;
        }

        let files = scan_vault(vault_path, &self.config.vault)?;
        record.files_scanned = files.len();

        let prior = self.state.load_all().await?;

        // Files recorded previously but absent from discovery were removed
        // from the vault; drop their chunks and state entries.
        if !options.dry_run {
            let discovered: HashSet<&str> =
                files.iter().map(|f| f.relative_path.as_str()).collect();
            for (path, file_state) in &prior {
                if discovered.contains(path.as_str()) {
                    continue;
                }
                match self.index.delete_by_document(&file_state.document_id).await {
                    Ok(removed) => {
                        self.state.remove(path).await?;
                        record.chunks_deleted += removed;
                        info!(%path, removed, "removed deleted document from index");
                    }
                    Err(err) => record.record_failure(path.clone(), err),
                }
            }
        }

        let file_futures: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = FileOutcome> + Send + '_>>,
        > = files
            .iter()
            .map(|file| {
                let prior_state = prior.get(&file.relative_path);
                Box::pin(self.process_file(file, prior_state, options)) as _
            })
            .collect();
        let outcomes: Vec<FileOutcome> = stream::iter(file_futures)
            .buffer_unordered(self.config.ingestion.max_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                FileOutcome::Skipped => record.files_skipped += 1,
                FileOutcome::Indexed { created, deleted } => {
                    record.chunks_created += created;
                    record.chunks_deleted += deleted;
                }
                FileOutcome::Failed { path, error } => record.record_failure(path, error),
                FileOutcome::NotScheduled => record.cancelled = true,
            }
        }
        record.cancelled |= options.cancel.is_cancelled();
        record.finalize();

        info!(
            run_id = %record.run_id,
            scanned = record.files_scanned,
            skipped = record.files_skipped,
            failed = record.files_failed,
            chunks_created = record.chunks_created,
            chunks_deleted = record.chunks_deleted,
            cancelled = record.cancelled,
            "ingestion run finished"
        );

        Ok(record)
    }

    async fn process_file(
        &self,
        file: &DiscoveredFile,
        prior: Option<&FileState>,
        options: &RunOptions,
    ) -> FileOutcome {
        if options.cancel.is_cancelled() {
            return FileOutcome::NotScheduled;
        }

        let path = file.relative_path.clone();

        let doc = match parse_document(file, self.config.ingestion.strict_metadata) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(%path, %err, "parse failed");
                return FileOutcome::Failed {
                    path,
                    error: err.to_string(),
                };
            }
        };

        // Content hash unchanged since the last recorded run: skip without
        // re-chunking, re-embedding, or touching the index.
        if options.incremental {
            if let Some(prior) = prior {
                if prior.content_hash == doc.content_hash {
                    debug!(%path, "skipping unchanged file");
                    return FileOutcome::Skipped;
                }
            }
        }

        let chunks = match chunk_document(&doc, &self.config.chunking) {
            Ok(chunks) => chunks,
            Err(err) => {
                return FileOutcome::Failed {
                    path,
                    error: err.to_string(),
                }
            }
        };

        if options.dry_run {
            return FileOutcome::Indexed {
                created: chunks.len(),
                deleted: 0,
            };
        }

        let embedded = self.embedder.embed_chunks(&chunks).await;
        if !embedded.failed.is_empty() {
            // All-or-nothing per document: leave the prior version intact
            // and let the next run retry the whole file.
            return FileOutcome::Failed {
                path,
                error: format!(
                    "embedding failed for {} of {} chunks",
                    embedded.failed.len(),
                    chunks.len()
                ),
            };
        }

        // Delete the previous version's entries immediately before the
        // fresh upsert, so no reader sees stale and fresh chunks mixed.
        let deleted = match self.index.delete_by_document(&doc.id).await {
            Ok(n) => n,
            Err(err) => {
                return FileOutcome::Failed {
                    path,
                    error: err.to_string(),
                }
            }
        };

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let Some(vector) = embedded.vectors.get(&chunk.id) else {
                return FileOutcome::Failed {
                    path,
                    error: format!("no vector produced for chunk {}", chunk.id),
                };
            };
            points.push(IndexPoint {
                chunk_id: chunk.id.clone(),
                vector: vector.clone(),
                payload: ChunkPayload {
                    document_id: doc.id.clone(),
                    document_path: doc.relative_path.clone(),
                    ordinal: chunk.ordinal,
                    span: chunk.span,
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                },
            });
        }

        if let Err(err) = self.index.upsert(&points).await {
            return FileOutcome::Failed {
                path,
                error: err.to_string(),
            };
        }

        if let Err(err) = self
            .state
            .upsert(
                &path,
                &doc.id,
                &doc.content_hash,
                doc.modified_at.timestamp(),
            )
            .await
        {
            return FileOutcome::Failed {
                path,
                error: err.to_string(),
            };
        }

        debug!(%path, created = points.len(), deleted, "file indexed");
        FileOutcome::Indexed {
            created: points.len(),
            deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbeddingProvider, ItemResult};
    use crate::error::EmbeddingError;
    use crate::index::MemoryIndex;
    use async_trait::async_trait;
    use std::fs;

    /// Deterministic provider: vector = normalized byte-sum fingerprint.
    struct StubProvider;

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<ItemResult>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let sum: u32 = t.bytes().map(u32::from).sum();
                    Ok(vec![1.0, (sum % 97) as f32 / 97.0, (sum % 31) as f32 / 31.0])
                })
                .collect())
        }
    }

    /// Provider that blocks until released, to hold a run open.
    struct GatedProvider {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl EmbeddingProvider for GatedProvider {
        fn model_name(&self) -> &str {
            "gated"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<ItemResult>, EmbeddingError> {
            self.entered.notify_one();
            let _permit = self.release.acquire().await.map_err(|_| {
                EmbeddingError::ProviderUnavailable("gate closed".to_string())
            })?;
            Ok(texts.iter().map(|_| Ok(vec![1.0, 0.0, 0.0])).collect())
        }
    }

    async fn pipeline_with(
        provider: Arc<dyn EmbeddingProvider>,
        vault: &Path,
    ) -> Arc<IngestionPipeline> {
        let mut config = Config::default();
        config.vault.path = vault.to_path_buf();
        config.index.backend = "memory".to_string();
        config.chunking.chunk_size = 50;
        config.chunking.overlap = 10;
        config.chunking.strategy = crate::config::ChunkStrategy::Fixed;

        let embedder = Embedder::new(provider, 8);
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
        let state = IngestStateDb::open_memory().await.unwrap();
        Arc::new(IngestionPipeline::new(config, embedder, index, state))
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.md"), "some note body here").unwrap();

        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Semaphore::new(0));
        let provider = Arc::new(GatedProvider {
            entered: entered.clone(),
            release: release.clone(),
        });

        let pipeline = pipeline_with(provider, tmp.path()).await;
        let vault = tmp.path().to_path_buf();

        let background = {
            let pipeline = pipeline.clone();
            let vault = vault.clone();
            tokio::spawn(async move { pipeline.run(&vault, RunOptions::default()).await })
        };

        // Wait until the first run is provably inside the pipeline.
        entered.notified().await;

        let err = pipeline.run(&vault, RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, IngestionError::AlreadyRunning));

        release.add_permits(100);
        let record = background.await.unwrap().unwrap();
        assert_eq!(record.files_failed, 0);
        assert!(record.chunks_created > 0);

        // The guard is released once the run completes.
        let again = pipeline.run(&vault, RunOptions::default()).await.unwrap();
        assert_eq!(again.files_scanned, 1);
    }

    #[tokio::test]
    async fn cancelled_run_produces_finalized_partial_record() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..4 {
            fs::write(tmp.path().join(format!("n{i}.md")), format!("note {i}")).unwrap();
        }

        let pipeline = pipeline_with(Arc::new(StubProvider), tmp.path()).await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let record = pipeline
            .run(
                tmp.path(),
                RunOptions {
                    incremental: false,
                    dry_run: false,
                    cancel,
                },
            )
            .await
            .unwrap();

        assert!(record.cancelled);
        assert!(record.finished_at.is_some());
        assert_eq!(record.files_scanned, 4);
        assert_eq!(record.chunks_created, 0);
        assert_eq!(record.files_failed, 0);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.md"), "a body with enough text to chunk").unwrap();

        let pipeline = pipeline_with(Arc::new(StubProvider), tmp.path()).await;
        let record = pipeline
            .run(
                tmp.path(),
                RunOptions {
                    incremental: false,
                    dry_run: true,
                    cancel: CancelFlag::new(),
                },
            )
            .await
            .unwrap();

        assert!(record.chunks_created > 0);
        // Nothing was persisted: the index is empty and so is the state
        // mapping.
        assert!(pipeline.state.load_all().await.unwrap().is_empty());
        assert_eq!(pipeline.index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn last_record_reflects_most_recent_run() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.md"), "body text").unwrap();

        let pipeline = pipeline_with(Arc::new(StubProvider), tmp.path()).await;
        assert!(pipeline.last_record().is_none());

        let record = pipeline.run(tmp.path(), RunOptions::default()).await.unwrap();
        let last = pipeline.last_record().unwrap();
        assert_eq!(last.run_id, record.run_id);
    }
}
