//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Each pipeline stage has its own error enum so callers can match on the
//! failure kind without string inspection. Per-file errors during ingestion
//! are captured into the run's [`IngestionRecord`](crate::models::IngestionRecord)
//! rather than aborting the run; retrieval errors are always surfaced so
//! callers can distinguish "no matches" from "retrieval broke".

use std::path::PathBuf;

/// Failure while reading or parsing a single vault file.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The leading metadata block exists but could not be parsed, and the
    /// parser is configured as strict.
    #[error("malformed metadata header in {path}: {reason}")]
    MalformedHeader { path: PathBuf, reason: String },

    /// The file could not be read from disk.
    #[error("unreadable file {path}: {source}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file contents are not valid UTF-8.
    #[error("unsupported encoding in {path}: not valid UTF-8")]
    UnsupportedEncoding { path: PathBuf },
}

impl ParseError {
    /// The vault file this error refers to.
    pub fn path(&self) -> &PathBuf {
        match self {
            ParseError::MalformedHeader { path, .. } => path,
            ParseError::UnreadableFile { path, .. } => path,
            ParseError::UnsupportedEncoding { path } => path,
        }
    }
}

/// Rejected chunking configuration.
#[derive(Debug, thiserror::Error)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

/// Failure while producing embedding vectors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// The provider could not be reached, or retries were exhausted on
    /// transient failures.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider rejected the request for rate limiting and retries
    /// were exhausted.
    #[error("embedding provider rate limited: {0}")]
    RateLimited(String),

    /// The provider returned vectors of an unexpected dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Failure in the vector index backend.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The backend could not serve the request (connection, I/O, storage).
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    /// A vector's dimensionality does not match the collection's.
    #[error("index dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An operation was attempted before the collection was created.
    #[error("collection {0:?} does not exist")]
    CollectionMissing(String),
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        IndexError::Unavailable(err.to_string())
    }
}

/// Run-level ingestion failure. Per-file failures are not errors at this
/// level; they are recorded in the run's `IngestionRecord`.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    /// A run request arrived while another run was in progress.
    #[error("an ingestion run is already in progress")]
    AlreadyRunning,

    /// The durable incremental-state database failed.
    #[error("ingestion state database error: {0}")]
    State(String),

    /// Vault discovery failed before any file was processed.
    #[error("vault discovery failed: {0}")]
    Vault(String),

    /// The vector index could not be prepared for the run.
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<sqlx::Error> for IngestionError {
    fn from(err: sqlx::Error) -> Self {
        IngestionError::State(err.to_string())
    }
}

/// Failure while answering a retrieval query.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The query text could not be embedded.
    #[error("query embedding failed: {0}")]
    EmbeddingFailed(#[from] EmbeddingError),

    /// The vector index could not be searched.
    #[error("index search failed: {0}")]
    IndexUnavailable(#[from] IndexError),
}
