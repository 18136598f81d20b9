//! Core data models used throughout mneme.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and retrieval pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Loosely-typed metadata value parsed from a note's frontmatter block.
///
/// Frontmatter is an open mapping of string keys to a small closed set of
/// value shapes; anything else the parser encounters is dropped with a
/// warning rather than forcing a rigid schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
}

impl MetaValue {
    /// The value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a list of strings, if it is one.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            MetaValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Open metadata mapping attached to documents and chunks.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A parsed vault note, normalized and ready for chunking.
///
/// Documents are ephemeral: the parser produces one per source file on
/// every ingestion pass and the chunker consumes it immediately. Nothing
/// persists the document itself — only its chunks reach the vector index.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier derived from the vault-relative path.
    pub id: String,
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Path relative to the vault root, with forward slashes.
    pub relative_path: String,
    /// Title from frontmatter, falling back to the file stem.
    pub title: String,
    /// Body text with the metadata block removed, line endings normalized.
    pub body: String,
    /// Parsed frontmatter mapping.
    pub metadata: Metadata,
    /// Outbound wikilink targets found in the body.
    pub links: BTreeSet<String>,
    /// Tags from inline `#tag` tokens and the frontmatter `tags` key.
    pub tags: BTreeSet<String>,
    /// SHA-256 of the normalized file contents, for change detection.
    pub content_hash: String,
    /// Filesystem modification time of the source file.
    pub modified_at: DateTime<Utc>,
}

/// A bounded segment of a document's body, the unit of embedding and
/// retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Deterministic identifier: `{document_id}:{ordinal:04}`. Re-chunking
    /// an unchanged document reproduces identical ids.
    pub id: String,
    /// Identifier of the parent document.
    pub document_id: String,
    /// Zero-based position within the parent document.
    pub ordinal: usize,
    /// Character span `[start, end)` within the normalized body.
    pub span: (usize, usize),
    /// The chunk text.
    pub text: String,
    /// Metadata inherited from the parent document.
    pub metadata: Metadata,
    /// Character length of `text`.
    pub char_len: usize,
}

impl Chunk {
    /// Build the deterministic chunk identifier for a document + ordinal.
    pub fn make_id(document_id: &str, ordinal: usize) -> String {
        format!("{document_id}:{ordinal:04}")
    }
}

/// One file that failed during an ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailure {
    pub path: String,
    pub error: String,
}

/// Summary of a single ingestion run.
///
/// Created when the run starts, appended to as files are processed, and
/// finalized exactly once when the run ends. Never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub chunks_deleted: usize,
    pub failures: Vec<IngestFailure>,
    /// True when the run was cancelled before all files were scheduled.
    pub cancelled: bool,
}

impl IngestionRecord {
    /// Start a new record with a fresh run id.
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            files_scanned: 0,
            files_skipped: 0,
            files_failed: 0,
            chunks_created: 0,
            chunks_deleted: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Record a per-file failure. The run continues with the next file.
    pub fn record_failure(&mut self, path: impl Into<String>, error: impl ToString) {
        self.files_failed += 1;
        self.failures.push(IngestFailure {
            path: path.into(),
            error: error.to_string(),
        });
    }

    /// Stamp the end time. A finalized record is never mutated again.
    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// One matched chunk for a retrieval query.
///
/// Ordered by descending similarity score; ties broken by ascending chunk
/// id so result order is deterministic. Constructed per query, never
/// stored.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub score: f32,
    /// Vault-relative path of the originating document.
    pub document_path: String,
    pub text: String,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_deterministic_and_ordered() {
        assert_eq!(Chunk::make_id("ab12", 0), "ab12:0000");
        assert_eq!(Chunk::make_id("ab12", 7), "ab12:0007");
        // Lexicographic order matches ordinal order for same-document chunks.
        assert!(Chunk::make_id("ab12", 9) < Chunk::make_id("ab12", 10));
    }

    #[test]
    fn record_failure_accumulates() {
        let mut record = IngestionRecord::start();
        record.record_failure("notes/a.md", "boom");
        record.record_failure("notes/b.md", "bang");
        assert_eq!(record.files_failed, 2);
        assert_eq!(record.failures[0].path, "notes/a.md");
        assert!(record.finished_at.is_none());
        record.finalize();
        assert!(record.finished_at.is_some());
    }
}
