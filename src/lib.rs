//! # mneme
//!
//! Ingestion and retrieval core for a personal markdown knowledge base
//! (an Obsidian-style vault): parse notes, split them into overlapping
//! chunks, embed them, and serve ranked, scored, cited chunk matches for
//! natural-language queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────────┐   ┌─────────────┐
//! │   Vault    │──▶│     Pipeline      │──▶│ VectorIndex │
//! │ (markdown) │   │ parse+chunk+embed │   │ sqlite/mem  │
//! └────────────┘   └───────────────────┘   └──────┬──────┘
//!                                                 │
//!                        ┌────────────────────────┤
//!                        ▼                        ▼
//!                  ┌───────────┐           ┌───────────┐
//!                  │ Retriever │           │    CLI    │
//!                  │  (query)  │           │  (mneme)  │
//!                  └───────────┘           └───────────┘
//! ```
//!
//! Ingestion is idempotent and incremental: per-file content hashes are
//! tracked in a durable state database, unchanged files are skipped, and a
//! changed document's stale chunks are deleted immediately before its
//! fresh chunks are upserted. Retrieval returns at most `top_k` results
//! scoring at least `min_score`, descending, with deterministic
//! tie-breaking.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`vault`] | Vault discovery with include/exclude filters |
//! | [`parser`] | Markdown note parsing (frontmatter, wikilinks, tags) |
//! | [`chunker`] | Deterministic chunking strategies |
//! | [`embed`] | Embedding provider abstraction and batching |
//! | [`index`] | Vector index backends |
//! | [`pipeline`] | Ingestion orchestration |
//! | [`retriever`] | Query-time retrieval |
//! | [`state`] | Durable incremental-ingestion state |
//! | [`error`] | Error taxonomy |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embed;
pub mod error;
pub mod index;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod retriever;
pub mod state;
pub mod vault;
