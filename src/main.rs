//! # mneme CLI
//!
//! The `mneme` binary is the caller-facing surface of the ingestion and
//! retrieval core.
//!
//! ## Usage
//!
//! ```bash
//! mneme --config ./mneme.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mneme init` | Create the state database and index collection |
//! | `mneme ingest` | Ingest the vault (incremental by default) |
//! | `mneme query "<text>"` | Retrieve matching chunks with citations |
//! | `mneme status` | Show tracked-file and index counts |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize storage
//! mneme init --config ./mneme.toml
//!
//! # Incremental ingestion of the configured vault
//! mneme ingest
//!
//! # Full re-ingestion of a specific vault
//! mneme ingest --vault ~/notes --full
//!
//! # Parse and chunk without writing anything
//! mneme ingest --dry-run
//!
//! # Query with a custom cutoff
//! mneme query "what did I write about ownership?" --min-score 0.6
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use mneme::config::{self, Config};
use mneme::embed::{create_provider, Embedder};
use mneme::index::{DistanceMetric, MemoryIndex, SqliteIndex, VectorIndex};
use mneme::pipeline::{CancelFlag, IngestionPipeline, RunOptions};
use mneme::retriever::{citations, Retriever};
use mneme::state::IngestStateDb;

/// mneme — markdown vault ingestion and retrieval.
#[derive(Parser)]
#[command(
    name = "mneme",
    about = "Index a markdown vault into a vector store and query it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./mneme.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state database and the index collection. Idempotent.
    Init,

    /// Ingest the vault: parse, chunk, embed, and index changed files.
    Ingest {
        /// Vault path (overrides the configured one).
        #[arg(long)]
        vault: Option<PathBuf>,

        /// Reprocess every file regardless of recorded content hashes.
        #[arg(long)]
        full: bool,

        /// Parse and chunk only; write nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve matching chunks for a query.
    Query {
        /// The query text.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum similarity score.
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Show tracked-file and index counts.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest {
            vault,
            full,
            dry_run,
        } => run_ingest(&config, vault, full, dry_run).await,
        Commands::Query {
            query,
            top_k,
            min_score,
        } => run_query(&config, &query, top_k, min_score).await,
        Commands::Status => run_status(&config).await,
    }
}

async fn open_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.index.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryIndex::new())),
        _ => Ok(Arc::new(
            SqliteIndex::open(&config.index.path, &config.index.collection)
                .await
                .context("Failed to open index database")?,
        )),
    }
}

async fn run_init(config: &Config) -> Result<()> {
    IngestStateDb::open(&config.ingestion.state_db)
        .await
        .context("Failed to open state database")?;

    let index = open_index(config).await?;
    let metric: DistanceMetric = config.index.metric.parse()?;
    index
        .ensure_collection(config.embedding.dims, metric)
        .await?;

    println!("initialized");
    println!("  state db: {}", config.ingestion.state_db.display());
    println!(
        "  index: {} ({} dims, {})",
        config.index.collection, config.embedding.dims, config.index.metric
    );
    Ok(())
}

async fn run_ingest(
    config: &Config,
    vault: Option<PathBuf>,
    full: bool,
    dry_run: bool,
) -> Result<()> {
    let vault_path = vault.unwrap_or_else(|| config.vault.path.clone());

    let provider = create_provider(&config.embedding)?;
    let embedder = Embedder::new(provider, config.embedding.batch_size);
    let index = open_index(config).await?;
    let state = IngestStateDb::open(&config.ingestion.state_db)
        .await
        .context("Failed to open state database")?;

    let pipeline = IngestionPipeline::new(config.clone(), embedder, index, state);

    // Ctrl-C stops scheduling new files; in-flight ones finish cleanly.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cancellation requested, finishing in-flight files");
                cancel.cancel();
            }
        });
    }

    let record = pipeline
        .run(
            &vault_path,
            RunOptions {
                incremental: !full,
                dry_run,
                cancel,
            },
        )
        .await?;

    println!("ingest {}{}", vault_path.display(), if dry_run { " (dry-run)" } else { "" });
    println!("  run id: {}", record.run_id);
    println!("  files scanned: {}", record.files_scanned);
    println!("  files skipped: {}", record.files_skipped);
    println!("  files failed: {}", record.files_failed);
    println!("  chunks created: {}", record.chunks_created);
    println!("  chunks deleted: {}", record.chunks_deleted);
    for failure in &record.failures {
        println!("  failed: {} ({})", failure.path, failure.error);
    }
    if record.cancelled {
        println!("  cancelled before completion");
    }
    Ok(())
}

async fn run_query(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    min_score: Option<f32>,
) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let embedder = Embedder::new(provider, config.embedding.batch_size);
    let index = open_index(config).await?;

    let retriever = Retriever::new(embedder, index, config.retrieval.clone());
    let results = retriever.retrieve(query, top_k, min_score).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, result.score, result.document_path);
        println!(
            "    excerpt: \"{}\"",
            result.text.replace('\n', " ").trim()
        );
        println!("    chunk: {}", result.chunk_id);
        println!();
    }

    println!("sources:");
    for citation in citations(&results) {
        println!(
            "  {} ({}, score {:.2})",
            citation.document_path, citation.chunk_id, citation.score
        );
    }
    Ok(())
}

async fn run_status(config: &Config) -> Result<()> {
    let state = IngestStateDb::open(&config.ingestion.state_db)
        .await
        .context("Failed to open state database")?;
    let tracked = state.load_all().await?;

    let index = open_index(config).await?;
    let points = index.count().await.unwrap_or(0);

    println!("status");
    println!("  tracked files: {}", tracked.len());
    println!("  indexed chunks: {}", points);
    Ok(())
}
