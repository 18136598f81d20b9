use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub path: PathBuf,
    /// File extensions admitted into the pipeline. Files with any other
    /// extension never reach the parser.
    #[serde(default = "default_file_extensions")]
    pub file_extensions: Vec<String>,
    /// Folder names excluded from discovery anywhere in the tree.
    #[serde(default = "default_exclude_folders")]
    pub exclude_folders: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/vault"),
            file_extensions: default_file_extensions(),
            exclude_folders: default_exclude_folders(),
        }
    }
}

fn default_file_extensions() -> Vec<String> {
    vec![".md".to_string(), ".markdown".to_string()]
}

fn default_exclude_folders() -> Vec<String> {
    vec![
        ".obsidian".to_string(),
        ".trash".to_string(),
        "templates".to_string(),
    ]
}

/// Chunk splitting strategy.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Sliding character window with overlap.
    Fixed,
    /// Split at paragraph, then sentence, then character boundaries.
    Recursive,
    /// Group sentences until a topic shift or the size ceiling.
    Semantic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_strategy")]
    pub strategy: ChunkStrategy,
    /// Word-overlap similarity below which the semantic strategy starts a
    /// new chunk.
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            strategy: default_strategy(),
            semantic_threshold: default_semantic_threshold(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_strategy() -> ChunkStrategy {
    ChunkStrategy::Recursive
}
fn default_semantic_threshold() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// OpenAI-compatible embeddings endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `sqlite` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// `cosine` or `dot`. Fixed at collection creation.
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_index_path(),
            collection: default_collection(),
            metric: default_metric(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.sqlite")
}
fn default_collection() -> String {
    "mneme_knowledge".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Durable file-hash tracking database, scoped to one vault.
    #[serde(default = "default_state_db")]
    pub state_db: PathBuf,
    /// Upper bound on files processed concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Strict: a malformed frontmatter block fails the file. Lenient: the
    /// file is ingested with empty metadata.
    #[serde(default)]
    pub strict_metadata: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            state_db: default_state_db(),
            max_concurrency: default_max_concurrency(),
            strict_metadata: false,
        }
    }
}

fn default_state_db() -> PathBuf {
    PathBuf::from("./data/ingestion.db")
}
fn default_max_concurrency() -> usize {
    4
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "openai" => {}
        other => anyhow::bail!("Unknown embedding provider: '{}'. Must be openai.", other),
    }

    match config.index.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!("Unknown index backend: '{}'. Must be sqlite or memory.", other),
    }
    match config.index.metric.as_str() {
        "cosine" | "dot" => {}
        other => anyhow::bail!("Unknown index metric: '{}'. Must be cosine or dot.", other),
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
    }

    if config.ingestion.max_concurrency == 0 {
        anyhow::bail!("ingestion.max_concurrency must be >= 1");
    }

    Ok(())
}
