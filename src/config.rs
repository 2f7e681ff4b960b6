//! Configuration loading.
//!
//! Settings come from an optional TOML file, then environment overrides
//! (`DOCS_DIR`, `DB_DIR`, `COLLECTION_NAME`). A `.env` file in the working
//! directory is loaded first so those overrides can live there too.
//!
//! ```toml
//! [paths]
//! docs_dir = "docs"
//! index_dir = "db"
//! collection_prefix = "my_rag_db"
//!
//! [chunking]
//! chunk_size = 500
//! chunk_overlap = 50
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! batch_size = 128
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o"
//!
//! [retrieval]
//! top_k = 3
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Hard ceiling for texts per embedding request.
pub const MAX_EMBED_BATCH: usize = 128;

/// Bounds for the retriever top-k.
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    /// Descend into symlinked directories and index symlinked files.
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            index_dir: default_index_dir(),
            collection_prefix: default_collection_prefix(),
            follow_symlinks: false,
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("db")
}
fn default_collection_prefix() -> String {
    "my_rag_db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for self-hosted providers (Ollama).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    MAX_EMBED_BATCH
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

impl EmbeddingConfig {
    /// Texts per provider request, never above [`MAX_EMBED_BATCH`].
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_EMBED_BATCH)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_tokens() -> u32 {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Retry once with a wider retrieval when the answer or sources come back empty.
    #[serde(default)]
    pub widen_on_empty: bool,
    #[serde(default = "default_fallback_k")]
    pub fallback_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            widen_on_empty: false,
            fallback_k: default_fallback_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_fallback_k() -> usize {
    8
}

impl Config {
    /// Defaults only: no file, no environment.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Apply `DOCS_DIR`, `DB_DIR` and `COLLECTION_NAME` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(dir) = non_empty("DOCS_DIR") {
            self.paths.docs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty("DB_DIR") {
            self.paths.index_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = non_empty("COLLECTION_NAME") {
            self.paths.collection_prefix = prefix;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }

        if self.embedding.batch_size == 0 || self.embedding.batch_size > MAX_EMBED_BATCH {
            bail!("embedding.batch_size must be in 1..={}", MAX_EMBED_BATCH);
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        if !(MIN_TOP_K..=MAX_TOP_K).contains(&self.retrieval.top_k) {
            bail!(
                "retrieval.top_k must be in [{}, {}]",
                MIN_TOP_K,
                MAX_TOP_K
            );
        }
        if self.retrieval.fallback_k == 0 {
            bail!("retrieval.fallback_k must be >= 1");
        }

        if self.paths.collection_prefix.trim().is_empty() {
            bail!("paths.collection_prefix must not be empty");
        }

        Ok(())
    }
}

/// Read the TOML file at `path` (defaults when it does not exist), then
/// apply `.env` and environment overrides, then validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let _ = dotenvy::dotenv();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::minimal()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
