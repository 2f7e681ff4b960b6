//! On-disk vector store for one index directory.
//!
//! Each index directory holds:
//!
//! | File | Contents |
//! |------|----------|
//! | `chunks.json` | chunk metadata and text, in insertion order |
//! | `vectors.bin` | little-endian f32 embeddings, one row per chunk |
//! | `index.json` | [`IndexMeta`]: collection, model, dims, chunk count, build time |
//! | `manifest.json` | written last by the indexer, see [`crate::manifest`] |
//!
//! Search is brute-force cosine similarity over all rows, which is the
//! right trade-off for per-document collections of a few thousand chunks.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ScoredChunk};

pub const CHUNKS_FILE: &str = "chunks.json";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const META_FILE: &str = "index.json";

/// Descriptive metadata persisted next to the vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub collection: String,
    pub model: String,
    pub dims: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

/// Similarity search over embedded chunks.
pub trait VectorStore: Send + Sync {
    /// Number of stored chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k` chunks most similar to `query`, best first.
    fn similarity_search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk>;
}

/// In-memory rows backed by flat files.
#[derive(Debug, Clone, Default)]
pub struct FlatStore {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    dims: usize,
}

impl FlatStore {
    /// Build a store from parallel chunk and vector lists.
    pub fn from_parts(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        if let Some(bad) = vectors.iter().position(|v| v.len() != dims) {
            bail!(
                "inconsistent embedding dimensions: row {} has {}, expected {}",
                bad,
                vectors[bad].len(),
                dims
            );
        }
        Ok(Self {
            chunks,
            vectors,
            dims,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Write `chunks.json`, `vectors.bin` and `index.json` into `dir`.
    pub fn persist(&self, dir: &Path, collection: &str, model: &str) -> Result<IndexMeta> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        let chunks_json = serde_json::to_string(&self.chunks)?;
        std::fs::write(dir.join(CHUNKS_FILE), chunks_json)
            .with_context(|| format!("Failed to write {}", CHUNKS_FILE))?;

        let mut blob = Vec::with_capacity(self.vectors.len() * self.dims * 4);
        for vector in &self.vectors {
            blob.extend(vec_to_blob(vector));
        }
        std::fs::write(dir.join(VECTORS_FILE), blob)
            .with_context(|| format!("Failed to write {}", VECTORS_FILE))?;

        let meta = IndexMeta {
            collection: collection.to_string(),
            model: model.to_string(),
            dims: self.dims,
            chunk_count: self.chunks.len(),
            built_at: Utc::now(),
        };
        std::fs::write(dir.join(META_FILE), serde_json::to_string_pretty(&meta)?)
            .with_context(|| format!("Failed to write {}", META_FILE))?;

        Ok(meta)
    }

    /// Load a store previously written by [`FlatStore::persist`].
    pub fn open(dir: &Path) -> Result<(Self, IndexMeta)> {
        let meta = read_meta(dir)?;

        let chunks_json = std::fs::read_to_string(dir.join(CHUNKS_FILE))
            .with_context(|| format!("Failed to read {} in {}", CHUNKS_FILE, dir.display()))?;
        let chunks: Vec<Chunk> = serde_json::from_str(&chunks_json)
            .with_context(|| format!("Failed to parse {}", CHUNKS_FILE))?;

        let blob = std::fs::read(dir.join(VECTORS_FILE))
            .with_context(|| format!("Failed to read {} in {}", VECTORS_FILE, dir.display()))?;
        let row_bytes = meta.dims.checked_mul(4).with_context(|| {
            format!("{} in {} has an impossible dims value", META_FILE, dir.display())
        })?;
        let expected = meta.chunk_count.checked_mul(row_bytes).with_context(|| {
            format!("{} in {} has an impossible chunk count", META_FILE, dir.display())
        })?;
        if chunks.len() != meta.chunk_count || blob.len() != expected {
            bail!("index files in {} are inconsistent", dir.display());
        }

        let vectors = if row_bytes == 0 {
            vec![Vec::new(); chunks.len()]
        } else {
            blob.chunks_exact(row_bytes).map(blob_to_vec).collect()
        };

        Ok((Self::from_parts(chunks, vectors)?, meta))
    }
}

impl VectorStore for FlatStore {
    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn similarity_search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }
}

pub fn read_meta(dir: &Path) -> Result<IndexMeta> {
    let content = std::fs::read_to_string(dir.join(META_FILE))
        .with_context(|| format!("Failed to read {} in {}", META_FILE, dir.display()))?;
    Ok(serde_json::from_str(&content)?)
}
