//! Core data types shared by the indexing and query pipelines.

use serde::{Deserialize, Serialize};

/// A retrieval unit: a bounded span of one document's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Document name (relative path) the chunk came from.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned from similarity search together with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}
