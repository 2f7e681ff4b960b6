//! Error taxonomy for indexing and querying.
//!
//! Client errors ([`RagError::NotFound`], [`RagError::Validation`]) are
//! surfaced immediately and never retried. [`RagError::IndexBuild`] wraps any
//! failure while loading, chunking, embedding or persisting an index; the
//! index directory it leaves behind has no manifest and is rebuilt on the
//! next freshness check.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The requested document or category is not a currently supported entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed caller parameters (batch windows, top-k, empty keys).
    #[error("invalid parameters: {0}")]
    Validation(String),

    /// Loading, chunking, embedding or persisting an index failed.
    #[error("failed to build index for {key}: {source:#}")]
    IndexBuild {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Answer synthesis or retrieval against a built index failed.
    #[error("query failed: {0:#}")]
    Query(anyhow::Error),

    /// The documents root could not be listed.
    #[error("failed to list documents: {0:#}")]
    Catalog(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn not_found(message: impl Into<String>) -> Self {
        RagError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        RagError::Validation(message.into())
    }

    pub fn index_build(key: impl Into<String>, source: anyhow::Error) -> Self {
        RagError::IndexBuild {
            key: key.into(),
            source,
        }
    }

    /// Whether the caller, rather than the system, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RagError::NotFound(_) | RagError::Validation(_))
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
