//! Index lifecycle: decide reuse vs rebuild, and build.
//!
//! Every document gets its own directory under the index root, named by its
//! collision-resolved identifier. A category index aggregates every document
//! under one first-level folder into `_categories/<identifier>`.
//!
//! The flow for both variants:
//!
//! ```text
//! validate key ─▶ resolve identifier ─▶ lock(identifier)
//!        │
//!        ├─ force ─────────────────────────────┐
//!        │                                     ▼
//!        └─ dir non-empty ─▶ manifest matches? ─no─▶ delete ─▶ load ─▶ chunk ─▶ embed ─▶ persist ─▶ manifest
//!                                  │
//!                                 yes ─▶ open persisted store
//! ```
//!
//! The manifest is written only after the store files are complete, so an
//! interrupted build is detected and redone on the next call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::catalog::{self, Category, DocumentKind};
use crate::chunk::{chunk_sections, TextSplitter};
use crate::config::Config;
use crate::embedding::{embed_in_batches, Embedder};
use crate::error::{RagError, Result};
use crate::loader::DocumentLoader;
use crate::locks::LockTable;
use crate::manifest::{self, Manifest, ManifestStatus};
use crate::models::Chunk;
use crate::sanitize;
use crate::store::{FlatStore, IndexMeta};

/// Subdirectory of the index root holding category indexes. The leading
/// underscore keeps it out of the file identifier namespace.
pub const CATEGORY_DIR: &str = "_categories";

/// Whether an index covers one file or a whole category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    File,
    Category,
}

/// A ready-to-query index.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    pub scope: IndexScope,
    /// Normalized document or category key.
    pub key: String,
    pub identifier: String,
    pub collection: String,
    pub dir: PathBuf,
    pub store: Arc<FlatStore>,
    pub meta: IndexMeta,
    /// `true` when this call built the index, `false` when it was reused.
    pub rebuilt: bool,
}

struct Target {
    scope: IndexScope,
    key: String,
    identifier: String,
    collection: String,
    dir: PathBuf,
    sources: Vec<String>,
}

/// Owns the index root and serializes builds per identifier.
pub struct IndexManager {
    docs_dir: PathBuf,
    follow_symlinks: bool,
    index_dir: PathBuf,
    collection_prefix: String,
    batch_size: usize,
    splitter: TextSplitter,
    embedder: Arc<dyn Embedder>,
    loader: Arc<dyn DocumentLoader>,
    locks: LockTable,
}

impl IndexManager {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Self {
        Self {
            docs_dir: config.paths.docs_dir.clone(),
            follow_symlinks: config.paths.follow_symlinks,
            index_dir: config.paths.index_dir.clone(),
            collection_prefix: config.paths.collection_prefix.clone(),
            batch_size: config.embedding.effective_batch_size(),
            splitter: TextSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap),
            embedder,
            loader,
            locks: LockTable::new(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Sorted, supported documents currently under the documents root.
    pub fn list_files(&self) -> Result<Vec<String>> {
        catalog::supported_files(&self.docs_dir, self.follow_symlinks).map_err(RagError::Catalog)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(catalog::categories(&self.list_files()?))
    }

    /// Ensure the index for one document is current and return it.
    pub async fn ensure_file_index(&self, key: &str, force: bool) -> Result<IndexHandle> {
        let key = catalog::normalize_file_key(key);
        if key.is_empty() {
            return Err(RagError::validation("document key must not be empty"));
        }

        let files = self.list_files()?;
        if !catalog::is_supported(&key) || files.binary_search(&key).is_err() {
            return Err(RagError::not_found(key));
        }

        let identifier = sanitize::identifier_for(&key, &files);
        let target = Target {
            scope: IndexScope::File,
            collection: format!("{}_{}", self.collection_prefix, identifier),
            dir: self.index_dir.join(&identifier),
            sources: vec![key.clone()],
            key,
            identifier,
        };
        self.ensure(target, force).await
    }

    /// Ensure the shared index for every document in `category`.
    pub async fn ensure_category_index(&self, category: &str, force: bool) -> Result<IndexHandle> {
        let key = catalog::normalize_category_key(category);
        if key.is_empty() {
            return Err(RagError::validation("category key must not be empty"));
        }

        let files = self.list_files()?;
        let sources = catalog::files_in_category(&files, &key);
        if sources.is_empty() {
            return Err(RagError::not_found(format!("category {}", key)));
        }

        let keys: Vec<String> = catalog::categories(&files)
            .into_iter()
            .map(|c| c.key)
            .collect();
        let identifier = sanitize::category_identifier_for(&key, &keys);
        let target = Target {
            scope: IndexScope::Category,
            collection: format!("{}_cat_{}", self.collection_prefix, identifier),
            dir: self.index_dir.join(CATEGORY_DIR).join(&identifier),
            sources,
            key,
            identifier,
        };
        self.ensure(target, force).await
    }

    async fn ensure(&self, target: Target, force: bool) -> Result<IndexHandle> {
        let lock_key = target.dir.to_string_lossy().into_owned();
        let _guard = self.locks.acquire(&lock_key).await;

        let current = manifest::snapshot(&self.docs_dir, &target.sources)?;

        if force {
            tracing::info!(key = %target.key, id = %target.identifier, "forced rebuild");
            remove_index_dir(&target.dir);
        } else if dir_has_entries(&target.dir) {
            let status = manifest::read_manifest(&target.dir);
            match &status {
                ManifestStatus::Missing => {
                    tracing::warn!(key = %target.key, "index has no manifest, rebuilding")
                }
                ManifestStatus::Corrupt(reason) => {
                    tracing::warn!(key = %target.key, %reason, "manifest unreadable, rebuilding")
                }
                ManifestStatus::Valid(_) => {}
            }

            if status.matches(&current) {
                match FlatStore::open(&target.dir) {
                    Ok((_, meta)) if meta.model != self.embedder.model_name() => {
                        tracing::info!(
                            key = %target.key,
                            built_with = %meta.model,
                            current = %self.embedder.model_name(),
                            "embedding model changed, rebuilding"
                        );
                    }
                    Ok((store, meta)) => {
                        tracing::info!(key = %target.key, chunks = meta.chunk_count, "index up to date");
                        return Ok(handle(target, store, meta, false));
                    }
                    Err(e) => {
                        let error = format!("{:#}", e);
                        tracing::warn!(key = %target.key, %error, "index files unreadable, rebuilding");
                    }
                }
            } else if matches!(status, ManifestStatus::Valid(_)) {
                tracing::info!(key = %target.key, "source files changed, rebuilding");
            }
            remove_index_dir(&target.dir);
        }

        match self.build(&target, &current).await {
            Ok((store, meta)) => {
                tracing::info!(
                    key = %target.key,
                    id = %target.identifier,
                    chunks = meta.chunk_count,
                    "index built"
                );
                Ok(handle(target, store, meta, true))
            }
            Err(e) => Err(RagError::index_build(target.key, e)),
        }
    }

    async fn build(
        &self,
        target: &Target,
        current: &Manifest,
    ) -> anyhow::Result<(FlatStore, IndexMeta)> {
        let mut chunks: Vec<Chunk> = Vec::new();
        for name in &target.sources {
            let doc_chunks = self.load_and_chunk(name).await?;
            if doc_chunks.is_empty() {
                tracing::warn!(file = %name, "no text extracted");
                continue;
            }
            let offset = chunks.len() as i64;
            chunks.extend(doc_chunks.into_iter().map(|mut c| {
                if target.scope == IndexScope::Category {
                    c.chunk_index += offset;
                }
                c
            }));
        }
        if chunks.is_empty() {
            bail!("no text could be extracted from {}", target.key);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size).await?;
        let store = FlatStore::from_parts(chunks, vectors)?;

        let meta = store.persist(&target.dir, &target.collection, self.embedder.model_name())?;
        manifest::write_manifest(&target.dir, current)?;
        Ok((store, meta))
    }

    async fn load_and_chunk(&self, name: &str) -> anyhow::Result<Vec<Chunk>> {
        let kind = DocumentKind::from_name(name)
            .ok_or_else(|| anyhow::anyhow!("unsupported file format: {}", name))?;
        let path = self.docs_dir.join(name);
        let loader = Arc::clone(&self.loader);
        let sections = tokio::task::spawn_blocking(move || loader.load(&path, kind))
            .await?
            .with_context(|| format!("Failed to load {}", name))?;

        let chunks = chunk_sections(name, &sections, &self.splitter);
        tracing::debug!(file = %name, sections = sections.len(), chunks = chunks.len(), "chunked");
        Ok(chunks)
    }
}

fn handle(target: Target, store: FlatStore, meta: IndexMeta, rebuilt: bool) -> IndexHandle {
    IndexHandle {
        scope: target.scope,
        key: target.key,
        identifier: target.identifier,
        collection: target.collection,
        dir: target.dir,
        store: Arc::new(store),
        meta,
        rebuilt,
    }
}

fn dir_has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Delete an index directory; a directory that is already gone is fine.
fn remove_index_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove index directory");
        }
    }
}
