//! # rag-files
//!
//! Per-document retrieval-augmented question answering.
//!
//! Every supported file under the documents root (`.txt`, `.pdf`, `.md`)
//! gets its own vector index on disk, keyed by a collision-safe identifier
//! derived from its name. A freshness manifest next to each index decides
//! whether it can be reused or must be rebuilt. Questions are answered by
//! retrieving the nearest chunks of one document (or one category of
//! documents) and handing them to a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │ catalog  │──▶│  indexer    │──▶│ loader → chunk → │──▶│  store    │
//! │ sanitize │   │  manifest   │   │ embedding        │   │ (per dir) │
//! └──────────┘   └──────┬──────┘   └──────────────────┘   └─────┬─────┘
//!                       │                                       │
//!                ┌──────┴──────┐                          ┌─────┴─────┐
//!                │   batch     │                          │  query    │
//!                │ (preindex)  │                          │  + llm    │
//!                └─────────────┘                          └───────────┘
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <index_dir>/
//!   <identifier>/                 one per document
//!     chunks.json vectors.bin index.json manifest.json
//!   _categories/<identifier>/     one per category
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML and environment configuration |
//! | [`error`] | Error taxonomy |
//! | [`sanitize`] | Filename → storage identifier, collision suffixes |
//! | [`manifest`] | File-identity snapshots and the `manifest.json` side-car |
//! | [`catalog`] | Supported-file listing, artifact filtering, categories |
//! | [`loader`] | Text extraction per format |
//! | [`chunk`] | Separator-preference text chunking |
//! | [`embedding`] | Embedding providers and batching |
//! | [`store`] | Persisted flat vector store |
//! | [`locks`] | Per-identifier build locks |
//! | [`indexer`] | Reuse-or-rebuild lifecycle for file and category indexes |
//! | [`batch`] | Offset/limit and batch sharding for pre-indexing |
//! | [`llm`] | Answer-synthesis providers |
//! | [`query`] | Retrieval, sources, snippets, widened fallback |
//! | [`chat`] | Interactive per-document loop |

pub mod batch;
pub mod catalog;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
mod http;
pub mod indexer;
pub mod llm;
pub mod loader;
pub mod locks;
pub mod manifest;
pub mod models;
pub mod query;
pub mod sanitize;
pub mod store;
