//! Question answering against a built index.
//!
//! Retrieval embeds the question, takes the `top_k` nearest chunks and hands
//! them to the language model. Sources are the distinct chunk sources in
//! retrieval order. Optional snippets give one whitespace-normalized excerpt
//! per source, clipped to [`SNIPPET_MAX_CHARS`].
//!
//! With `widen_on_empty`, an empty answer or empty source list triggers one
//! more attempt at `max(fallback_k, top_k)`. The wider result is used only
//! when it has both an answer and sources.

use serde::Serialize;

use crate::config::{RetrievalConfig, MAX_TOP_K, MIN_TOP_K};
use crate::embedding::{embed_query, Embedder};
use crate::error::{RagError, Result};
use crate::llm::LanguageModel;
use crate::models::ScoredChunk;
use crate::store::VectorStore;

pub const SNIPPET_MAX_CHARS: usize = 700;
/// Snippets consider at least this many retrieved chunks.
pub const MIN_SNIPPET_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub top_k: usize,
    pub include_snippets: bool,
    pub widen_on_empty: bool,
    pub fallback_k: usize,
}

impl QueryOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            include_snippets: false,
            widen_on_empty: config.widen_on_empty,
            fallback_k: config.fallback_k,
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnippet {
    pub source: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    /// `None` unless requested and at least one snippet was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippets: Option<Vec<SourceSnippet>>,
    /// Whether the widened retrieval produced this answer.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub widened: bool,
}

/// Answer `question` from `store`.
pub async fn answer(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    llm: &dyn LanguageModel,
    question: &str,
    options: &QueryOptions,
) -> Result<QueryAnswer> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::validation("question must not be empty"));
    }
    if !(MIN_TOP_K..=MAX_TOP_K).contains(&options.top_k) {
        return Err(RagError::validation(format!(
            "top_k must be in [{}, {}], got {}",
            MIN_TOP_K, MAX_TOP_K, options.top_k
        )));
    }

    let query_vec = embed_query(embedder, question)
        .await
        .map_err(RagError::Query)?;

    let first = retrieve_and_generate(store, llm, question, &query_vec, options.top_k, options).await?;
    if !options.widen_on_empty || is_complete(&first) {
        return Ok(first);
    }

    let wider_k = options.fallback_k.max(options.top_k);
    tracing::info!(top_k = options.top_k, wider_k, "empty answer or sources, widening retrieval");
    let wider = retrieve_and_generate(store, llm, question, &query_vec, wider_k, options).await?;
    if is_complete(&wider) {
        Ok(QueryAnswer {
            widened: true,
            ..wider
        })
    } else {
        Ok(first)
    }
}

fn is_complete(answer: &QueryAnswer) -> bool {
    !answer.answer.trim().is_empty() && !answer.sources.is_empty()
}

async fn retrieve_and_generate(
    store: &dyn VectorStore,
    llm: &dyn LanguageModel,
    question: &str,
    query_vec: &[f32],
    k: usize,
    options: &QueryOptions,
) -> Result<QueryAnswer> {
    let hits = store.similarity_search(query_vec, k);
    tracing::debug!(k, hits = hits.len(), "retrieved");

    let text = llm
        .generate(question, &hits)
        .await
        .map_err(RagError::Query)?;

    let snippets = if options.include_snippets {
        Some(snippets(&hits, options.top_k)).filter(|s| !s.is_empty())
    } else {
        None
    };

    Ok(QueryAnswer {
        answer: text,
        sources: distinct_sources(&hits),
        snippets,
        widened: false,
    })
}

/// Distinct non-empty sources in first-seen order.
pub fn distinct_sources(hits: &[ScoredChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for hit in hits {
        let source = &hit.chunk.source;
        if !source.is_empty() && !sources.contains(source) {
            sources.push(source.clone());
        }
    }
    sources
}

/// One snippet per source from the first `max(5, top_k)` hits.
pub fn snippets(hits: &[ScoredChunk], top_k: usize) -> Vec<SourceSnippet> {
    let limit = MIN_SNIPPET_CANDIDATES.max(top_k);
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::new();

    for hit in hits.iter().take(limit) {
        let source = hit.chunk.source.as_str();
        let content = hit.chunk.text.trim();
        if source.is_empty() || content.is_empty() || seen.contains(&source) {
            continue;
        }
        out.push(SourceSnippet {
            source: source.to_string(),
            snippet: clip(&normalize_whitespace(content), SNIPPET_MAX_CHARS),
        });
        seen.push(source);
    }
    out
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut to `max` chars, trimming trailing whitespace and appending `…`.
fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
    }
}
