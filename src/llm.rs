//! Answer synthesis.
//!
//! A [`LanguageModel`] receives the question plus the retrieved chunks and
//! returns answer text. Context is "stuffed" into a single user message;
//! see [`build_messages`].

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::http;
use crate::models::ScoredChunk;

const SYSTEM_PROMPT: &str = "Use the following pieces of context to answer the question. \
If you don't know the answer, say that you don't know; don't try to make up an answer.";

/// Attempts after the first for chat requests.
const RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<String>;
}

/// System and user messages for one question.
pub fn build_messages(question: &str, context: &[ScoredChunk]) -> Vec<Message> {
    let user = format!(
        "Context:\n{}\n\nQuestion: {}",
        format_context(context),
        question
    );
    vec![
        Message::new("system", SYSTEM_PROMPT.to_string()),
        Message::new("user", user),
    ]
}

fn format_context(context: &[ScoredChunk]) -> String {
    if context.is_empty() {
        return "(no context found)".to_string();
    }
    context
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let location = match hit.chunk.page {
                Some(page) => format!("{} (page {})", hit.chunk.source, page),
                None => hit.chunk.source.clone(),
            };
            format!("[{}] {}\n{}", i + 1, location, hit.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============ Disabled Provider ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _question: &str, _context: &[ScoredChunk]) -> Result<String> {
        bail!("Language model provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Chat completions via `POST https://api.openai.com/v1/chat/completions`.
pub struct OpenAIChat {
    model: String,
    max_tokens: u32,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            api_key,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": build_messages(question, context),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let json = http::post_json_with_retry(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&self.api_key),
            &body,
            RETRIES,
            "OpenAI",
        )
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama Provider ============

/// Chat via a local Ollama instance (`POST /api/chat`, non-streaming).
pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": build_messages(question, context),
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let json = http::post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            RETRIES,
            "Ollama",
        )
        .await?;

        Ok(json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

/// Create the [`LanguageModel`] named by `config.provider`.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
