//! Embedding and summarization provider.
//!
//! The `openai` provider talks to any OpenAI-compatible REST endpoint for
//! dense embeddings and chat-completion summaries. Sparse vectors are always
//! computed locally by [`crate::sparse`]; no provider round trip is needed
//! for the lexical side.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, SummaryConfig};
use crate::models::SparseVector;
use crate::sparse;
use crate::traits::{Embedder, EmbeddingTask};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub fn create_embedder(
    embedding: &EmbeddingConfig,
    summary: &SummaryConfig,
) -> Result<Arc<dyn Embedder>> {
    match embedding.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(embedding, summary)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => bail!("unknown embedding provider: '{}'", other),
    }
}

/// Placeholder used when no provider is configured. Sparse encoding still
/// works (it is local); anything needing the remote model fails with a clear
/// message. Commands that index or search check [`EmbeddingConfig::is_enabled`]
/// up front, so this surfaces only on misuse.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed_dense(&self, _texts: &[String], _task: EmbeddingTask) -> Result<Vec<Vec<f32>>> {
        bail!("embedding provider is disabled; set embedding.provider = \"openai\"")
    }

    fn embed_sparse(&self, text: &str) -> SparseVector {
        sparse::encode(text)
    }

    async fn summarize(&self, _text: &str) -> Result<String> {
        bail!("embedding provider is disabled; set embedding.provider = \"openai\"")
    }

    fn dims(&self) -> usize {
        0
    }
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    api_key: Option<String>,
    summary: SummaryConfig,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiEmbedder {
    pub fn new(embedding: &EmbeddingConfig, summary: &SummaryConfig) -> Result<Self> {
        let model = embedding
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model is required"))?;
        let dims = embedding
            .dims
            .ok_or_else(|| anyhow!("embedding.dims is required"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(embedding.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: embedding
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model,
            dims,
            batch_size: embedding.batch_size.max(1),
            max_retries: embedding.max_retries,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            summary: summary.clone(),
        })
    }

    async fn post_with_retry(&self, url: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        let mut backoff_ms = 500u64;

        loop {
            attempt += 1;
            let mut request = self.client.post(url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let retriable = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        format!("provider returned {}", status)
                    } else {
                        let text = response.text().await.unwrap_or_default();
                        bail!("provider returned {}: {}", status, text);
                    }
                }
                Err(e) => format!("request failed: {}", e),
            };

            if attempt > self.max_retries {
                bail!("{} (after {} attempts)", retriable, attempt);
            }
            tracing::warn!(attempt, error = %retriable, "retrying embedding request");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(10_000);
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let response = self.post_with_retry(&url, body).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("invalid embedding response")?;

        if parsed.data.len() != texts.len() {
            bail!(
                "embedding provider returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            );
        }

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            if item.embedding.len() != self.dims {
                bail!(
                    "embedding provider returned {} dims, expected {}",
                    item.embedding.len(),
                    self.dims
                );
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_dense(&self, texts: &[String], _task: EmbeddingTask) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn embed_sparse(&self, text: &str) -> SparseVector {
        sparse::encode(text)
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        if self.summary.skip {
            return Ok("-".to_string());
        }

        let base = self
            .summary
            .url
            .clone()
            .unwrap_or_else(|| self.base_url.clone());
        let model = self
            .summary
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));

        let excerpt: String = text.chars().take(self.summary.max_input_chars).collect();
        let body = json!({
            "model": model,
            "messages": [
                {
                    "role": "system",
                    "content": "Summarize the following document in two or three sentences. \
                                Respond with the summary only."
                },
                { "role": "user", "content": excerpt }
            ],
        });

        let response = self.post_with_retry(&url, body).await?;
        let parsed: ChatResponse = response.json().await.context("invalid summary response")?;
        let summary = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if summary.is_empty() {
            bail!("summarizer returned an empty completion");
        }
        Ok(summary)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}
