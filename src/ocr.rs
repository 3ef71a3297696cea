//! Text extraction providers.
//!
//! `local` reads the PDF text layer in process and needs no network. `remote`
//! posts the raw bytes to an OCR HTTP service and is the right choice for
//! scanned documents. Both return one string per page.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OcrConfig;
use crate::traits::TextExtractor;

pub fn create_extractor(config: &OcrConfig) -> Result<Arc<dyn TextExtractor>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalPdfExtractor)),
        "remote" => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| anyhow!("ocr.url required when provider is 'remote'"))?;
            Ok(Arc::new(RemoteOcrExtractor::new(
                url,
                config.timeout_secs,
                config.max_retries,
            )?))
        }
        other => bail!("unknown ocr provider: '{}'", other),
    }
}

/// Extracts the embedded text layer. Pages in a PDF text dump are separated
/// by form feeds.
pub struct LocalPdfExtractor;

#[async_trait]
impl TextExtractor for LocalPdfExtractor {
    async fn extract_text(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let owned = bytes.to_vec();
        // pdf parsing is CPU bound; keep it off the runtime workers.
        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&owned)
                .map_err(|e| anyhow!("failed to extract pdf text layer: {}", e))
        })
        .await??;

        let pages: Vec<String> = text
            .split('\u{c}')
            .map(|page| page.trim().to_string())
            .collect();
        Ok(pages)
    }
}

/// Client for an OCR HTTP service that accepts raw PDF bytes and responds
/// with `{"pages": ["...", ...]}`.
pub struct RemoteOcrExtractor {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<String>,
}

impl RemoteOcrExtractor {
    pub fn new(url: String, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            max_retries,
        })
    }
}

#[async_trait]
impl TextExtractor for RemoteOcrExtractor {
    async fn extract_text(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let mut attempt = 0u32;
        let mut backoff_ms = 500u64;

        loop {
            attempt += 1;
            let result = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/pdf")
                .body(bytes.to_vec())
                .send()
                .await;

            let retriable = match result {
                Ok(response) if response.status().is_success() => {
                    let body: OcrResponse = response
                        .json()
                        .await
                        .context("invalid ocr service response")?;
                    return Ok(body.pages);
                }
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        format!("ocr service returned {}", status)
                    } else {
                        // Client errors other than rate limiting will not
                        // heal on retry.
                        let body = response.text().await.unwrap_or_default();
                        bail!("ocr service returned {}: {}", status, body);
                    }
                }
                Err(e) => format!("ocr request failed: {}", e),
            };

            if attempt > self.max_retries {
                bail!("{} (after {} attempts)", retriable, attempt);
            }
            tracing::warn!(attempt, error = %retriable, "retrying ocr request");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(10_000);
        }
    }
}
