//! Model provider abstraction and implementations.
//!
//! Defines the [`ModelProvider`] trait used by the pipeline for
//! summarization, embedding, and image description, with two backends:
//! - **[`LocalProvider`]**: a local Ollama instance (`/api/generate`,
//!   `/api/embeddings`).
//! - **[`OnlineProvider`]**: an OpenAI-compatible API
//!   (`/v1/chat/completions`, `/v1/embeddings`); needs an API key from the
//!   environment.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to build the configured backend once at startup.
//! The rest of the system only sees `Arc<dyn ModelProvider>`.
//!
//! # Failure Classification
//!
//! Requests are not retried. Failures map onto [`ProviderError`]:
//! - client timeout → `Timeout`
//! - HTTP 401/403 → `Credential`
//! - HTTP 429, 5xx, connection errors → `Unavailable`
//! - any other 4xx → `Rejected`
//! - unparseable body → `InvalidResponse`

mod local;
mod online;
pub mod prompts;

pub use local::LocalProvider;
pub use online::OnlineProvider;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::ModelConfig;
use crate::error::ProviderError;

/// Summarization, embedding, and vision backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Backend identifier for logs (e.g. `"local"`).
    fn name(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Summarize one piece of text.
    async fn summarize(&self, text: &str) -> Result<String, ProviderError>;

    /// Merge ordered chunk summaries into one document summary.
    async fn summarize_final(&self, summaries: &[String]) -> Result<String, ProviderError>;

    /// Embed text into a `dims()`-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Describe an image in prose.
    async fn describe_image(&self, image: &[u8]) -> Result<String, ProviderError>;
}

/// Build the provider named by `config.provider`.
pub fn create_provider(config: &ModelConfig) -> Result<Arc<dyn ModelProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        "online" => Ok(Arc::new(OnlineProvider::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

/// Send a JSON request and classify the result.
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    op: &'static str,
    timeout_secs: u64,
) -> Result<serde_json::Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(e, op, timeout_secs))?;

    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    op,
                    secs: timeout_secs,
                }
            } else {
                ProviderError::InvalidResponse(format!("{}: {}", op, e))
            }
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, op, &body))
}

fn classify_transport(err: reqwest::Error, op: &'static str, timeout_secs: u64) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            op,
            secs: timeout_secs,
        }
    } else {
        ProviderError::Unavailable(format!("{}: {}", op, err))
    }
}

fn classify_status(status: reqwest::StatusCode, op: &str, body: &str) -> ProviderError {
    let msg = format!("{} returned {}: {}", op, status, body);
    match status.as_u16() {
        401 | 403 => ProviderError::Credential(msg),
        429 => ProviderError::Unavailable(msg),
        s if s >= 500 => ProviderError::Unavailable(msg),
        _ => ProviderError::Rejected(msg),
    }
}

/// Read a JSON number array into a vector.
pub(crate) fn parse_vector(value: Option<&serde_json::Value>) -> Result<Vec<f32>, ProviderError> {
    let values = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing embedding array".to_string()))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::InvalidResponse("non-numeric embedding".to_string()))
        })
        .collect()
}

/// Guess the MIME type of an image from its magic bytes.
pub(crate) fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => "image/tiff",
        _ => "application/octet-stream",
    }
}
