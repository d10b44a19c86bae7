use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;

use super::{parse_vector, prompts, send_json, sniff_image_mime, ModelProvider};
use crate::config::ModelConfig;
use crate::error::ProviderError;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Provider for OpenAI-compatible APIs.
///
/// The API key is read once at construction from the environment variable
/// named by `model.api_key_env`.
pub struct OnlineProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    summary_model: String,
    embedding_model: String,
    vision_model: String,
    dims: usize,
    timeout_secs: u64,
}

impl OnlineProvider {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            summary_model: config.summary_model.clone(),
            embedding_model: config.embedding_model.clone(),
            vision_model: config
                .vision_model
                .clone()
                .unwrap_or_else(|| config.summary_model.clone()),
            dims: config.dims,
            timeout_secs: config.timeout_secs,
        })
    }

    fn post(&self, endpoint: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
    }

    async fn chat(
        &self,
        op: &'static str,
        model: &str,
        content: serde_json::Value,
    ) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": content}],
        });
        let json = send_json(self.post("/v1/chat/completions", &body), op, self.timeout_secs).await?;
        parse_chat_response(&json, op)
    }
}

fn parse_chat_response(json: &serde_json::Value, op: &str) -> Result<String, ProviderError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ProviderError::InvalidResponse(format!("{}: missing choices[0].message", op)))
}

#[async_trait]
impl ModelProvider for OnlineProvider {
    fn name(&self) -> &str {
        "online"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        self.chat(
            "summarize",
            &self.summary_model,
            serde_json::json!(prompts::summary_prompt(text)),
        )
        .await
    }

    async fn summarize_final(&self, summaries: &[String]) -> Result<String, ProviderError> {
        self.chat(
            "summarize_final",
            &self.summary_model,
            serde_json::json!(prompts::final_summary_prompt(summaries)),
        )
        .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        });
        let json = send_json(self.post("/v1/embeddings", &body), "embed", self.timeout_secs).await?;
        let first = json
            .get("data")
            .and_then(|d| d.get(0))
            .ok_or_else(|| ProviderError::InvalidResponse("embed: missing data array".to_string()))?;
        parse_vector(first.get("embedding"))
    }

    async fn describe_image(&self, image: &[u8]) -> Result<String, ProviderError> {
        let data_url = format!(
            "data:{};base64,{}",
            sniff_image_mime(image),
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        let content = serde_json::json!([
            {"type": "text", "text": prompts::IMAGE_PROMPT},
            {"type": "image_url", "image_url": {"url": data_url}},
        ]);
        self.chat("describe_image", &self.vision_model, content).await
    }
}
