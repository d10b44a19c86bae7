use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;

use super::{parse_vector, prompts, send_json, ModelProvider};
use crate::config::ModelConfig;
use crate::error::ProviderError;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Provider backed by a local Ollama instance.
///
/// Requires the summary and embedding models to be pulled
/// (e.g. `ollama pull nomic-embed-text`). Image description uses
/// `vision_model` when set, otherwise the summary model.
pub struct LocalProvider {
    client: reqwest::Client,
    base_url: String,
    summary_model: String,
    embedding_model: String,
    vision_model: String,
    dims: usize,
    timeout_secs: u64,
}

impl LocalProvider {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
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

    async fn generate(
        &self,
        op: &'static str,
        model: &str,
        prompt: String,
        images: Option<Vec<String>>,
    ) -> Result<String, ProviderError> {
        let mut body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(images) = images {
            body["images"] = serde_json::json!(images);
        }

        let request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body);
        let json = send_json(request, op, self.timeout_secs).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{}: missing response", op)))
    }
}

#[async_trait]
impl ModelProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        self.generate(
            "summarize",
            &self.summary_model,
            prompts::summary_prompt(text),
            None,
        )
        .await
    }

    async fn summarize_final(&self, summaries: &[String]) -> Result<String, ProviderError> {
        self.generate(
            "summarize_final",
            &self.summary_model,
            prompts::final_summary_prompt(summaries),
            None,
        )
        .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "prompt": text,
        });
        let request = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body);
        let json = send_json(request, "embed", self.timeout_secs).await?;
        parse_vector(json.get("embedding"))
    }

    async fn describe_image(&self, image: &[u8]) -> Result<String, ProviderError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        self.generate(
            "describe_image",
            &self.vision_model,
            prompts::IMAGE_PROMPT.to_string(),
            Some(vec![encoded]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_and_trims() {
        let provider = LocalProvider::new(&ModelConfig::default()).unwrap();
        assert_eq!(provider.base_url, DEFAULT_OLLAMA_URL);
        assert_eq!(provider.vision_model, provider.summary_model);

        let config = ModelConfig {
            base_url: Some("http://gpu-box:11434/".to_string()),
            vision_model: Some("llava".to_string()),
            ..ModelConfig::default()
        };
        let provider = LocalProvider::new(&config).unwrap();
        assert_eq!(provider.base_url, "http://gpu-box:11434");
        assert_eq!(provider.vision_model, "llava");
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let config = ModelConfig {
            base_url: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 5,
            ..ModelConfig::default()
        };
        let provider = LocalProvider::new(&config).unwrap();
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Unavailable(_) | ProviderError::Timeout { .. }
        ));
    }
}
