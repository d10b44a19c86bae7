//! Qdrant REST client.
//!
//! Points are keyed by `file_id` (a UUID, as Qdrant requires) and carry the
//! [`EntryMetadata`] as payload plus the `file_id` itself. Writes use
//! `wait=true` so an upsert or delete is durable once it returns.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::VectorStore;
use crate::config::VectorStoreConfig;
use crate::error::StoreError;
use crate::models::{EntryMetadata, ScoredEntry};

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dims: usize,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchPoint>,
}

#[derive(Deserialize)]
struct SearchPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig, dims: usize) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var).with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key,
            dims,
            timeout_secs: config.timeout_secs,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        op: &'static str,
    ) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout {
                    op,
                    secs: self.timeout_secs,
                }
            } else {
                StoreError::Request(format!("{}: {}", op, e))
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Backend(format!(
            "{} returned {}: {}",
            op, status, body
        )))
    }
}

fn point_to_entry(point: SearchPoint) -> Result<ScoredEntry, StoreError> {
    let payload = point
        .payload
        .ok_or_else(|| StoreError::Backend("search hit without payload".to_string()))?;
    let file_id = payload
        .get("file_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| point.id.as_str().map(str::to_string))
        .unwrap_or_else(|| point.id.to_string());
    let metadata: EntryMetadata = serde_json::from_value(payload)
        .map_err(|e| StoreError::Backend(format!("invalid payload: {}", e)))?;
    Ok(ScoredEntry {
        file_id,
        metadata,
        score: point.score,
    })
}

/// Body for a payload merge that rewrites only the path fields.
fn set_path_body(id: &str, path: &str, updated_at: i64) -> serde_json::Value {
    serde_json::json!({
        "payload": {"path": path, "updated_at": updated_at},
        "points": [id],
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn init(&self) -> Result<(), StoreError> {
        let url = self.collection_url();
        let response = self
            .request(reqwest::Method::GET, url.clone())
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("get collection: {}", e)))?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "get collection returned {}: {}",
                status, body
            )));
        }

        tracing::info!(collection = %self.collection, dims = self.dims, "creating qdrant collection");
        let body = serde_json::json!({
            "vectors": {"size": self.dims, "distance": "Cosine"},
        });
        self.send(
            self.request(reqwest::Method::PUT, url).json(&body),
            "create collection",
        )
        .await?;
        Ok(())
    }

    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), StoreError> {
        if vector.len() != self.dims {
            return Err(StoreError::Dimension {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        let mut payload = serde_json::to_value(metadata)
            .map_err(|e| StoreError::Backend(format!("encode payload: {}", e)))?;
        payload["file_id"] = serde_json::json!(id);
        let body = serde_json::json!({
            "points": [{"id": id, "vector": vector, "payload": payload}],
        });
        let url = format!("{}/points?wait=true", self.collection_url());
        self.send(self.request(reqwest::Method::PUT, url).json(&body), "upsert")
            .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredEntry>, StoreError> {
        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        let url = format!("{}/points/search", self.collection_url());
        let response = self
            .send(self.request(reqwest::Method::POST, url).json(&body), "query")
            .await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("invalid search response: {}", e)))?;
        parsed.result.into_iter().map(point_to_entry).collect()
    }

    async fn update_path(&self, id: &str, path: &str, updated_at: i64) -> Result<(), StoreError> {
        let url = format!("{}/points/payload?wait=true", self.collection_url());
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&set_path_body(id, path, updated_at))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Timeout {
                        op: "update_path",
                        secs: self.timeout_secs,
                    }
                } else {
                    StoreError::Request(format!("update_path: {}", e))
                }
            })?;
        let status = response.status();
        // Files tracked without an entry (empty content) have no point.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Backend(format!(
            "update_path returned {}: {}",
            status, body
        )))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let body = serde_json::json!({ "points": [id] });
        let url = format!("{}/points/delete?wait=true", self.collection_url());
        self.send(self.request(reqwest::Method::POST, url).json(&body), "delete")
            .await?;
        Ok(())
    }
}
