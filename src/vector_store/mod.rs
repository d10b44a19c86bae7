//! Vector store abstraction.
//!
//! The pipeline writes exactly one [`IndexEntry`](crate::models::IndexEntry)
//! per indexed active file, keyed by `file_id`. The query service reads
//! ranked matches back.
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | `init` | Ensure the backing collection exists |
//! | `upsert` | Replace the entry for an id atomically |
//! | `query` | Top-`limit` entries by descending cosine similarity |
//! | `update_path` | Rewrite only the stored path; missing ids are not an error |
//! | `delete` | Remove the entry for an id; missing ids are not an error |
//!
//! Backends: [`QdrantStore`] (REST) and [`InMemoryStore`] (brute force,
//! for tests and single-process use).

mod memory;
mod qdrant;

pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::VectorStoreConfig;
use crate::error::StoreError;
use crate::models::{EntryMetadata, ScoredEntry};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend identifier for logs.
    fn name(&self) -> &str;

    async fn init(&self) -> Result<(), StoreError>;

    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), StoreError>;

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredEntry>, StoreError>;

    /// Point an existing entry at a new path without re-embedding it.
    async fn update_path(&self, id: &str, path: &str, updated_at: i64) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Build the backend named by `config.backend` for `dims`-length vectors.
pub fn create_store(config: &VectorStoreConfig, dims: usize) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Arc::new(QdrantStore::new(config, dims)?)),
        "memory" => Ok(Arc::new(InMemoryStore::new(dims))),
        other => bail!("Unknown vector store backend: {}", other),
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
