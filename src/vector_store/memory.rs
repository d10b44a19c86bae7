//! In-memory [`VectorStore`] for tests and single-process use.
//!
//! Entries live in a `HashMap` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{cosine_similarity, VectorStore};
use crate::error::StoreError;
use crate::models::{EntryMetadata, IndexEntry, ScoredEntry};

pub struct InMemoryStore {
    dims: usize,
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the entry stored for `id`.
    pub fn get(&self, id: &str) -> Option<IndexEntry> {
        self.entries.read().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn init(&self) -> Result<(), StoreError> {
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
        let entry = IndexEntry {
            file_id: id.to_string(),
            vector: vector.to_vec(),
            metadata: metadata.clone(),
        };
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(id.to_string(), entry);
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredEntry>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut scored: Vec<ScoredEntry> = entries
            .values()
            .map(|e| ScoredEntry {
                file_id: e.file_id.clone(),
                metadata: e.metadata.clone(),
                score: cosine_similarity(vector, &e.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn update_path(&self, id: &str, path: &str, updated_at: i64) -> Result<(), StoreError> {
        if let Some(entry) = self.entries.write().map_err(poisoned)?.get_mut(id) {
            entry.metadata.path = path.to_string();
            entry.metadata.updated_at = updated_at;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries.write().map_err(poisoned)?.remove(id);
        Ok(())
    }
}
