//! Semantic search over indexed files.
//!
//! The query text is embedded with the same provider the pipeline uses,
//! the vector store returns the nearest entries, and hits below the
//! similarity threshold are dropped. Each surviving hit is resolved against
//! the record store so that results always carry the file's current path
//! and never include files that have been deleted (even if their vector
//! store delete is still pending).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::config::{Config, QueryConfig};
use crate::error::{IndexError, ProviderError, StoreError};
use crate::models::SearchHit;
use crate::pipeline::with_timeout;
use crate::provider::ModelProvider;
use crate::records::RecordStore;
use crate::vector_store::VectorStore;

pub struct QueryService {
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn VectorStore>,
    records: RecordStore,
    settings: QueryConfig,
    timeout: Duration,
}

impl QueryService {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        store: Arc<dyn VectorStore>,
        records: RecordStore,
        settings: QueryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            records,
            settings,
            timeout,
        }
    }

    /// Return up to `limit` hits scoring at least the threshold, best first.
    ///
    /// Entries whose record is no longer active do not count toward `limit`.
    /// Blank query text yields an empty list without calling the provider.
    pub async fn search(
        &self,
        text: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit
            .unwrap_or(self.settings.default_limit)
            .clamp(1, self.settings.max_limit.max(1));

        let vector = with_timeout(self.timeout, self.provider.embed(text), |secs| {
            ProviderError::Timeout { op: "embed", secs }
        })
        .await?;
        // Entries of tombstoned files can outrank live ones, so widen the
        // store query until `limit` hits resolve or the store runs dry.
        let mut hits: Vec<SearchHit> = Vec::with_capacity(limit);
        let mut seen = HashSet::new();
        let mut fetch = limit;
        loop {
            let mut scored = with_timeout(self.timeout, self.store.query(&vector, fetch), |secs| {
                StoreError::Timeout { op: "query", secs }
            })
            .await?;
            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let exhausted = scored.len() < fetch
                || scored
                    .last()
                    .is_some_and(|s| s.score < self.settings.threshold);

            for entry in scored {
                if hits.len() == limit || entry.score < self.settings.threshold {
                    break;
                }
                if !seen.insert(entry.file_id.clone()) {
                    continue;
                }
                match self.records.get(&entry.file_id).await? {
                    Some(record) if record.is_active() => hits.push(SearchHit {
                        file_id: entry.file_id,
                        path: record.path,
                        score: entry.score,
                        summary: entry.metadata.summary,
                    }),
                    _ => debug!(file_id = %entry.file_id, "skipping entry of inactive file"),
                }
            }

            if hits.len() == limit || exhausted {
                break;
            }
            fetch = fetch.saturating_mul(2);
        }
        Ok(hits)
    }
}

/// CLI entry point for `fsindex search`.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let components = crate::daemon::build_components(config).await?;
    let hits = components.query.search(query, limit).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}",
            i + 1,
            hit.score,
            display_path(&hit.path, &config.watch.root)
        );
        println!("    id: {}", hit.file_id);
        if let Some(summary) = &hit.summary {
            println!("    {}", truncate(summary, 200));
        }
        println!();
    }

    Ok(())
}

fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
