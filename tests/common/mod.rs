#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fsindex::chunk::ChunkSettings;
use fsindex::error::{ProviderError, StoreError};
use fsindex::models::{EntryMetadata, ScoredEntry};
use fsindex::pipeline::{IndexingPipeline, PipelineSettings};
use fsindex::provider::ModelProvider;
use fsindex::records::RecordStore;
use fsindex::vector_store::{InMemoryStore, VectorStore};
use fsindex::{db, migrate};

pub const DIMS: usize = 2;

/// Model provider with scripted latency and failures.
///
/// Summaries are the first two words of the input, the final summary is
/// the inputs joined with " | ", and every embedding is `[1.0, 0.0]`.
#[derive(Default)]
pub struct ScriptedProvider {
    pub summarize_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
    pub final_inputs: Mutex<Vec<Vec<String>>>,
    pub fail_embed: AtomicBool,
    summary_delay: Mutex<Duration>,
    queued_delays: Mutex<VecDeque<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_summary_delay(&self, delay: Duration) {
        *self.summary_delay.lock().unwrap() = delay;
    }

    /// Delays consumed one per summarize call, in call order.
    pub fn queue_summary_delays(&self, delays: &[u64]) {
        let mut queued = self.queued_delays.lock().unwrap();
        queued.extend(delays.iter().map(|ms| Duration::from_millis(*ms)));
    }

    pub fn summarize_count(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    pub fn embed_count(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_delay(&self) -> Duration {
        let queued = self.queued_delays.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| *self.summary_delay.lock().unwrap())
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.next_delay();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(text.split_whitespace().take(2).collect::<Vec<_>>().join(" "))
    }

    async fn summarize_final(&self, summaries: &[String]) -> Result<String, ProviderError> {
        self.final_inputs.lock().unwrap().push(summaries.to_vec());
        Ok(summaries.join(" | "))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("scripted outage".to_string()));
        }
        Ok(vec![1.0, 0.0])
    }

    async fn describe_image(&self, _image: &[u8]) -> Result<String, ProviderError> {
        Ok("a scripted image".to_string())
    }
}

/// Wraps an [`InMemoryStore`] whose deletes always fail.
pub struct FailingDeleteStore {
    pub inner: Arc<InMemoryStore>,
}

#[async_trait]
impl VectorStore for FailingDeleteStore {
    fn name(&self) -> &str {
        "failing-delete"
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.inner.init().await
    }

    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), StoreError> {
        self.inner.upsert(id, vector, metadata).await
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredEntry>, StoreError> {
        self.inner.query(vector, limit).await
    }

    async fn update_path(&self, id: &str, path: &str, updated_at: i64) -> Result<(), StoreError> {
        self.inner.update_path(id, path, updated_at).await
    }

    async fn delete(&self, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::Request("connection refused".to_string()))
    }
}

pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        max_file_bytes: 1024 * 1024,
        chunk: ChunkSettings {
            large_document_chars: 200,
            max_tokens: 25,
            lookback_chars: 40,
        },
        summary_concurrency: 4,
        max_concurrent_runs: 4,
        stage_timeout: Duration::from_secs(5),
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub root: PathBuf,
    pub records: RecordStore,
    pub memory: Arc<InMemoryStore>,
    pub provider: Arc<ScriptedProvider>,
}

impl Harness {
    pub async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let base = std::fs::canonicalize(tmp.path()).unwrap();
        let root = base.join("tree");
        std::fs::create_dir_all(&root).unwrap();

        let pool = db::connect_path(&base.join("records.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        Self {
            tmp,
            root,
            records: RecordStore::new(pool),
            memory: Arc::new(InMemoryStore::new(DIMS)),
            provider: ScriptedProvider::new(),
        }
    }

    pub fn pipeline(&self, settings: PipelineSettings) -> IndexingPipeline {
        let store: Arc<dyn VectorStore> = self.memory.clone();
        self.pipeline_with_store(store, settings)
    }

    pub fn pipeline_with_store(
        &self,
        store: Arc<dyn VectorStore>,
        settings: PipelineSettings,
    ) -> IndexingPipeline {
        let provider: Arc<dyn ModelProvider> = self.provider.clone();
        IndexingPipeline::new(self.records.clone(), store, provider, settings)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}
