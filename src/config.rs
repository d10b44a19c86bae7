use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_liveness_interval() -> u64 {
    5
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_large_document_chars")]
    pub large_document_chars: usize,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    #[serde(default = "default_lookback_chars")]
    pub sentence_lookback_chars: usize,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_summary_concurrency")]
    pub summary_concurrency: usize,
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_tombstone_grace")]
    pub tombstone_grace_secs: u64,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            large_document_chars: default_large_document_chars(),
            chunk_max_tokens: default_chunk_max_tokens(),
            sentence_lookback_chars: default_lookback_chars(),
            max_concurrent_runs: default_max_concurrent_runs(),
            summary_concurrency: default_summary_concurrency(),
            stage_timeout_secs: default_stage_timeout(),
            queue_capacity: default_queue_capacity(),
            tombstone_grace_secs: default_tombstone_grace(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_large_document_chars() -> usize {
    50_000
}
fn default_chunk_max_tokens() -> usize {
    1000
}
fn default_lookback_chars() -> usize {
    200
}
fn default_max_concurrent_runs() -> usize {
    4
}
fn default_summary_concurrency() -> usize {
    4
}
fn default_stage_timeout() -> u64 {
    120
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_tombstone_grace() -> u64 {
    300
}
fn default_purge_interval() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            base_url: None,
            summary_model: default_summary_model(),
            embedding_model: default_embedding_model(),
            vision_model: None,
            dims: default_dims(),
            timeout_secs: default_model_timeout(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_model_provider() -> String {
    "local".to_string()
}
fn default_summary_model() -> String {
    "gemma3:4b".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_model_timeout() -> u64 {
    60
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_store_url(),
            collection: default_collection(),
            api_key_env: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

fn default_store_backend() -> String {
    "qdrant".to_string()
}
fn default_store_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "file_embeddings".to_string()
}
fn default_store_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_threshold() -> f32 {
    0.4
}
fn default_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    100
}

/// Patterns excluded regardless of configuration: VCS metadata, build
/// output, hidden files, and editor swap/temp files.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/__pycache__/**",
    "**/.*",
    "**/.*/**",
    "**/*~",
    "**/*.swp",
    "**/*.tmp",
];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.pipeline.chunk_max_tokens == 0 {
        bail!("pipeline.chunk_max_tokens must be > 0");
    }
    if config.pipeline.max_concurrent_runs == 0 {
        bail!("pipeline.max_concurrent_runs must be > 0");
    }
    if config.pipeline.summary_concurrency == 0 {
        bail!("pipeline.summary_concurrency must be > 0");
    }
    if config.pipeline.queue_capacity == 0 {
        bail!("pipeline.queue_capacity must be > 0");
    }
    if config.pipeline.stage_timeout_secs == 0 {
        bail!("pipeline.stage_timeout_secs must be > 0");
    }

    if config.model.dims == 0 {
        bail!("model.dims must be > 0");
    }
    match config.model.provider.as_str() {
        "local" | "online" => {}
        other => bail!(
            "Unknown model provider: '{}'. Must be local or online.",
            other
        ),
    }

    match config.vector_store.backend.as_str() {
        "qdrant" | "memory" => {}
        other => bail!(
            "Unknown vector store backend: '{}'. Must be qdrant or memory.",
            other
        ),
    }

    if !(-1.0..=1.0).contains(&config.query.threshold) {
        bail!("query.threshold must be in [-1.0, 1.0]");
    }
    if config.query.default_limit == 0 || config.query.default_limit > config.query.max_limit {
        bail!("query.default_limit must be in [1, query.max_limit]");
    }

    Ok(())
}
