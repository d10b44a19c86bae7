//! Composition root and the long-running `watch` daemon.
//!
//! [`build_components`] wires the record store, model provider, vector
//! store, pipeline, and query service from configuration. [`run_watch`]
//! owns the event queue: the watcher and the startup scan produce into it,
//! the pipeline consumes it. The daemon loop then waits for one of:
//!
//! - a fatal watcher condition → log and exit non-zero;
//! - Ctrl-C → stop watching, let in-flight runs finish, exit cleanly;
//! - the purge tick → drop tombstones older than the grace period;
//! - the liveness tick → verify the root is still a directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::error::IndexError;
use crate::filter::EventFilter;
use crate::migrate;
use crate::pipeline::{IndexingPipeline, PipelineSettings};
use crate::provider::create_provider;
use crate::query::QueryService;
use crate::queue::event_queue;
use crate::records::RecordStore;
use crate::scan;
use crate::vector_store::{create_store, VectorStore};
use crate::watcher::{check_root, FileWatcher};

/// How long shutdown waits for in-flight runs.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Components {
    /// Canonical watch root.
    pub root: PathBuf,
    pub filter: EventFilter,
    pub records: RecordStore,
    pub store: Arc<dyn VectorStore>,
    pub pipeline: Arc<IndexingPipeline>,
    pub query: QueryService,
}

pub async fn build_components(config: &Config) -> Result<Components> {
    let root = std::fs::canonicalize(&config.watch.root).with_context(|| {
        format!("Watch root does not exist: {}", config.watch.root.display())
    })?;
    if !root.is_dir() {
        bail!("Watch root is not a directory: {}", root.display());
    }
    let filter = EventFilter::new(&root, &config.watch)?;

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let records = RecordStore::new(pool);

    let provider = create_provider(&config.model)?;
    let store = create_store(&config.vector_store, config.model.dims)?;
    store
        .init()
        .await
        .with_context(|| format!("Failed to initialize vector store '{}'", store.name()))?;

    let settings = PipelineSettings::from(&config.pipeline);
    let query = QueryService::new(
        Arc::clone(&provider),
        Arc::clone(&store),
        records.clone(),
        config.query.clone(),
        settings.stage_timeout,
    );
    let pipeline = Arc::new(IndexingPipeline::new(
        records.clone(),
        Arc::clone(&store),
        provider,
        settings,
    ));

    Ok(Components {
        root,
        filter,
        records,
        store,
        pipeline,
        query,
    })
}

/// Drop tombstones whose grace period has elapsed.
pub async fn purge_expired(records: &RecordStore, grace_secs: u64) -> Result<u64, IndexError> {
    let cutoff = Utc::now().timestamp() - grace_secs as i64;
    records.purge_tombstones(cutoff).await
}

/// CLI entry point for `fsindex watch`.
pub async fn run_watch(config: &Config) -> Result<()> {
    let components = build_components(config).await?;
    info!(
        root = %components.root.display(),
        store = components.store.name(),
        "starting daemon"
    );

    let (events_tx, events_rx) = event_queue(config.pipeline.queue_capacity);
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

    // Subscribe before scanning so changes during the scan are not lost.
    let watcher = FileWatcher::start(
        components.filter.clone(),
        config.watch.debounce(),
        events_tx.clone(),
        fatal_tx,
    )
    .context("Failed to start file watcher")?;
    let consumer = tokio::spawn(Arc::clone(&components.pipeline).run(events_rx));

    for event in scan::reconcile(&components.filter, &components.records).await? {
        events_tx.send(event).await?;
    }
    drop(events_tx);

    let mut purge = tokio::time::interval(Duration::from_secs(
        config.pipeline.purge_interval_secs.max(1),
    ));
    let mut liveness = tokio::time::interval(Duration::from_secs(
        config.watch.liveness_interval_secs.max(1),
    ));

    let outcome: Result<()> = loop {
        tokio::select! {
            Some(failure) = fatal_rx.recv() => {
                break Err(anyhow::Error::new(failure));
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutdown requested");
                break Ok(());
            }
            _ = purge.tick() => {
                match purge_expired(&components.records, config.pipeline.tombstone_grace_secs).await {
                    Ok(0) => {}
                    Ok(n) => info!(purged = n, "purged expired tombstones"),
                    Err(e) => warn!(error = %e, "tombstone purge failed"),
                }
            }
            _ = liveness.tick() => {
                if let Err(failure) = check_root(&components.root) {
                    error!(error = %failure, "liveness check failed");
                    break Err(anyhow::Error::new(failure));
                }
            }
        }
    };

    // Stops the watcher thread, which drops the last queue sender.
    drop(watcher);
    match &outcome {
        Ok(()) => {
            if tokio::time::timeout(DRAIN_TIMEOUT, consumer).await.is_err() {
                warn!("in-flight runs did not finish before shutdown");
            }
        }
        Err(_) => consumer.abort(),
    }
    outcome
}
