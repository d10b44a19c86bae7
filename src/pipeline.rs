//! Indexing pipeline: turns change events into vector store updates.
//!
//! For `created`/`modified` events a run goes through, in order:
//!
//! 1. **Resolve**: stat the path, find or create its [`FileRecord`].
//! 2. **Read**: enforce the size ceiling, read bytes, hash them. An
//!    unchanged hash ends the run here.
//! 3. **Extract**: bytes to text via [`ContentExtractor`].
//! 4. **Chunk**: split large documents on paragraph/sentence boundaries.
//! 5. **Summarize**: one summary per chunk (bounded concurrency, source
//!    order kept), then a final merge when there is more than one chunk.
//! 6. **Embed**: one vector for the summary.
//! 7. **Upsert**: write the entry keyed by `file_id`.
//! 8. **Commit**: store the new content hash.
//!
//! Any failure aborts the run at that stage. Nothing before the upsert
//! touches the vector store, so a failed run leaves the previous entry in
//! place and the stored hash unchanged, and the next event for the file
//! retries from scratch.
//!
//! Runs for the same path are serialized through [`RunSlots`]; runs for
//! different paths execute in parallel up to `max_concurrent_runs`.

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::chunk::{chunk_document, ChunkSettings};
use crate::config::PipelineConfig;
use crate::error::{ExtractError, IndexError, PipelineError, ProviderError, Stage, StoreError};
use crate::extract::{detect_kind, ContentExtractor};
use crate::models::{ChangeEvent, ChangeKind, ChunkedDocument, EntryMetadata, FileRecord};
use crate::provider::ModelProvider;
use crate::queue::EventReceiver;
use crate::records::{MoveOutcome, RecordStore};
use crate::slots::{Reservation, RunSlots};
use crate::vector_store::VectorStore;

/// Tunables for a pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_file_bytes: u64,
    pub chunk: ChunkSettings,
    pub summary_concurrency: usize,
    pub max_concurrent_runs: usize,
    pub stage_timeout: Duration,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            max_file_bytes: cfg.max_file_bytes,
            chunk: ChunkSettings::from(cfg),
            summary_concurrency: cfg.summary_concurrency,
            max_concurrent_runs: cfg.max_concurrent_runs,
            stage_timeout: Duration::from_secs(cfg.stage_timeout_secs),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new entry was written from `chunks` chunks.
    Indexed { file_id: String, chunks: usize },
    /// Content hash matched the last successful run.
    Unchanged { file_id: String },
    /// Tracked, but no extractable content; any previous entry was removed.
    Empty { file_id: String },
    /// Record re-pointed at the new path; `reindexed` if content changed too.
    Moved { file_id: String, reindexed: bool },
    /// Record tombstoned. `reconciled` is false when the vector store delete
    /// failed and the entry is left as reconciliation debt.
    Removed { file_id: String, reconciled: bool },
    /// A removed directory's tracked files were removed.
    Swept { removed: usize },
    /// Nothing to do (vanished path, directory, untracked deletion).
    Ignored,
}

enum Deletion {
    Done(RunOutcome),
    Directory(Vec<FileRecord>),
}

pub struct IndexingPipeline {
    records: RecordStore,
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn ModelProvider>,
    extractor: ContentExtractor,
    settings: PipelineSettings,
    slots: RunSlots,
    permits: Semaphore,
}

impl IndexingPipeline {
    pub fn new(
        records: RecordStore,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn ModelProvider>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            extractor: ContentExtractor::new(Arc::clone(&provider)),
            permits: Semaphore::new(settings.max_concurrent_runs.max(1)),
            records,
            store,
            provider,
            settings,
            slots: RunSlots::new(),
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Process one change event to completion.
    pub async fn on_change(&self, event: ChangeEvent) -> Result<RunOutcome, PipelineError> {
        let reservation = self.slots.reserve(&event.slot_keys());
        self.process(event, reservation).await
    }

    /// Process a batch, reserving slots in batch order so per-path ordering
    /// holds; independent paths run concurrently.
    pub async fn process_batch(
        &self,
        events: Vec<ChangeEvent>,
    ) -> Vec<Result<RunOutcome, PipelineError>> {
        let runs: Vec<_> = events
            .into_iter()
            .map(|event| {
                let reservation = self.slots.reserve(&event.slot_keys());
                self.process(event, reservation)
            })
            .collect();
        futures::future::join_all(runs).await
    }

    /// Re-run the full pipeline for a tracked file, ignoring the skip rule.
    pub async fn reindex(&self, file_id: &str) -> Result<RunOutcome, PipelineError> {
        let record = self.active_record(file_id).await?;
        let _guard = self.slots.reserve(&[record.path.clone()]).acquire().await;
        let _permit = self.permits.acquire().await.ok();

        let current = self.active_record(file_id).await?;
        if current.path != record.path {
            return Err(fail(
                Some(file_id),
                &record.path,
                Stage::Resolve,
                IndexError::IdentityConflict(format!(
                    "moved to {} while waiting",
                    current.path.display()
                )),
            ));
        }
        self.index_path(&current.path, true).await
    }

    /// Remove a tracked file's entry and tombstone its record.
    pub async fn remove(&self, file_id: &str) -> Result<RunOutcome, PipelineError> {
        let record = self.active_record(file_id).await?;
        let _guard = self.slots.reserve(&[record.path.clone()]).acquire().await;
        let _permit = self.permits.acquire().await.ok();

        let current = self.active_record(file_id).await?;
        self.remove_record(&current).await
    }

    /// Consume the queue until every sender is gone, one task per event.
    ///
    /// At most `max_concurrent_runs` dispatched tasks exist at a time; the
    /// rest stay in the bounded queue so producers feel backpressure.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        let dispatch = Arc::new(Semaphore::new(self.settings.max_concurrent_runs.max(1)));
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                slot = Arc::clone(&dispatch).acquire_owned() => {
                    let Ok(slot) = slot else { break };
                    let Some(event) = events.recv().await else { break };
                    // Reserve before spawning: arrival order decides run order.
                    let reservation = self.slots.reserve(&event.slot_keys());
                    let pipeline = Arc::clone(&self);
                    tasks.spawn(async move {
                        pipeline.process_logged(event, reservation).await;
                        drop(slot);
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "pipeline task aborted");
                    }
                }
            }
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "pipeline task aborted");
            }
        }
        debug!("event queue closed; pipeline consumer stopped");
    }

    async fn process_logged(&self, event: ChangeEvent, reservation: Reservation) {
        let kind = event.kind;
        match self.process(event, reservation).await {
            Ok(outcome) => debug!(%kind, ?outcome, "run finished"),
            Err(e) => error!(
                file_id = e.file_id.as_deref().unwrap_or("-"),
                path = %e.path.display(),
                stage = %e.stage,
                outcome = ?e.outcome(),
                error = %e.kind,
                "run failed"
            ),
        }
    }

    async fn process(
        &self,
        event: ChangeEvent,
        reservation: Reservation,
    ) -> Result<RunOutcome, PipelineError> {
        let guard = reservation.acquire().await;
        let permit = self.permits.acquire().await.ok();
        debug!(kind = %event.kind, path = %event.path.display(), "run started");

        match (event.kind, event.old_path.as_deref()) {
            (ChangeKind::Created | ChangeKind::Modified, _) | (ChangeKind::Moved, None) => {
                self.index_path(&event.path, false).await
            }
            (ChangeKind::Moved, Some(old)) => self.move_path(old, &event.path).await,
            (ChangeKind::Deleted, _) => match self.remove_path(&event.path).await? {
                Deletion::Done(outcome) => Ok(outcome),
                Deletion::Directory(children) => {
                    // Children take their own slots; do not hold the parent's.
                    drop(permit);
                    drop(guard);
                    self.sweep(children).await
                }
            },
        }
    }

    async fn index_path(&self, path: &Path, force: bool) -> Result<RunOutcome, PipelineError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "path vanished before processing");
                return Ok(RunOutcome::Ignored);
            }
            Err(e) => return Err(fail(None, path, Stage::Resolve, e)),
        };
        if !meta.is_file() {
            return Ok(RunOutcome::Ignored);
        }
        let Some(kind) = detect_kind(path) else {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(fail(
                None,
                path,
                Stage::Extract,
                ExtractError::UnsupportedType(ext),
            ));
        };

        let record = self
            .records
            .upsert_active(path)
            .await
            .map_err(|e| fail(None, path, Stage::Resolve, e))?;
        let id = Some(record.file_id.as_str());
        let limit = self.settings.max_file_bytes;
        let size_limit = |size: u64| IndexError::SizeLimit { size, limit };

        if meta.len() > limit {
            return Err(fail(id, path, Stage::Read, size_limit(meta.len())));
        }
        let bytes = match with_timeout(self.settings.stage_timeout, tokio::fs::read(path), |secs| {
            io::Error::new(io::ErrorKind::TimedOut, format!("read timed out after {}s", secs))
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RunOutcome::Ignored),
            Err(e) => return Err(fail(id, path, Stage::Read, e)),
        };
        if bytes.len() as u64 > limit {
            return Err(fail(id, path, Stage::Read, size_limit(bytes.len() as u64)));
        }

        let hash = hex::encode(Sha256::digest(&bytes));
        if !force && record.content_hash.as_deref() == Some(hash.as_str()) {
            debug!(file_id = %record.file_id, path = %path.display(), "content unchanged");
            return Ok(RunOutcome::Unchanged {
                file_id: record.file_id,
            });
        }
        if bytes.is_empty() {
            return self.commit_empty(&record, path, &hash).await;
        }

        let text = with_timeout(
            self.settings.stage_timeout,
            self.extractor.extract(path, bytes, kind),
            ExtractError::Timeout,
        )
        .await
        .map_err(|e| fail(id, path, Stage::Extract, e))?;

        let doc = chunk_document(&text, &self.settings.chunk);
        if doc.is_empty() {
            return self.commit_empty(&record, path, &hash).await;
        }
        debug!(file_id = %record.file_id, chunks = doc.len(), "chunked");

        let summary = self
            .summarize(&doc)
            .await
            .map_err(|e| fail(id, path, Stage::Summarize, e))?;

        let vector = with_timeout(
            self.settings.stage_timeout,
            self.provider.embed(&summary),
            |secs| ProviderError::Timeout { op: "embed", secs },
        )
        .await
        .map_err(|e| fail(id, path, Stage::Embed, e))?;
        if vector.len() != self.provider.dims() {
            return Err(fail(
                id,
                path,
                Stage::Embed,
                ProviderError::InvalidResponse(format!(
                    "embedding has {} dimensions, expected {}",
                    vector.len(),
                    self.provider.dims()
                )),
            ));
        }

        let now = Utc::now().timestamp();
        let metadata = EntryMetadata {
            path: path.to_string_lossy().into_owned(),
            created_at: record.created_at,
            updated_at: now,
            summary: Some(summary),
        };
        with_timeout(
            self.settings.stage_timeout,
            self.store.upsert(&record.file_id, &vector, &metadata),
            |secs| StoreError::Timeout { op: "upsert", secs },
        )
        .await
        .map_err(|e| fail(id, path, Stage::Upsert, e))?;

        self.records
            .mark_indexed(&record.file_id, path, &hash, now)
            .await
            .map_err(|e| fail(id, path, Stage::Commit, e))?;

        info!(
            file_id = %record.file_id,
            path = %path.display(),
            chunks = doc.len(),
            "indexed"
        );
        Ok(RunOutcome::Indexed {
            file_id: record.file_id,
            chunks: doc.len(),
        })
    }

    async fn summarize(&self, doc: &ChunkedDocument) -> Result<String, ProviderError> {
        let limit = self.settings.stage_timeout;
        if let [only] = doc.chunks.as_slice() {
            return with_timeout(limit, self.provider.summarize(&only.text), |secs| {
                ProviderError::Timeout {
                    op: "summarize",
                    secs,
                }
            })
            .await;
        }

        // Futures own their inputs so the run future stays `Send`.
        let calls: Vec<_> = doc
            .chunks
            .iter()
            .map(|chunk| {
                let text = chunk.text.clone();
                let provider = Arc::clone(&self.provider);
                async move {
                    with_timeout(limit, provider.summarize(&text), |secs| {
                        ProviderError::Timeout {
                            op: "summarize",
                            secs,
                        }
                    })
                    .await
                }
            })
            .collect();

        // `buffered` yields in input order regardless of completion order.
        let summaries: Vec<String> = stream::iter(calls)
            .buffered(self.settings.summary_concurrency.max(1))
            .try_collect()
            .await?;

        with_timeout(limit, self.provider.summarize_final(&summaries), |secs| {
            ProviderError::Timeout {
                op: "summarize_final",
                secs,
            }
        })
        .await
    }

    async fn commit_empty(
        &self,
        record: &FileRecord,
        path: &Path,
        hash: &str,
    ) -> Result<RunOutcome, PipelineError> {
        let id = Some(record.file_id.as_str());
        with_timeout(
            self.settings.stage_timeout,
            self.store.delete(&record.file_id),
            |secs| StoreError::Timeout { op: "delete", secs },
        )
        .await
        .map_err(|e| fail(id, path, Stage::Delete, e))?;
        self.records
            .mark_indexed(&record.file_id, path, hash, Utc::now().timestamp())
            .await
            .map_err(|e| fail(id, path, Stage::Commit, e))?;
        info!(file_id = %record.file_id, path = %path.display(), "tracked with no extractable content");
        Ok(RunOutcome::Empty {
            file_id: record.file_id.clone(),
        })
    }

    async fn remove_path(&self, path: &Path) -> Result<Deletion, PipelineError> {
        let record = self
            .records
            .get_active_by_path(path)
            .await
            .map_err(|e| fail(None, path, Stage::Resolve, e))?;
        if let Some(record) = record {
            return self.remove_record(&record).await.map(Deletion::Done);
        }

        let children = self
            .records
            .list_active_under(path)
            .await
            .map_err(|e| fail(None, path, Stage::Resolve, e))?;
        if children.is_empty() {
            debug!(path = %path.display(), "deletion of untracked path");
            Ok(Deletion::Done(RunOutcome::Ignored))
        } else {
            Ok(Deletion::Directory(children))
        }
    }

    async fn remove_record(&self, record: &FileRecord) -> Result<RunOutcome, PipelineError> {
        let reconciled = match with_timeout(
            self.settings.stage_timeout,
            self.store.delete(&record.file_id),
            |secs| StoreError::Timeout { op: "delete", secs },
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    file_id = %record.file_id,
                    path = %record.path.display(),
                    error = %e,
                    "vector store delete failed; record tombstoned with entry left as reconciliation debt"
                );
                false
            }
        };

        self.records
            .mark_deleted(&record.path)
            .await
            .map_err(|e| fail(Some(record.file_id.as_str()), &record.path, Stage::Delete, e))?;
        info!(file_id = %record.file_id, path = %record.path.display(), "removed");
        Ok(RunOutcome::Removed {
            file_id: record.file_id.clone(),
            reconciled,
        })
    }

    async fn sweep(&self, children: Vec<FileRecord>) -> Result<RunOutcome, PipelineError> {
        let mut removed = 0;
        for child in children {
            let _guard = self.slots.reserve(&[child.path.clone()]).acquire().await;
            if tokio::fs::metadata(&child.path).await.is_ok() {
                continue;
            }
            let current = self
                .records
                .get(&child.file_id)
                .await
                .map_err(|e| fail(Some(child.file_id.as_str()), &child.path, Stage::Resolve, e))?;
            if let Some(current) = current.filter(|c| c.is_active() && c.path == child.path) {
                self.remove_record(&current).await?;
                removed += 1;
            }
        }
        Ok(RunOutcome::Swept { removed })
    }

    async fn move_path(&self, old: &Path, new: &Path) -> Result<RunOutcome, PipelineError> {
        match tokio::fs::metadata(new).await {
            // Directory renames arrive from the watcher as per-file moves.
            Ok(meta) if meta.is_dir() => return Ok(RunOutcome::Ignored),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(from = %old.display(), to = %new.display(), "move destination vanished");
                return match self.remove_path(old).await? {
                    Deletion::Done(outcome) => Ok(outcome),
                    Deletion::Directory(_) => Ok(RunOutcome::Ignored),
                };
            }
            Err(e) => return Err(fail(None, new, Stage::Move, e)),
        }

        let moved = self
            .records
            .mark_moved(old, new)
            .await
            .map_err(|e| fail(None, new, Stage::Move, e))?;
        let Some(MoveOutcome { record, displaced }) = moved else {
            debug!(from = %old.display(), to = %new.display(), "move from untracked source");
            return self.index_path(new, false).await;
        };
        info!(
            file_id = %record.file_id,
            from = %old.display(),
            to = %new.display(),
            "moved"
        );

        if let Some(displaced) = displaced {
            if let Err(e) = with_timeout(
                self.settings.stage_timeout,
                self.store.delete(&displaced.file_id),
                |secs| StoreError::Timeout { op: "delete", secs },
            )
            .await
            {
                warn!(
                    file_id = %displaced.file_id,
                    path = %new.display(),
                    error = %e,
                    "failed to delete entry of overwritten file; left as reconciliation debt"
                );
            }
        }

        let outcome = self.index_path(new, false).await?;
        if matches!(outcome, RunOutcome::Unchanged { .. }) {
            let new_path = new.to_string_lossy();
            if let Err(e) = with_timeout(
                self.settings.stage_timeout,
                self.store
                    .update_path(&record.file_id, &new_path, Utc::now().timestamp()),
                |secs| StoreError::Timeout {
                    op: "update_path",
                    secs,
                },
            )
            .await
            {
                warn!(
                    file_id = %record.file_id,
                    path = %new.display(),
                    error = %e,
                    "failed to update stored path; left as reconciliation debt"
                );
            }
        }
        let reindexed = matches!(
            outcome,
            RunOutcome::Indexed { .. } | RunOutcome::Empty { .. }
        );
        Ok(RunOutcome::Moved {
            file_id: record.file_id,
            reindexed,
        })
    }

    async fn active_record(&self, file_id: &str) -> Result<FileRecord, PipelineError> {
        let record = self
            .records
            .get(file_id)
            .await
            .map_err(|e| fail(Some(file_id), Path::new(""), Stage::Resolve, e))?;
        match record {
            Some(record) if record.is_active() => Ok(record),
            Some(record) => Err(fail(
                Some(file_id),
                &record.path,
                Stage::Resolve,
                IndexError::UnknownFile(file_id.to_string()),
            )),
            None => Err(fail(
                Some(file_id),
                Path::new(""),
                Stage::Resolve,
                IndexError::UnknownFile(file_id.to_string()),
            )),
        }
    }
}

fn fail(
    file_id: Option<&str>,
    path: &Path,
    stage: Stage,
    kind: impl Into<IndexError>,
) -> PipelineError {
    PipelineError {
        file_id: file_id.map(str::to_string),
        path: path.to_path_buf(),
        stage,
        kind: kind.into(),
    }
}

/// Bound an external call by `limit`, mapping expiry through `on_timeout`.
pub(crate) async fn with_timeout<T, E>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(u64) -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(limit.as_secs())),
    }
}
