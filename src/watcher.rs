//! File system watcher producing normalized [`ChangeEvent`]s.
//!
//! Raw notifications are debounced by `notify-debouncer-full`, which also
//! stitches rename halves together. Each debounced batch is translated on a
//! dedicated thread:
//!
//! - directory events are dropped, except that a directory appearing or
//!   being renamed is expanded into per-file events for its contents;
//! - paths rejected by the [`EventFilter`] are dropped;
//! - a rename with both sides eligible becomes `moved`, one side eligible
//!   degrades to `deleted` (source) or `created` (destination);
//! - consecutive create/modify events for one path collapse into a single
//!   event.
//!
//! Losing the watch (root removed or renamed, the backend dropping the
//! root watch, watch limits exhausted) is reported on the fatal channel
//! rather than stalling silently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use thiserror::Error;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::filter::EventFilter;
use crate::models::{ChangeEvent, ChangeKind};
use crate::queue::EventSender;

/// The watch on the root can no longer be trusted.
#[derive(Debug, Clone, Error)]
#[error("watch on {} lost: {reason}", root.display())]
pub struct WatchFailure {
    pub root: PathBuf,
    pub reason: String,
}

pub type FatalSender = tokio_mpsc::UnboundedSender<WatchFailure>;

/// Recursive watcher over the filter's root. Watching stops when dropped.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl FileWatcher {
    pub fn start(
        filter: EventFilter,
        debounce: Duration,
        events: EventSender,
        fatal: FatalSender,
    ) -> Result<Self, notify::Error> {
        let root = filter.root().to_path_buf();
        let (tx, rx) = mpsc::channel::<DebounceEventResult>();

        std::thread::spawn(move || {
            while let Ok(result) = rx.recv() {
                if !handle_batch(result, &filter, &events, &fatal) {
                    break;
                }
            }
            debug!("watcher translation thread stopped");
        });

        let mut debouncer = new_debouncer(debounce, None, move |result| {
            let _ = tx.send(result);
        })?;
        debouncer.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "watching");

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

/// Liveness probe: the root must still be a directory.
pub fn check_root(root: &Path) -> Result<(), WatchFailure> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(WatchFailure {
            root: root.to_path_buf(),
            reason: "root is no longer a directory".to_string(),
        }),
        Err(e) => Err(WatchFailure {
            root: root.to_path_buf(),
            reason: format!("root is not accessible: {}", e),
        }),
    }
}

/// Returns false once the thread should stop.
fn handle_batch(
    result: DebounceEventResult,
    filter: &EventFilter,
    events: &EventSender,
    fatal: &FatalSender,
) -> bool {
    match result {
        Ok(batch) => {
            let translation = translate(batch.iter().map(|e| &e.event), filter);
            for event in translation.events {
                debug!(kind = %event.kind, path = %event.path.display(), "change detected");
                if events.blocking_send(event).is_err() {
                    warn!("event queue closed; stopping watcher");
                    return false;
                }
            }
            if let Some(reason) = translation.fatal {
                report_fatal(fatal, filter.root(), reason);
                return false;
            }
            true
        }
        Err(errors) => {
            for err in errors {
                if is_fatal(&err, filter.root()) {
                    report_fatal(fatal, filter.root(), err.to_string());
                    return false;
                }
                warn!(error = %err, "watch error");
            }
            true
        }
    }
}

fn report_fatal(fatal: &FatalSender, root: &Path, reason: String) {
    error!(root = %root.display(), %reason, "file watcher lost its subscription");
    let _ = fatal.send(WatchFailure {
        root: root.to_path_buf(),
        reason,
    });
}

fn is_fatal(err: &notify::Error, root: &Path) -> bool {
    match err.kind {
        notify::ErrorKind::MaxFilesWatch => true,
        notify::ErrorKind::PathNotFound | notify::ErrorKind::WatchNotFound => {
            err.paths.is_empty() || err.paths.iter().any(|p| p == root)
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
pub(crate) struct Translation {
    pub events: Vec<ChangeEvent>,
    pub fatal: Option<String>,
}

pub(crate) fn translate<'a>(
    raw: impl IntoIterator<Item = &'a Event>,
    filter: &EventFilter,
) -> Translation {
    let mut out = Vec::new();
    let mut fatal = None;

    for event in raw {
        if root_lost(event, filter.root()) {
            fatal = Some(format!("root was removed or renamed ({:?})", event.kind));
            break;
        }
        translate_one(event, filter, &mut out);
    }

    Translation {
        events: coalesce(out),
        fatal,
    }
}

fn root_lost(event: &Event, root: &Path) -> bool {
    match event.kind {
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().any(|p| p == root)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.first().is_some_and(|p| p == root)
        }
        _ => false,
    }
}

fn translate_one(event: &Event, filter: &EventFilter, out: &mut Vec<ChangeEvent>) {
    match event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                if kind == CreateKind::Folder || path.is_dir() {
                    expand_created(path, filter, out);
                } else if filter.accepts(path) {
                    out.push(ChangeEvent::created(path));
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => {
            translate_rename(mode, &event.paths, filter, out)
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => {
            for path in &event.paths {
                if filter.accepts(path) && !path.is_dir() {
                    out.push(ChangeEvent::modified(path));
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                if filter.covers(path) {
                    out.push(ChangeEvent::deleted(path));
                }
            }
        }
        // Metadata, access, and unclassified events carry no content change.
        _ => {}
    }
}

fn translate_rename(
    mode: RenameMode,
    paths: &[PathBuf],
    filter: &EventFilter,
    out: &mut Vec<ChangeEvent>,
) {
    match (mode, paths) {
        (RenameMode::Both, [from, to, ..]) => {
            if to.is_dir() {
                expand_moved(from, to, filter, out);
            } else {
                push_rename(from, to, filter, out);
            }
        }
        (RenameMode::From, [from, ..]) => {
            if filter.covers(from) {
                out.push(ChangeEvent::deleted(from));
            }
        }
        (RenameMode::To, [to, ..]) => {
            if to.is_dir() {
                expand_created(to, filter, out);
            } else if filter.accepts(to) {
                out.push(ChangeEvent::created(to));
            }
        }
        // Backends that cannot tell the halves apart report one path.
        (_, [path, ..]) => {
            if path.is_dir() {
                expand_created(path, filter, out);
            } else if path.exists() {
                if filter.accepts(path) {
                    out.push(ChangeEvent::created(path));
                }
            } else if filter.covers(path) {
                out.push(ChangeEvent::deleted(path));
            }
        }
        (_, []) => {}
    }
}

fn push_rename(from: &Path, to: &Path, filter: &EventFilter, out: &mut Vec<ChangeEvent>) {
    match (filter.accepts(from), filter.accepts(to)) {
        (true, true) => out.push(ChangeEvent::moved(from, to)),
        (true, false) => out.push(ChangeEvent::deleted(from)),
        (false, true) => out.push(ChangeEvent::created(to)),
        (false, false) => {}
    }
}

/// A directory appeared: every eligible file inside it is new.
fn expand_created(dir: &Path, filter: &EventFilter, out: &mut Vec<ChangeEvent>) {
    for file in files_under(dir) {
        if filter.accepts(&file) {
            out.push(ChangeEvent::created(file));
        }
    }
}

/// A directory was renamed: each file inside moved from the old prefix.
fn expand_moved(
    from_dir: &Path,
    to_dir: &Path,
    filter: &EventFilter,
    out: &mut Vec<ChangeEvent>,
) {
    for file in files_under(to_dir) {
        if let Ok(rel) = file.strip_prefix(to_dir) {
            push_rename(&from_dir.join(rel), &file, filter, out);
        }
    }
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Collapse consecutive create/modify events per path. A delete or move
/// touching the path ends the run so ordering across it is preserved.
fn coalesce(events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut out: Vec<ChangeEvent> = Vec::with_capacity(events.len());
    let mut pending: HashMap<PathBuf, usize> = HashMap::new();

    for event in events {
        match event.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                if let Some(&idx) = pending.get(&event.path) {
                    out[idx].kind = ChangeKind::Modified;
                    out[idx].timestamp = event.timestamp;
                    continue;
                }
                pending.insert(event.path.clone(), out.len());
                out.push(event);
            }
            ChangeKind::Deleted | ChangeKind::Moved => {
                pending.remove(&event.path);
                if let Some(old) = &event.old_path {
                    pending.remove(old);
                }
                out.push(event);
            }
        }
    }
    out
}
