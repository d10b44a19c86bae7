//! Core data models used throughout fsindex.
//!
//! These types represent the tracked files, change notifications, chunks, and
//! index entries that flow through the synchronization pipeline.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`FileRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Active,
    Deleted,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Active => "active",
            FileState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(FileState::Active),
            "deleted" => Some(FileState::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked file, as stored in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub file_id: String,
    pub path: PathBuf,
    pub state: FileState,
    /// SHA-256 hex digest of the last successfully processed content.
    pub content_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FileRecord {
    pub fn is_active(&self) -> bool {
        self.state == FileState::Active
    }
}

/// Kind of a normalized file-system change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Moved => "moved",
        };
        f.write_str(s)
    }
}

/// Normalized notification of a regular-file mutation.
///
/// For [`ChangeKind::Moved`], `old_path` holds the source and `path` the
/// destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Created, path.into(), None)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Modified, path.into(), None)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Deleted, path.into(), None)
    }

    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Moved, to.into(), Some(from.into()))
    }

    fn new(kind: ChangeKind, path: PathBuf, old_path: Option<PathBuf>) -> Self {
        Self {
            kind,
            path: normalize_path(&path),
            old_path: old_path.map(|p| normalize_path(&p)),
            timestamp: Utc::now(),
        }
    }

    /// Paths whose run slots this event must hold while it is processed.
    pub fn slot_keys(&self) -> Vec<PathBuf> {
        let mut keys = vec![self.path.clone()];
        if let Some(old) = &self.old_path {
            if old != &self.path {
                keys.push(old.clone());
            }
        }
        keys
    }
}

/// A bounded, order-preserving slice of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in source order, contiguous from 0.
    pub index: usize,
    pub text: String,
    /// Byte range of the chunk within the extracted text.
    pub char_range: std::ops::Range<usize>,
}

/// Ordered chunks of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedDocument {
    pub chunks: Vec<Chunk>,
}

impl ChunkedDocument {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Metadata stored alongside a vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub path: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub summary: Option<String>,
}

/// The unit stored in the vector store: one per indexed active file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub file_id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// A ranked match returned from the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub file_id: String,
    pub metadata: EntryMetadata,
    pub score: f32,
}

/// A search result surfaced to callers of the query service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file_id: String,
    pub path: PathBuf,
    pub score: f32,
    pub summary: Option<String>,
}

/// Lexically normalize a path so that equivalent spellings share one key.
///
/// Removes `.` components and resolves `..` against preceding normal
/// components. Does not touch the file system (the file may be gone).
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
