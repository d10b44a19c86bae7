//! Error taxonomy for the synchronization pipeline.
//!
//! Every stage returns a typed error; [`IndexError`] unifies them so that a
//! run can short-circuit with `?` at the first failure. [`PipelineError`]
//! adds the context an operator needs (file id, path, stage) and maps the
//! failure onto a caller-facing [`Outcome`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Content extraction errors.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("image description failed: {0}")]
    Vision(#[source] ProviderError),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("extraction task failed: {0}")]
    Task(String),
}

/// Model provider (summarize, embed, vision) failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("invalid or missing credential: {0}")]
    Credential(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Vector store I/O failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store {op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("vector store request failed: {0}")]
    Request(String),

    #[error("vector store backend error: {0}")]
    Backend(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Unified error for one pipeline or query operation.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("file is {size} bytes, exceeds limit of {limit} bytes")]
    SizeLimit { size: u64, limit: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("identity conflict: {0}")]
    IdentityConflict(String),

    #[error("record store error: {0}")]
    Records(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown or inactive file id: {0}")]
    UnknownFile(String),
}

impl IndexError {
    /// How the failure should be surfaced to an API caller.
    pub fn outcome(&self) -> Outcome {
        match self {
            IndexError::Extraction(_)
            | IndexError::SizeLimit { .. }
            | IndexError::Provider(_)
            | IndexError::Io(_) => Outcome::Unprocessable,
            IndexError::Store(_) | IndexError::Records(_) => Outcome::ServiceUnavailable,
            IndexError::IdentityConflict(_) => Outcome::Conflict,
            IndexError::UnknownFile(_) => Outcome::NotFound,
        }
    }
}

/// Caller-facing classification of a failed operation. There is no
/// "partial success" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unprocessable,
    ServiceUnavailable,
    Conflict,
    NotFound,
}

/// Pipeline stage at which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Read,
    Extract,
    Summarize,
    Embed,
    Upsert,
    Delete,
    Move,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Resolve => "resolve",
            Stage::Read => "read",
            Stage::Extract => "extract",
            Stage::Summarize => "summarize",
            Stage::Embed => "embed",
            Stage::Upsert => "upsert",
            Stage::Delete => "delete",
            Stage::Move => "move",
            Stage::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// A failed run, with enough context to diagnose it without retrying.
#[derive(Debug, Error)]
#[error("{stage} failed for {} ({}): {kind}", path.display(), file_id.as_deref().unwrap_or("untracked"))]
pub struct PipelineError {
    pub file_id: Option<String>,
    pub path: PathBuf,
    pub stage: Stage,
    #[source]
    pub kind: IndexError,
}

impl PipelineError {
    pub fn outcome(&self) -> Outcome {
        self.kind.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_labels_match_pipeline_steps() {
        let labels: Vec<String> = [
            Stage::Resolve,
            Stage::Read,
            Stage::Extract,
            Stage::Summarize,
            Stage::Embed,
            Stage::Upsert,
            Stage::Delete,
            Stage::Move,
            Stage::Commit,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(
            labels,
            ["resolve", "read", "extract", "summarize", "embed", "upsert", "delete", "move", "commit"]
        );
    }

    #[test]
    fn provider_failures_are_unprocessable() {
        let err: IndexError = ProviderError::Timeout {
            op: "embed",
            secs: 30,
        }
        .into();
        assert_eq!(err.outcome(), Outcome::Unprocessable);
        assert_eq!(err.to_string(), "embed timed out after 30s");
    }

    #[test]
    fn store_failures_are_service_unavailable() {
        let err: IndexError = StoreError::Request("connection refused".into()).into();
        assert_eq!(err.outcome(), Outcome::ServiceUnavailable);
    }

    #[test]
    fn size_limit_display() {
        let err = IndexError::SizeLimit {
            size: 20,
            limit: 10,
        };
        assert_eq!(err.to_string(), "file is 20 bytes, exceeds limit of 10 bytes");
        assert_eq!(err.outcome(), Outcome::Unprocessable);
    }

    #[test]
    fn pipeline_error_carries_context() {
        let err = PipelineError {
            file_id: Some("abc".into()),
            path: PathBuf::from("/r/a.pdf"),
            stage: Stage::Extract,
            kind: ExtractError::Pdf("bad xref".into()).into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("extract failed for /r/a.pdf (abc)"));
        assert!(msg.contains("bad xref"));
        assert_eq!(err.outcome(), Outcome::Unprocessable);
    }
}
