//! Error taxonomy for import runs.
//!
//! Row-level errors ([`ImportError::MalformedRow`], [`ImportError::Mapping`],
//! [`ImportError::Decode`]) may be skipped when the pipeline runs with
//! `strict = false`. Everything else terminates the run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("cannot open {}: {source}", path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} has no header line", path.display())]
    EmptyInput { path: PathBuf },

    #[error("line {line}: expected {expected} fields, found {actual}: {content:?}")]
    MalformedRow {
        line: u64,
        expected: usize,
        actual: usize,
        content: String,
    },

    #[error("line {line}: cannot map row: {reason}")]
    Mapping { line: u64, reason: String },

    #[error("line {line}: input is not valid {encoding}")]
    Decode { line: u64, encoding: &'static str },

    #[error("sink rejected chunk #{chunk}: {source:#}")]
    Sink {
        chunk: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint error: {0:#}")]
    Checkpoint(anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("skip limit of {limit} exceeded")]
    SkipLimitExceeded { limit: u64 },

    #[error("run {run_id} is already active")]
    RunAlreadyActive { run_id: String },
}

/// Coarse classification of an [`ImportError`], reported in run results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceUnavailable,
    EmptyInput,
    MalformedRow,
    Mapping,
    Decode,
    Sink,
    Io,
    Checkpoint,
    Config,
    SkipLimitExceeded,
    RunAlreadyActive,
}

impl ImportError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::ResourceUnavailable { .. } => ErrorKind::ResourceUnavailable,
            ImportError::EmptyInput { .. } => ErrorKind::EmptyInput,
            ImportError::MalformedRow { .. } => ErrorKind::MalformedRow,
            ImportError::Mapping { .. } => ErrorKind::Mapping,
            ImportError::Decode { .. } => ErrorKind::Decode,
            ImportError::Sink { .. } => ErrorKind::Sink,
            ImportError::Io(_) => ErrorKind::Io,
            ImportError::Checkpoint(_) => ErrorKind::Checkpoint,
            ImportError::Config(_) => ErrorKind::Config,
            ImportError::SkipLimitExceeded { .. } => ErrorKind::SkipLimitExceeded,
            ImportError::RunAlreadyActive { .. } => ErrorKind::RunAlreadyActive,
        }
    }

    /// Whether the error belongs to a single row and can be counted as a skip.
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            ImportError::MalformedRow { .. } | ImportError::Mapping { .. } | ImportError::Decode { .. }
        )
    }

    /// 1-based input line the error refers to, if any.
    #[must_use]
    pub fn line(&self) -> Option<u64> {
        match self {
            ImportError::MalformedRow { line, .. }
            | ImportError::Mapping { line, .. }
            | ImportError::Decode { line, .. } => Some(*line),
            _ => None,
        }
    }
}
