//! Error types for netstate

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while labeling states or computing dynamics
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write npy array: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("Failed to write npz container: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    #[error("Missing {kind} file: {}", path.display())]
    MissingInput { kind: &'static str, path: PathBuf },

    #[error("Unreadable {kind} file {}: {reason}", path.display())]
    CorruptInput {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to parse {0}")]
    ParseError(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Invalid region-network mapping: {0}")]
    InvalidMapping(String),

    #[error("Invalid label set: {0}")]
    InvalidLabelSet(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StateError {
    /// Whether the orchestrator may skip the affected subject and continue.
    ///
    /// Missing, unreadable or mis-shaped per-subject inputs are recoverable;
    /// everything else invalidates the whole run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StateError::MissingInput { .. }
                | StateError::CorruptInput { .. }
                | StateError::ShapeMismatch { .. }
        )
    }

    pub(crate) fn corrupt(kind: &'static str, path: &Path, reason: impl ToString) -> Self {
        StateError::CorruptInput {
            kind,
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        StateError::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}
