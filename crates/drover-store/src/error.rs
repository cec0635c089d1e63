//! Store error type.
//!
//! Persistence failures are the one error class the orchestrator must
//! treat as run-fatal (a checkpoint that cannot be written means the
//! monotonic-progress invariant can no longer be guaranteed), so the
//! store exposes a typed error rather than `anyhow`.

use std::path::PathBuf;

/// Errors produced by the drover store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An underlying filesystem operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path the operation was targeting.
        path: PathBuf,
        /// The underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// A file existed but could not be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the unparsable file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// Persisted state violates a store invariant.
    #[error("corrupt store state: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
