//! Store error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::BackendKind;

/// Errors raised by the log store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded database file could not be created or opened.
    #[error("failed to open embedded store '{name}' at {}: {source}", .path.display())]
    Open {
        /// Logical name of the store.
        name: String,
        /// Resolved database path.
        path: PathBuf,
        /// Underlying `SQLite` error.
        #[source]
        source: rusqlite::Error,
    },

    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `SQLite` query failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `MySQL` driver or pool failure.
    #[error("mysql error: {0}")]
    MySql(#[from] sqlx::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Column name.
        column: &'static str,
        /// What went wrong.
        detail: String,
    },

    /// The store (or backend) was already closed.
    #[error("log store '{name}' is closed")]
    Closed {
        /// Logical name of the store.
        name: String,
    },

    /// The active backend does not provide the requested operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Backend that rejected it.
        backend: BackendKind,
    },

    /// A networked operation exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The logical name cannot be used for files or database names.
    #[error("invalid logical name '{0}'")]
    InvalidName(String),

    /// An error surfaced through a named store.
    #[error("log store '{name}': {source}")]
    InStore {
        /// Logical name of the store.
        name: String,
        /// The wrapped error.
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Attach the logical store name, unless the error already names one.
    #[must_use]
    pub fn in_store(self, name: &str) -> Self {
        match self {
            Self::InStore { .. } | Self::Open { .. } | Self::Closed { .. } => self,
            other => Self::InStore {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Build an [`StoreError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Strip any [`StoreError::InStore`] wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::InStore { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
