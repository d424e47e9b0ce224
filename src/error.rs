use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`crate::Database`] operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The stored schema version differs from the one the caller expects.
    #[error("incompatible database version: expected {expected}, found {found}")]
    IncompatibleVersion { expected: String, found: String },

    /// The file is not a SQLite database, or lacks the `self` meta table or its version row.
    #[error("{} is not a meta database: {reason}", path.display())]
    NotADatabase { path: PathBuf, reason: String },

    /// Invalid table definition or column labels.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("meta key not found: {key}")]
    NotFound { key: String },

    /// The handle was disconnected.
    #[error("database handle is closed")]
    Closed,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_a_database(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::NotADatabase {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the file can never be opened with the given version.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::IncompatibleVersion { .. } | Self::NotADatabase { .. })
    }
}
