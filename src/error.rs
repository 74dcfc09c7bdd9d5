//! Error types shared by every layer of the engine.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors surfaced by the storage engine and the statement layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Page {page} is corrupt: {reason}")]
    Corrupt { page: PageId, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Misuse: {0}")]
    Misuse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl Error {
    pub(crate) fn corrupt(page: PageId, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            page,
            reason: reason.into(),
        }
    }

    /// Lock contention and transient IO failures may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_) | Error::Io(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
