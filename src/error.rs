//! Typed errors for the resolution and ingestion core.
//!
//! Command-level code (`run_*` functions) uses `anyhow` and adds context;
//! the core modules return these variants so callers can distinguish
//! recoverable conditions (a merge target already consumed by a previous
//! merge, a create race lost to another writer) from fatal ones.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A referenced identity does not exist. Batch callers treat this as a
    /// skip; single-item commands surface it and stop.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The extraction payload has an invalid shape. The whole image is
    /// rejected and recorded with status `error`.
    #[error("invalid extraction: {0}")]
    Validation(String),

    /// A uniqueness constraint fired on create. Recoverable by re-resolving.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The extraction service failed after retries.
    #[error("extraction service: {0}")]
    ExternalService(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl Error {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
