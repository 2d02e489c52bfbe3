//! Error types for queries.

use chainidx_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed filter or page request; nothing was read.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store does not maintain the index family.
    #[error("index not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("query cancelled")]
    Cancelled,

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::Store(err) if err.is_not_found())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
