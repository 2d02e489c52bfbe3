//! Error types for index maintenance.

use chainidx_primitives::BundleError;
use chainidx_store::StoreError;
use thiserror::Error;

/// Errors that abort processing of a height.
///
/// Decode failures of individual logs, extra data or authorizations are not
/// errors: they are logged, counted and skipped.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The bundle is structurally inconsistent. Nothing was written.
    #[error("invalid bundle: {0}")]
    InvalidBundle(#[from] BundleError),

    /// The request itself is malformed. Nothing was written.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store failed; the height left no partial write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexerError::Store(err) if err.is_not_found())
    }
}

/// Result type for index maintenance.
pub type IndexerResult<T> = Result<T, IndexerError>;
