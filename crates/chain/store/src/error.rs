//! Error types for chain store operations.

use alloy_primitives::B256;
use chainidx_primitives::BundleError;
use thiserror::Error;

/// Errors returned by the chain store.
///
/// Absence is reported through the `*NotFound` variants and [`StoreError::EmptyChain`];
/// use [`StoreError::is_not_found`] or [`StoreResultExt::optional`] to tell
/// absence apart from failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Block not found at height.
    #[error("block not found: {0}")]
    BlockNotFound(u64),

    /// Block hash not found.
    #[error("block hash not found: {0}")]
    BlockHashNotFound(B256),

    /// Transaction not found.
    #[error("transaction not found: {0}")]
    TransactionNotFound(B256),

    /// Receipt not found.
    #[error("receipt not found: {0}")]
    ReceiptNotFound(B256),

    /// A secondary index record is absent (e.g. contract not verified).
    #[error("{kind} not found: {key}")]
    RecordNotFound { kind: &'static str, key: String },

    /// No block has been fully indexed yet.
    #[error("chain store is empty")]
    EmptyChain,

    /// Malformed input, rejected before touching storage.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The durability layer failed; the operation left no partial write.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored bytes could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::BlockNotFound(_)
                | StoreError::BlockHashNotFound(_)
                | StoreError::TransactionNotFound(_)
                | StoreError::ReceiptNotFound(_)
                | StoreError::RecordNotFound { .. }
                | StoreError::EmptyChain
        )
    }

    pub(crate) fn record(kind: &'static str, key: impl ToString) -> Self {
        StoreError::RecordNotFound {
            kind,
            key: key.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::InvalidColumnType(..) => {
                StoreError::Deserialization(err.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<BundleError> for StoreError {
    fn from(err: BundleError) -> Self {
        StoreError::InvalidInput(err.to_string())
    }
}

/// Result type for chain store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Turns not-found errors into `Ok(None)`.
pub trait StoreResultExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
