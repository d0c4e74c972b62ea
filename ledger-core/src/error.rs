//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-checkable error category
///
/// Callers branch on the kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced asset, order, pool or record is absent
    NotFound,
    /// Malformed request (mismatched assets, zero amount, insufficient funds)
    InvalidInput,
    /// Malformed persisted or serialized data
    InvalidData,
    /// Programmer invariant violation or store failure
    Internal,
    /// Caller exceeded a rate limit
    RateLimit,
    /// Caller is not allowed to perform the operation
    AccessDenied,
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced entity absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Balance too small for the requested transition
    #[error("Insufficient {asset}: required {required}, available {available}")]
    InsufficientBalance {
        /// Asset being debited
        asset: String,
        /// Quantity requested
        required: i128,
        /// Quantity present
        available: i128,
    },

    /// Checked arithmetic overflowed or went negative
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Malformed persisted data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Watched key changed before commit
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimit(String),

    /// Access denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_)
            | Error::InsufficientBalance { .. }
            | Error::Overflow(_) => ErrorKind::InvalidInput,
            Error::InvalidData(_) | Error::Serialization(_) => ErrorKind::InvalidData,
            Error::RateLimit(_) => ErrorKind::RateLimit,
            Error::AccessDenied(_) => ErrorKind::AccessDenied,
            Error::Conflict(_)
            | Error::Storage(_)
            | Error::Internal(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the transaction wrapper may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub(crate) fn insufficient(asset: &str, required: impl Into<i128>, available: impl Into<i128>) -> Self {
        Error::InsufficientBalance {
            asset: asset.to_string(),
            required: required.into(),
            available: available.into(),
        }
    }
}

#[cfg(feature = "rocks")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain => {
                Error::Conflict(err.to_string())
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}
