//! Error types for the pool engine

use ledger_core::{ErrorKind, TransactionError};
use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pool engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger or store failure
    #[error(transparent)]
    Ledger(#[from] ledger_core::Error),

    /// Pool absent
    #[error("Pool not found: {0}")]
    NotFound(String),

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed persisted pool
    #[error("Invalid pool data: {0}")]
    InvalidData(String),

    /// Reserves cannot cover the request
    #[error("Insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    /// Output below the caller's limit
    #[error("Slippage: expected at least {minimum}, got {actual}")]
    Slippage {
        /// Minimum acceptable output
        minimum: u64,
        /// Output the pool would give
        actual: u64,
    },

    /// Curve arithmetic overflowed or left its domain
    #[error("Curve arithmetic: {0}")]
    Math(String),
}

impl Error {
    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ledger(e) => e.kind(),
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_)
            | Error::InsufficientLiquidity(_)
            | Error::Slippage { .. }
            | Error::Math(_) => ErrorKind::InvalidInput,
            Error::InvalidData(_) => ErrorKind::InvalidData,
        }
    }
}

impl TransactionError for Error {
    fn is_conflict(&self) -> bool {
        matches!(self, Error::Ledger(e) if e.is_retryable())
    }
}
