//! Error types for settlement

use ledger_core::ErrorKind;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error(transparent)]
    Ledger(#[from] ledger_core::Error),

    /// Pool engine error
    #[error(transparent)]
    Pool(#[from] pool_engine::Error),

    /// Referenced order or position absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed or unfillable request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ledger(e) => e.kind(),
            Error::Pool(e) => e.kind(),
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_pass_through() {
        let pool: Error = pool_engine::Error::NotFound("BOND-USD".into()).into();
        assert_eq!(pool.kind(), ErrorKind::NotFound);
        let ledger: Error = ledger_core::Error::InvalidData("x".into()).into();
        assert_eq!(ledger.kind(), ErrorKind::InvalidData);
        assert_eq!(Error::Internal("arena".into()).kind(), ErrorKind::Internal);
    }
}
