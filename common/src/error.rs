//! Error types for durabletx operations.

use crate::{ActionStatus, Uid};
use thiserror::Error;

/// Main error type for durabletx operations.
#[derive(Error, Debug)]
pub enum TxError {
    /// The storage medium failed.
    #[error("Object store I/O error on {path}: {source}")]
    StoreIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Persisted state could not be decoded.
    #[error("Corrupt object state: {0}")]
    CorruptState(String),

    /// An equivalent record is already enlisted and refused the new one.
    #[error("Duplicate participant {record} in transaction {tx}")]
    DuplicateParticipant { tx: Uid, record: Uid },

    /// The record cannot be enlisted in this transaction.
    #[error("Invalid participant for transaction {tx}: {reason}")]
    InvalidParticipant { tx: Uid, reason: String },

    /// Operation not permitted in the current status.
    #[error("Operation {operation} not permitted on transaction {tx} in status {status:?}")]
    WrongState {
        tx: Uid,
        status: ActionStatus,
        operation: &'static str,
    },

    /// The caller does not own the transaction.
    #[error("Transaction {tx} is not owned by the calling context: {reason}")]
    WrongTransaction { tx: Uid, reason: String },

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uid),

    /// A lock request conflicted with another owner.
    #[error("Lock on object {object} refused, held by {holder}")]
    LockRefused { object: Uid, holder: Uid },

    /// The coordinator is not accepting new work.
    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal coordinator error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TxError {
    /// Build a store I/O error for the given path.
    pub fn store_io(path: impl Into<String>, source: std::io::Error) -> Self {
        TxError::StoreIo {
            path: path.into(),
            source,
        }
    }

    /// Build a corrupt state error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        TxError::CorruptState(message.into())
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxError::StoreIo { .. } | TxError::LockRefused { .. } | TxError::Unavailable(_)
        )
    }

    /// Get error code for operator tooling.
    pub fn error_code(&self) -> &'static str {
        match self {
            TxError::StoreIo { .. } => "STORE_IO",
            TxError::CorruptState(_) => "CORRUPT_STATE",
            TxError::DuplicateParticipant { .. } => "DUPLICATE_PARTICIPANT",
            TxError::InvalidParticipant { .. } => "INVALID_PARTICIPANT",
            TxError::WrongState { .. } => "WRONG_STATE",
            TxError::WrongTransaction { .. } => "WRONG_TRANSACTION",
            TxError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            TxError::LockRefused { .. } => "LOCK_REFUSED",
            TxError::Unavailable(_) => "UNAVAILABLE",
            TxError::Configuration(_) => "CONFIGURATION_ERROR",
            TxError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for durabletx operations.
pub type Result<T> = std::result::Result<T, TxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = TxError::TransactionNotFound(Uid::nil());
        assert_eq!(err.error_code(), "TRANSACTION_NOT_FOUND");
        assert!(!err.is_retryable());

        let err = TxError::store_io(
            "/tmp/store",
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
        );
        assert_eq!(err.error_code(), "STORE_IO");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("disk gone"));
    }
}
