//! Transaction error types.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::transaction::rules::{Classify, ErrorKind};

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur while beginning or completing a scope.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// No connection could be obtained. Nothing was pushed.
    #[error("failed to acquire connection: {0}")]
    Acquire(#[source] ConnectionError),

    /// The fresh connection rejected autocommit, isolation or read-only
    /// settings. The connection was handed back and nothing was pushed.
    #[error("failed to configure connection: {0}")]
    Configure(#[source] ConnectionError),

    /// The rollback mark for a nested scope could not be created.
    #[error("failed to create nested mark: {0}")]
    Mark(#[source] ConnectionError),

    /// Physical commit failed.
    #[error("commit of transaction {tx_id} failed: {source}")]
    Commit {
        tx_id: String,
        #[source]
        source: ConnectionError,
    },

    /// Physical or partial rollback failed.
    #[error("rollback of transaction {tx_id} failed: {source}")]
    Rollback {
        tx_id: String,
        #[source]
        source: ConnectionError,
    },

    /// Commit was requested but the scope had been marked rollback-only,
    /// so it was rolled back instead.
    #[error("transaction {tx_id} was marked rollback-only and has been rolled back")]
    UnexpectedRollback { tx_id: String },

    /// The scope is not the top of the stack it is being completed on.
    #[error("transaction {tx_id} is not the current scope (current: {current})")]
    NotCurrent { tx_id: String, current: String },

    /// The scope has already been committed or rolled back.
    #[error("transaction {tx_id} is already completed")]
    AlreadyCompleted { tx_id: String },

    /// Nested propagation was requested without an active transaction and
    /// the manager is configured to reject that.
    #[error("nested propagation requires an existing active transaction")]
    NoExistingTransaction,
}

impl TransactionError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Acquire(source) => source.is_transient(),
            _ => false,
        }
    }

    /// Check if this error means the caller broke begin/complete pairing.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            TransactionError::NotCurrent { .. } | TransactionError::AlreadyCompleted { .. }
        )
    }

    fn kind_path(&self) -> &'static str {
        match self {
            TransactionError::Acquire(_) => "transaction.acquire",
            TransactionError::Configure(_) => "transaction.configure",
            TransactionError::Mark(_) => "transaction.mark",
            TransactionError::Commit { .. } => "transaction.commit",
            TransactionError::Rollback { .. } => "transaction.rollback",
            TransactionError::UnexpectedRollback { .. } => "transaction.unexpected_rollback",
            TransactionError::NotCurrent { .. } => "transaction.usage.not_current",
            TransactionError::AlreadyCompleted { .. } => "transaction.usage.already_completed",
            TransactionError::NoExistingTransaction => "transaction.usage.no_existing",
        }
    }
}

impl Classify for TransactionError {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::unchecked(self.kind_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let exhausted = TransactionError::Acquire(ConnectionError::Exhausted { max: 2 });
        assert!(exhausted.is_retryable());

        let configure = TransactionError::Configure(ConnectionError::Closed);
        assert!(!configure.is_retryable());
    }

    #[test]
    fn test_usage_errors() {
        let not_current = TransactionError::NotCurrent {
            tx_id: "tx1".to_string(),
            current: "tx2".to_string(),
        };
        assert!(not_current.is_usage_error());
        assert!(!TransactionError::NoExistingTransaction.is_retryable());
    }

    #[test]
    fn test_transaction_errors_are_unchecked() {
        let err = TransactionError::UnexpectedRollback {
            tx_id: "tx1".to_string(),
        };
        let kind = err.error_kind();
        assert_eq!(kind.path(), "transaction.unexpected_rollback");
        assert!(kind.is_a("transaction"));
        assert!(kind.class().rolls_back_by_default());
    }
}
