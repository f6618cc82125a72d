//! Connection error types.

use thiserror::Error;

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors reported by a connection source or a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Every connection the source may hand out is in use.
    #[error("connection source exhausted: all {max} connections are in use")]
    Exhausted { max: usize },

    /// The connection has already been released.
    #[error("connection is closed")]
    Closed,

    /// A write was attempted on a read-only connection.
    #[error("connection is read-only")]
    ReadOnly,

    /// Rollback to a mark that does not exist on this connection.
    #[error("unknown mark: {0}")]
    UnknownMark(String),

    /// A driver-level operation failed.
    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
}

impl ConnectionError {
    /// Create an operation failure.
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            message: message.into(),
        }
    }

    /// Check if waiting and trying again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectionError::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transient() {
        assert!(ConnectionError::Exhausted { max: 4 }.is_transient());
        assert!(!ConnectionError::Closed.is_transient());
        assert!(!ConnectionError::operation("commit", "boom").is_transient());
    }

    #[test]
    fn test_operation_display() {
        let err = ConnectionError::operation("commit", "disk full");
        assert_eq!(err.to_string(), "commit failed: disk full");
    }
}
