//! Transaction isolation levels.
//!
//! `Default` leaves the connection's own level untouched; every other
//! variant is applied to the connection when a physical transaction opens.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Whatever the connection is already configured with.
    Default,

    /// Dirty reads allowed.
    ReadUncommitted,

    /// Each read sees the latest committed data.
    ///
    /// Different reads within the same transaction might see different
    /// data if another transaction commits in between.
    #[default]
    ReadCommitted,

    /// All reads see a consistent snapshot from transaction start.
    RepeatableRead,

    /// Transactions behave as if executed one after another.
    Serializable,
}

impl Isolation {
    /// Check if this level needs to be pushed to the connection.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Isolation::Default)
    }

    /// Get a human-readable description of this isolation level.
    pub fn description(&self) -> &'static str {
        match self {
            Isolation::Default => "Use the connection's configured isolation level",
            Isolation::ReadUncommitted => "Reads may see uncommitted data of other transactions",
            Isolation::ReadCommitted => "Each read sees the latest committed data",
            Isolation::RepeatableRead => {
                "All reads see a consistent snapshot from transaction start"
            }
            Isolation::Serializable => "Transactions are fully serialized",
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolation::Default => write!(f, "DEFAULT"),
            Isolation::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            Isolation::ReadCommitted => write!(f, "READ COMMITTED"),
            Isolation::RepeatableRead => write!(f, "REPEATABLE READ"),
            Isolation::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

/// Parse isolation level from string (SQL syntax).
impl std::str::FromStr for Isolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEFAULT" => Ok(Isolation::Default),
            "READ UNCOMMITTED" | "READ_UNCOMMITTED" | "READUNCOMMITTED" => {
                Ok(Isolation::ReadUncommitted)
            }
            "READ COMMITTED" | "READ_COMMITTED" | "READCOMMITTED" => Ok(Isolation::ReadCommitted),
            "REPEATABLE READ" | "REPEATABLE_READ" | "REPEATABLEREAD" | "SNAPSHOT" => {
                Ok(Isolation::RepeatableRead)
            }
            "SERIALIZABLE" => Ok(Isolation::Serializable),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_isolation() {
        assert_eq!(Isolation::default(), Isolation::ReadCommitted);
    }

    #[test]
    fn test_is_explicit() {
        assert!(!Isolation::Default.is_explicit());
        assert!(Isolation::Serializable.is_explicit());
    }

    #[test]
    fn test_parse_isolation() {
        assert_eq!(
            "READ COMMITTED".parse::<Isolation>().unwrap(),
            Isolation::ReadCommitted
        );
        assert_eq!(
            "repeatable_read".parse::<Isolation>().unwrap(),
            Isolation::RepeatableRead
        );
        assert_eq!("snapshot".parse::<Isolation>().unwrap(), Isolation::RepeatableRead);
        assert!("chaos".parse::<Isolation>().is_err());
    }
}
