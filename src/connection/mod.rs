//! Connection capabilities consumed by the transaction manager.
//!
//! The manager never talks to a driver directly. It needs two things from
//! its environment: somewhere to get an exclusive connection from, and a
//! small set of transaction primitives on that connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ acquire / release          │ begin / commit / mark
//!                 ▼                            ▼
//!        ┌──────────────────┐        ┌──────────────────┐
//!        │ ConnectionSource │ ─────▶ │    Connection    │
//!        └──────────────────┘        └──────────────────┘
//! ```

mod error;

use std::fmt;

use crate::transaction::Isolation;

pub use error::{ConnectionError, ConnectionResult};

/// A named rollback point created inside a physical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mark {
    name: String,
}

impl Mark {
    /// Create a mark handle for the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The name the mark was created with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Transaction primitives the manager issues on a connection.
///
/// Implementations map these onto whatever the driver offers (`SAVEPOINT`,
/// `SET TRANSACTION ISOLATION LEVEL`, ...). None of the calls may be
/// interleaved with unrelated work on the same connection.
pub trait Connection {
    /// Switch per-statement commit mode on or off.
    fn set_autocommit(&mut self, enabled: bool) -> ConnectionResult<()>;

    /// Apply an isolation level to the next physical transaction.
    fn set_isolation(&mut self, isolation: Isolation) -> ConnectionResult<()>;

    /// Toggle the read-only hint.
    fn set_read_only(&mut self, read_only: bool) -> ConnectionResult<()>;

    /// Commit the physical transaction.
    fn commit(&mut self) -> ConnectionResult<()>;

    /// Roll back the whole physical transaction.
    fn rollback(&mut self) -> ConnectionResult<()>;

    /// Create a named rollback point.
    fn create_mark(&mut self, name: &str) -> ConnectionResult<Mark>;

    /// Undo everything done after `mark`, keeping the transaction open.
    fn rollback_to_mark(&mut self, mark: &Mark) -> ConnectionResult<()>;
}

/// Hands out exclusive connections and takes them back.
pub trait ConnectionSource {
    /// The connection type this source produces.
    type Connection: Connection;

    /// Get a connection for exclusive use.
    fn acquire(&self) -> ConnectionResult<Self::Connection>;

    /// Give a connection back once its owning transaction has completed.
    fn release(&self, connection: Self::Connection) -> ConnectionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_name() {
        let mark = Mark::new("SAVEPOINT_1");
        assert_eq!(mark.name(), "SAVEPOINT_1");
        assert_eq!(mark.to_string(), "SAVEPOINT_1");
    }
}
