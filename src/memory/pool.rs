//! Bounded connection pool over a shared in-memory store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::connection::MemoryConnection;
use super::journal::{Event, Journal};
use crate::connection::{ConnectionError, ConnectionResult, ConnectionSource};

/// Operation that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Acquire,
    Release,
    Autocommit,
    Isolation,
    ReadOnly,
    Commit,
    Rollback,
    CreateMark,
    RollbackToMark,
}

impl Fault {
    pub(crate) fn operation(&self) -> &'static str {
        match self {
            Fault::Acquire => "acquire",
            Fault::Release => "release",
            Fault::Autocommit => "set_autocommit",
            Fault::Isolation => "set_isolation",
            Fault::ReadOnly => "set_read_only",
            Fault::Commit => "commit",
            Fault::Rollback => "rollback",
            Fault::CreateMark => "create_mark",
            Fault::RollbackToMark => "rollback_to_mark",
        }
    }
}

pub(crate) struct PoolInner {
    pub(crate) store: RwLock<BTreeMap<String, Value>>,
    pub(crate) journal: Journal,
    available: Mutex<VecDeque<usize>>,
    max_connections: usize,
    created: Mutex<usize>,
    faults: Mutex<Vec<Fault>>,
}

impl PoolInner {
    /// Consume a pending fault for `fault`, if one was injected.
    pub(crate) fn trip(&self, fault: Fault) -> ConnectionResult<()> {
        let mut faults = self.faults.lock();
        match faults.iter().position(|f| *f == fault) {
            Some(index) => {
                faults.remove(index);
                Err(ConnectionError::operation(fault.operation(), "injected failure"))
            }
            None => Ok(()),
        }
    }

    pub(crate) fn give_back(&self, id: usize) {
        self.available.lock().push_back(id);
    }
}

/// Connection pool for the in-memory store.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Create a pool that hands out at most `max_connections` at once.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store: RwLock::new(BTreeMap::new()),
                journal: Journal::new(),
                available: Mutex::new(VecDeque::new()),
                max_connections,
                created: Mutex::new(0),
                faults: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> ConnectionResult<MemoryConnection> {
        // Try to get an available connection.
        {
            let mut available = self.inner.available.lock();
            if let Some(id) = available.pop_front() {
                return Ok(MemoryConnection::new(id, self.inner.clone()));
            }
        }

        // Create a new connection if under limit.
        {
            let mut created = self.inner.created.lock();
            if *created < self.inner.max_connections {
                *created += 1;
                let id = *created;
                return Ok(MemoryConnection::new(id, self.inner.clone()));
            }
        }

        Err(ConnectionError::Exhausted {
            max: self.inner.max_connections,
        })
    }

    /// Make the next call of the given operation fail.
    pub fn fail_next(&self, fault: Fault) {
        self.inner.faults.lock().push(fault);
    }

    pub fn journal(&self) -> Journal {
        self.inner.journal.clone()
    }

    /// Read a committed value.
    pub fn committed(&self, key: &str) -> Option<Value> {
        self.inner.store.read().get(key).cloned()
    }

    /// Number of committed keys.
    pub fn committed_len(&self) -> usize {
        self.inner.store.read().len()
    }

    /// Get the number of available connections.
    pub fn available(&self) -> usize {
        self.inner.available.lock().len()
    }

    /// Get the total number of connections created.
    pub fn created(&self) -> usize {
        *self.inner.created.lock()
    }

    /// Connections currently handed out.
    pub fn in_use(&self) -> usize {
        self.created() - self.available()
    }
}

impl ConnectionSource for MemoryPool {
    type Connection = MemoryConnection;

    fn acquire(&self) -> ConnectionResult<MemoryConnection> {
        self.inner.trip(Fault::Acquire)?;
        let connection = self.get()?;
        self.inner.journal.record(connection.id(), Event::Acquired);
        Ok(connection)
    }

    fn release(&self, mut connection: MemoryConnection) -> ConnectionResult<()> {
        let discarded = connection.reset();
        if discarded > 0 {
            tracing::warn!(
                connection = connection.id(),
                discarded,
                "released connection with uncommitted writes"
            );
        }
        self.inner.journal.record(connection.id(), Event::Released);
        // Dropping returns the slot even if the release itself reports a failure.
        self.inner.trip(Fault::Release)
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("created", &self.created())
            .field("available", &self.available())
            .field("max_connections", &self.inner.max_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;

    #[test]
    fn test_connection_pool() {
        let pool = MemoryPool::new(5);
        let mut conn = pool.acquire().unwrap();
        conn.put("a", Value::from(1)).unwrap();

        assert_eq!(pool.created(), 1);
        assert_eq!(pool.committed("a"), Some(Value::from(1)));
    }

    #[test]
    fn test_pool_reuse() {
        let pool = MemoryPool::new(5);

        {
            let _conn1 = pool.get().unwrap();
            let _conn2 = pool.get().unwrap();
            assert_eq!(pool.created(), 2);
        }

        // Connections returned to pool.
        assert_eq!(pool.available(), 2);

        // Reuse existing connection.
        let _conn3 = pool.get().unwrap();
        assert_eq!(pool.created(), 2); // No new connection created.
    }

    #[test]
    fn test_pool_exhausted() {
        let pool = MemoryPool::new(1);
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, ConnectionError::Exhausted { max: 1 }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_release_discards_pending_writes() {
        let pool = MemoryPool::new(2);
        let mut conn = pool.acquire().unwrap();
        conn.set_autocommit(false).unwrap();
        conn.put("a", Value::from(1)).unwrap();
        pool.release(conn).unwrap();

        assert_eq!(pool.committed("a"), None);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.journal().releases(), 1);
    }

    #[test]
    fn test_injected_fault_fires_once() {
        let pool = MemoryPool::new(2);
        pool.fail_next(Fault::Acquire);
        assert!(pool.acquire().is_err());
        assert!(pool.acquire().is_ok());
    }
}
