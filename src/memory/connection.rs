//! A single in-memory connection.

use std::sync::Arc;

use serde_json::Value;

use super::journal::Event;
use super::pool::{Fault, PoolInner};
use crate::connection::{Connection, ConnectionError, ConnectionResult, Mark};
use crate::transaction::Isolation;

#[derive(Debug, Clone)]
enum Write {
    Put(String, Value),
    Delete(String),
}

impl Write {
    fn key(&self) -> &str {
        match self {
            Write::Put(key, _) | Write::Delete(key) => key,
        }
    }
}

/// A connection from a [`MemoryPool`](super::MemoryPool).
///
/// In autocommit mode writes hit the shared store immediately. Otherwise
/// they are buffered until `commit`, and marks remember the buffer length
/// at the time they were created. Writes still buffered when the connection
/// is released are discarded.
pub struct MemoryConnection {
    id: usize,
    pool: Arc<PoolInner>,
    autocommit: bool,
    read_only: bool,
    isolation: Isolation,
    pending: Vec<Write>,
    marks: Vec<(Mark, usize)>,
}

impl MemoryConnection {
    pub(crate) fn new(id: usize, pool: Arc<PoolInner>) -> Self {
        Self {
            id,
            pool,
            autocommit: true,
            read_only: false,
            isolation: Isolation::Default,
            pending: Vec::new(),
            marks: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Writes buffered in the open transaction.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Insert or replace a value.
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> ConnectionResult<()> {
        self.write(Write::Put(key.into(), value))
    }

    /// Remove a value.
    pub fn delete(&mut self, key: impl Into<String>) -> ConnectionResult<()> {
        self.write(Write::Delete(key.into()))
    }

    /// Read a value, seeing this connection's own uncommitted writes.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(write) = self.pending.iter().rev().find(|w| w.key() == key) {
            return match write {
                Write::Put(_, value) => Some(value.clone()),
                Write::Delete(_) => None,
            };
        }
        self.pool.store.read().get(key).cloned()
    }

    fn write(&mut self, write: Write) -> ConnectionResult<()> {
        if self.read_only {
            return Err(ConnectionError::ReadOnly);
        }
        self.pool.journal.record(
            self.id,
            Event::Write {
                key: write.key().to_string(),
            },
        );
        if self.autocommit {
            self.apply(std::slice::from_ref(&write));
        } else {
            self.pending.push(write);
        }
        Ok(())
    }

    fn apply(&self, writes: &[Write]) {
        let mut store = self.pool.store.write();
        for write in writes {
            match write {
                Write::Put(key, value) => {
                    store.insert(key.clone(), value.clone());
                }
                Write::Delete(key) => {
                    store.remove(key);
                }
            }
        }
    }

    /// Return to pristine state, discarding any open transaction.
    pub(crate) fn reset(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        self.marks.clear();
        self.autocommit = true;
        self.read_only = false;
        self.isolation = Isolation::Default;
        discarded
    }
}

impl Connection for MemoryConnection {
    fn set_autocommit(&mut self, enabled: bool) -> ConnectionResult<()> {
        self.pool.trip(Fault::Autocommit)?;
        self.autocommit = enabled;
        self.pool.journal.record(self.id, Event::Autocommit { enabled });
        Ok(())
    }

    fn set_isolation(&mut self, isolation: Isolation) -> ConnectionResult<()> {
        self.pool.trip(Fault::Isolation)?;
        self.isolation = isolation;
        self.pool
            .journal
            .record(self.id, Event::Isolation { level: isolation });
        Ok(())
    }

    fn set_read_only(&mut self, read_only: bool) -> ConnectionResult<()> {
        self.pool.trip(Fault::ReadOnly)?;
        self.read_only = read_only;
        self.pool
            .journal
            .record(self.id, Event::ReadOnly { enabled: read_only });
        Ok(())
    }

    fn commit(&mut self) -> ConnectionResult<()> {
        self.pool.trip(Fault::Commit)?;
        let writes = std::mem::take(&mut self.pending);
        self.apply(&writes);
        self.marks.clear();
        self.pool.journal.record(
            self.id,
            Event::Commit {
                writes: writes.len(),
            },
        );
        Ok(())
    }

    fn rollback(&mut self) -> ConnectionResult<()> {
        self.pool.trip(Fault::Rollback)?;
        let discarded = self.pending.len();
        self.pending.clear();
        self.marks.clear();
        self.pool.journal.record(self.id, Event::Rollback { discarded });
        Ok(())
    }

    fn create_mark(&mut self, name: &str) -> ConnectionResult<Mark> {
        self.pool.trip(Fault::CreateMark)?;
        let mark = Mark::new(name);
        self.marks.push((mark.clone(), self.pending.len()));
        self.pool.journal.record(
            self.id,
            Event::Mark {
                name: name.to_string(),
            },
        );
        Ok(mark)
    }

    fn rollback_to_mark(&mut self, mark: &Mark) -> ConnectionResult<()> {
        self.pool.trip(Fault::RollbackToMark)?;
        let position = self
            .marks
            .iter()
            .rposition(|(m, _)| m == mark)
            .ok_or_else(|| ConnectionError::UnknownMark(mark.name().to_string()))?;

        let buffer_index = self.marks[position].1;
        let discarded = self.pending.len().saturating_sub(buffer_index);
        self.pending.truncate(buffer_index);
        // Marks created after this one are gone; this one stays usable.
        self.marks.truncate(position + 1);

        self.pool.journal.record(
            self.id,
            Event::RollbackToMark {
                name: mark.name().to_string(),
                discarded,
            },
        );
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        // Return connection to pool.
        self.pool.give_back(self.id);
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("autocommit", &self.autocommit)
            .field("read_only", &self.read_only)
            .field("isolation", &self.isolation)
            .field("pending", &self.pending.len())
            .field("marks", &self.marks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSource;
    use crate::memory::MemoryPool;
    use serde_json::json;

    fn transactional(pool: &MemoryPool) -> MemoryConnection {
        let mut conn = pool.acquire().unwrap();
        conn.set_autocommit(false).unwrap();
        conn
    }

    #[test]
    fn test_buffered_until_commit() {
        let pool = MemoryPool::new(2);
        let mut conn = transactional(&pool);

        conn.put("a", json!(1)).unwrap();
        assert_eq!(conn.get("a"), Some(json!(1)));
        assert_eq!(pool.committed("a"), None);

        conn.commit().unwrap();
        assert_eq!(pool.committed("a"), Some(json!(1)));
        assert_eq!(conn.pending_writes(), 0);
    }

    #[test]
    fn test_rollback_discards() {
        let pool = MemoryPool::new(2);
        let mut conn = transactional(&pool);
        conn.put("a", json!(1)).unwrap();
        conn.delete("a").unwrap();
        assert_eq!(conn.get("a"), None);

        conn.rollback().unwrap();
        assert_eq!(conn.pending_writes(), 0);
        assert_eq!(pool.journal().rollbacks(), 1);
    }

    #[test]
    fn test_rollback_to_mark_keeps_earlier_writes() {
        let pool = MemoryPool::new(2);
        let mut conn = transactional(&pool);

        conn.put("before", json!(1)).unwrap();
        let outer = conn.create_mark("SAVEPOINT_outer").unwrap();
        conn.put("middle", json!(2)).unwrap();
        let inner = conn.create_mark("SAVEPOINT_inner").unwrap();
        conn.put("after", json!(3)).unwrap();

        conn.rollback_to_mark(&outer).unwrap();
        assert_eq!(conn.pending_writes(), 1);
        assert!(matches!(
            conn.rollback_to_mark(&inner),
            Err(ConnectionError::UnknownMark(_))
        ));

        // The mark itself survives a rollback to it.
        conn.put("again", json!(4)).unwrap();
        conn.rollback_to_mark(&outer).unwrap();
        assert_eq!(conn.pending_writes(), 1);

        conn.commit().unwrap();
        assert_eq!(pool.committed("before"), Some(json!(1)));
        assert_eq!(pool.committed("middle"), None);
        assert_eq!(pool.journal().partial_rollbacks(), 2);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let pool = MemoryPool::new(2);
        let mut conn = transactional(&pool);
        conn.set_read_only(true).unwrap();
        assert!(matches!(conn.put("a", json!(1)), Err(ConnectionError::ReadOnly)));
    }

    #[test]
    fn test_enabling_autocommit_leaves_open_work_uncommitted() {
        let pool = MemoryPool::new(2);
        let mut conn = transactional(&pool);
        conn.put("a", json!(1)).unwrap();
        conn.set_autocommit(true).unwrap();
        assert_eq!(pool.committed("a"), None);

        pool.release(conn).unwrap();
        assert_eq!(pool.committed("a"), None);
    }

    #[test]
    fn test_injected_commit_failure_keeps_writes_pending() {
        let pool = MemoryPool::new(2);
        let mut conn = transactional(&pool);
        conn.put("a", json!(1)).unwrap();

        pool.fail_next(Fault::Commit);
        assert!(conn.commit().is_err());
        assert_eq!(conn.pending_writes(), 1);
        assert_eq!(pool.committed("a"), None);
    }
}
