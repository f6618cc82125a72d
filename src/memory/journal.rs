//! Shared log of physical operations.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::transaction::Isolation;

/// A physical operation performed on a memory connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Acquired,
    Released,
    Autocommit { enabled: bool },
    Isolation { level: Isolation },
    ReadOnly { enabled: bool },
    Write { key: String },
    Commit { writes: usize },
    Rollback { discarded: usize },
    Mark { name: String },
    RollbackToMark { name: String, discarded: usize },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Acquired => write!(f, "acquired"),
            Event::Released => write!(f, "released"),
            Event::Autocommit { enabled } => write!(f, "autocommit={}", enabled),
            Event::Isolation { level } => write!(f, "isolation={}", level),
            Event::ReadOnly { enabled } => write!(f, "read_only={}", enabled),
            Event::Write { key } => write!(f, "write {}", key),
            Event::Commit { writes } => write!(f, "COMMIT ({} writes)", writes),
            Event::Rollback { discarded } => write!(f, "ROLLBACK ({} writes discarded)", discarded),
            Event::Mark { name } => write!(f, "SAVEPOINT {}", name),
            Event::RollbackToMark { name, discarded } => {
                write!(f, "ROLLBACK TO {} ({} writes discarded)", name, discarded)
            }
        }
    }
}

/// One journal line.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub connection: usize,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[conn {}] {}", self.connection, self.event)
    }
}

/// Cloneable handle to the shared journal.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, connection: usize, event: Event) {
        self.entries.lock().push(JournalEntry {
            connection,
            at: Utc::now(),
            event,
        });
    }

    /// Copy of every entry recorded so far.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Events only, in order.
    pub fn events(&self) -> Vec<Event> {
        self.entries.lock().iter().map(|e| e.event.clone()).collect()
    }

    /// Count entries whose event satisfies `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.entries.lock().iter().filter(|e| pred(&e.event)).count()
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit { .. }))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback { .. }))
    }

    pub fn partial_rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::RollbackToMark { .. }))
    }

    pub fn marks(&self) -> usize {
        self.count(|e| matches!(e, Event::Mark { .. }))
    }

    pub fn acquisitions(&self) -> usize {
        self.count(|e| matches!(e, Event::Acquired))
    }

    pub fn releases(&self) -> usize {
        self.count(|e| matches!(e, Event::Released))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let journal = Journal::new();
        journal.record(1, Event::Acquired);
        journal.record(1, Event::Commit { writes: 2 });
        journal.record(1, Event::Released);

        assert_eq!(journal.len(), 3);
        assert_eq!(journal.acquisitions(), 1);
        assert_eq!(journal.commits(), 1);
        assert_eq!(journal.rollbacks(), 0);

        journal.clear();
        assert!(journal.is_empty());
    }

    #[test]
    fn test_entry_serializes_flat() {
        let journal = Journal::new();
        journal.record(3, Event::Mark { name: "SAVEPOINT_a".to_string() });
        let value = serde_json::to_value(&journal.entries()[0]).unwrap();
        assert_eq!(value["connection"], 3);
        assert_eq!(value["event"], "mark");
        assert_eq!(value["name"], "SAVEPOINT_a");
    }
}
