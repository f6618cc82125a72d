//! Propagation analyzer.
//!
//! Records snapshots of a [`ContextStack`] at chosen points of a call chain
//! and turns them into a report, or checks them against the shape a given
//! propagation is expected to produce.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::transaction::{ContextStack, Propagation};

const RULE: &str = "====================================================================================================";

/// State of a stack at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub thread_name: String,
    pub thread_id: String,
    pub depth: usize,
    pub has_active_transaction: bool,
    /// The current scope runs behind a rollback mark.
    pub nested: bool,
    pub details: String,
    pub location: String,
}

impl TransactionSnapshot {
    fn capture<C>(stack: &ContextStack<C>, location: &str) -> Self {
        let current = thread::current();
        Self {
            timestamp: Utc::now(),
            thread_name: current.name().unwrap_or("unnamed").to_string(),
            thread_id: format!("{:?}", current.id()),
            depth: stack.depth(),
            has_active_transaction: stack.has_current_transaction(),
            nested: stack.current().is_some_and(|ctx| ctx.is_nested()),
            details: stack.debug_info(),
            location: location.to_string(),
        }
    }
}

impl fmt::Display for TransactionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] Thread[{}:{}] Stack[{}] Active[{}]",
            self.location, self.thread_id, self.thread_name, self.depth, self.has_active_transaction
        )
    }
}

/// Outcome of [`PropagationAnalyzer::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternCheck {
    pub propagation: Propagation,
    pub passed: bool,
    pub max_depth: usize,
    pub message: String,
}

impl fmt::Display for PatternCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "{} {}: {}", verdict, self.propagation, self.message)
    }
}

/// Collects snapshots and analyzes them.
#[derive(Debug, Default)]
pub struct PropagationAnalyzer {
    snapshots: Mutex<Vec<TransactionSnapshot>>,
}

impl PropagationAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the state of `stack` under `location`.
    pub fn capture<C>(&self, stack: &ContextStack<C>, location: &str) -> TransactionSnapshot {
        let snapshot = TransactionSnapshot::capture(stack, location);
        info!(%snapshot, "captured snapshot");
        self.snapshots.lock().push(snapshot.clone());
        snapshot
    }

    pub fn snapshots(&self) -> Vec<TransactionSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }

    pub fn clear(&self) {
        self.snapshots.lock().clear();
        info!("cleared snapshots");
    }

    /// Deepest stack seen.
    pub fn max_depth(&self) -> usize {
        self.snapshots.lock().iter().map(|s| s.depth).max().unwrap_or(0)
    }

    /// True if every snapshot came from the same thread.
    pub fn is_single_threaded(&self) -> bool {
        let snapshots = self.snapshots.lock();
        let threads: BTreeSet<&str> = snapshots.iter().map(|s| s.thread_id.as_str()).collect();
        threads.len() <= 1
    }

    /// Check the recorded snapshots against the shape `propagation` produces.
    ///
    /// `Required` never goes deeper than one level while a transaction is
    /// active. `RequiresNew` must reach depth two. `Nested` must reach depth
    /// two with a nested scope on top.
    pub fn validate(&self, propagation: Propagation) -> PatternCheck {
        let snapshots = self.snapshots.lock();
        let max_depth = snapshots.iter().map(|s| s.depth).max().unwrap_or(0);

        let (passed, message) = match propagation {
            Propagation::Required => {
                let flat = snapshots
                    .iter()
                    .filter(|s| s.has_active_transaction)
                    .all(|s| s.depth <= 1);
                if flat {
                    (true, "all work ran at the same level".to_string())
                } else {
                    (false, format!("unexpected stack depth {}", max_depth))
                }
            }
            Propagation::RequiresNew => {
                if max_depth > 1 {
                    (true, format!("new transaction level created (max depth {})", max_depth))
                } else {
                    (false, "no new transaction level was created".to_string())
                }
            }
            Propagation::Nested => {
                let marked = snapshots.iter().any(|s| s.nested);
                if max_depth > 1 && marked {
                    (true, format!("nested level created (max depth {})", max_depth))
                } else if max_depth > 1 {
                    (false, "new level created without a rollback mark".to_string())
                } else {
                    (false, "no nested level was created".to_string())
                }
            }
        };

        let check = PatternCheck {
            propagation,
            passed,
            max_depth,
            message,
        };
        if check.passed {
            info!(%check, "pattern validated");
        } else {
            warn!(%check, "pattern validation failed");
        }
        check
    }

    /// Render statistics, thread usage, depth changes and a timeline.
    pub fn report(&self) -> String {
        let snapshots = self.snapshots.lock();
        let mut out = String::new();

        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "Transaction propagation report");
        let _ = writeln!(out, "{}", RULE);

        if snapshots.is_empty() {
            let _ = writeln!(out, "No snapshots to analyze.");
            return out;
        }

        let base = snapshots[0].timestamp;
        let total_ms = snapshots[snapshots.len() - 1]
            .timestamp
            .signed_duration_since(base)
            .num_milliseconds();
        let max_depth = snapshots.iter().map(|s| s.depth).max().unwrap_or(0);
        let active = snapshots.iter().filter(|s| s.has_active_transaction).count();

        let _ = writeln!(out, "\n[1. Statistics]");
        let _ = writeln!(out, "Snapshots: {}", snapshots.len());
        let _ = writeln!(out, "Elapsed: {}ms", total_ms);
        let _ = writeln!(out, "Max stack depth: {}", max_depth);
        let _ = writeln!(out, "Snapshots with active transaction: {}/{}", active, snapshots.len());

        let _ = writeln!(out, "\n[2. Threads]");
        let mut seen = BTreeSet::new();
        for s in snapshots.iter() {
            if seen.insert(s.thread_id.as_str()) {
                let _ = writeln!(out, "Thread[{}:{}]", s.thread_id, s.thread_name);
            }
        }
        if seen.len() == 1 {
            let _ = writeln!(out, "All scopes ran on a single thread");
        } else {
            let _ = writeln!(out, "Scopes ran on {} threads", seen.len());
        }

        let _ = writeln!(out, "\n[3. Stack depth changes]");
        for (i, s) in snapshots.iter().enumerate() {
            let change = match i.checked_sub(1).map(|p| snapshots[p].depth) {
                None => "",
                Some(prev) if s.depth > prev => " (up: scope started)",
                Some(prev) if s.depth < prev => " (down: scope ended)",
                Some(_) => " (same level)",
            };
            let _ = writeln!(out, "{}. [{}] depth {}{}", i + 1, s.location, s.depth, change);
        }

        let _ = writeln!(out, "\n[4. Timeline]");
        for (i, s) in snapshots.iter().enumerate() {
            let offset = s.timestamp.signed_duration_since(base).num_milliseconds();
            let _ = writeln!(out, "\n#{}: +{}ms", i + 1, offset);
            let _ = writeln!(out, "  location: {}", s.location);
            let _ = writeln!(out, "  thread: {}[{}]", s.thread_name, s.thread_id);
            let _ = writeln!(out, "  depth: {}", s.depth);
            let _ = writeln!(out, "  active: {}", s.has_active_transaction);
            if s.has_active_transaction {
                for line in s.details.lines() {
                    let _ = writeln!(out, "    {}", line);
                }
            }
        }

        let _ = writeln!(out, "{}", RULE);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPool;
    use crate::transaction::{TransactionDefinition, TransactionManager};

    #[test]
    fn test_required_pattern() {
        let manager = TransactionManager::new(MemoryPool::new(2));
        let mut stack = ContextStack::new();
        let analyzer = PropagationAnalyzer::new();

        analyzer.capture(&stack, "start");
        let outer = manager.begin(&mut stack, &TransactionDefinition::required()).unwrap();
        analyzer.capture(&stack, "outer");
        let inner = manager.begin(&mut stack, &TransactionDefinition::required()).unwrap();
        analyzer.capture(&stack, "inner");
        manager.commit(&mut stack, &inner).unwrap();
        manager.commit(&mut stack, &outer).unwrap();
        analyzer.capture(&stack, "end");

        assert_eq!(analyzer.len(), 4);
        assert_eq!(analyzer.max_depth(), 1);
        assert!(analyzer.is_single_threaded());
        assert!(analyzer.validate(Propagation::Required).passed);
        assert!(!analyzer.validate(Propagation::RequiresNew).passed);
    }

    #[test]
    fn test_nested_pattern_needs_mark() {
        let manager = TransactionManager::new(MemoryPool::new(2));
        let mut stack = ContextStack::new();
        let analyzer = PropagationAnalyzer::new();

        let outer = manager.begin(&mut stack, &TransactionDefinition::required()).unwrap();
        let independent = manager
            .begin(&mut stack, &TransactionDefinition::requires_new())
            .unwrap();
        analyzer.capture(&stack, "independent");
        assert!(analyzer.validate(Propagation::RequiresNew).passed);
        assert!(!analyzer.validate(Propagation::Nested).passed);

        let nested = manager.begin(&mut stack, &TransactionDefinition::nested()).unwrap();
        let snapshot = analyzer.capture(&stack, "nested");
        assert!(snapshot.nested);
        assert_eq!(snapshot.depth, 3);
        assert!(analyzer.validate(Propagation::Nested).passed);
        assert!(!analyzer.validate(Propagation::Required).passed);

        manager.rollback(&mut stack, &nested).unwrap();
        manager.commit(&mut stack, &independent).unwrap();
        manager.commit(&mut stack, &outer).unwrap();
    }

    #[test]
    fn test_report_sections() {
        let manager = TransactionManager::new(MemoryPool::new(2));
        let mut stack = ContextStack::new();
        let analyzer = PropagationAnalyzer::new();

        let status = manager.begin(&mut stack, &TransactionDefinition::required()).unwrap();
        analyzer.capture(&stack, "inside");
        manager.commit(&mut stack, &status).unwrap();
        analyzer.capture(&stack, "after");

        let report = analyzer.report();
        assert!(report.contains("[1. Statistics]"));
        assert!(report.contains("Snapshots with active transaction: 1/2"));
        assert!(report.contains("2. [after] depth 0 (down: scope ended)"));
        assert!(report.contains("Level 1:"));
    }

    #[test]
    fn test_empty_report_and_clear() {
        let analyzer = PropagationAnalyzer::new();
        assert!(analyzer.report().contains("No snapshots to analyze."));

        let stack = ContextStack::<()>::new();
        analyzer.capture(&stack, "x");
        assert!(!analyzer.is_empty());
        analyzer.clear();
        assert!(analyzer.is_empty());
    }
}
