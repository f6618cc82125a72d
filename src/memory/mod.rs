//! In-process reference backend.
//!
//! [`MemoryPool`] is a bounded pool implementing
//! [`ConnectionSource`](crate::connection::ConnectionSource). Its connections
//! buffer writes until commit, support named marks, and record every
//! physical operation in a shared [`Journal`]. Faults can be injected per
//! operation to exercise error paths.
//!
//! # Usage
//!
//! ```
//! use serde_json::json;
//! use txscope::memory::MemoryPool;
//! use txscope::transaction::{ContextStack, TransactionDefinition, TransactionManager};
//!
//! let pool = MemoryPool::new(4);
//! let manager = TransactionManager::new(pool.clone());
//! let mut stack = ContextStack::new();
//!
//! let status = manager.begin(&mut stack, &TransactionDefinition::required()).unwrap();
//! status.context().with_connection(|c| c.put("user:1", json!("Alice"))).unwrap();
//! manager.commit(&mut stack, &status).unwrap();
//!
//! assert_eq!(pool.committed("user:1"), Some(json!("Alice")));
//! assert_eq!(pool.journal().commits(), 1);
//! ```

mod connection;
mod journal;
mod pool;

pub use connection::MemoryConnection;
pub use journal::{Event, Journal, JournalEntry};
pub use pool::{Fault, MemoryPool};
