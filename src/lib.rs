//! txscope - declarative transaction propagation over a pluggable connection source.
//!
//! A [`TransactionManager`](transaction::TransactionManager) decides for every
//! requested scope whether work joins the current transaction, runs in an
//! independent one while the current one is suspended, or runs behind a
//! rollback mark. Scopes are tracked on a [`ContextStack`](transaction::ContextStack)
//! owned by the calling code.
//!
//! # Example
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
//! let outer = manager.begin(&mut stack, &TransactionDefinition::required()).unwrap();
//! outer.context().with_connection(|c| c.put("user:1", json!("Alice"))).unwrap();
//!
//! // Independent of `outer`: rolled back on its own.
//! let audit = manager.begin(&mut stack, &TransactionDefinition::requires_new()).unwrap();
//! audit.context().with_connection(|c| c.put("audit:1", json!("login"))).unwrap();
//! manager.rollback(&mut stack, &audit).unwrap();
//!
//! manager.commit(&mut stack, &outer).unwrap();
//! assert_eq!(pool.committed("user:1"), Some(json!("Alice")));
//! assert_eq!(pool.committed("audit:1"), None);
//! ```

pub mod analyzer;
pub mod connection;
pub mod memory;
pub mod transaction;
