//! Transaction propagation.
//!
//! This module decides, for each requested scope, whether work joins the
//! current transaction, runs in an independent one while the current one is
//! suspended, or runs behind a rollback mark inside the current one.
//! Scopes live on a per-call-chain [`ContextStack`]; only the scope that
//! opened a physical transaction commits, rolls back or releases it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (Propagation dispatch, connection lifecycle, bookkeeping)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Definition  │       │ ContextStack│       │ Connection  │
//!  │ (+ rules)   │       │  (Context)  │       │   Source    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use txscope::memory::MemoryPool;
//! use txscope::transaction::{ContextStack, TransactionDefinition, TransactionManager};
//!
//! let manager = TransactionManager::new(MemoryPool::new(4));
//! let mut stack = ContextStack::new();
//!
//! let outer = manager.begin(&mut stack, &TransactionDefinition::required())?;
//! let inner = manager.begin(&mut stack, &TransactionDefinition::nested())?;
//! assert_eq!(stack.depth(), 2);
//!
//! // Undo the inner work only.
//! manager.rollback(&mut stack, &inner)?;
//! manager.commit(&mut stack, &outer)?;
//! assert_eq!(stack.depth(), 0);
//! # Ok::<(), txscope::transaction::TransactionError>(())
//! ```

mod context;
mod definition;
mod error;
mod isolation;
mod manager;
mod rules;
mod stack;
mod status;
mod template;

pub use context::TransactionContext;
pub use definition::{Propagation, TransactionDefinition};
pub use error::{TransactionError, TransactionResult};
pub use isolation::Isolation;
pub use manager::{ManagerConfig, ManagerStats, NestedFallback, TransactionInfo, TransactionManager};
pub use rules::{Classify, ErrorKind, FailureClass, RollbackRule};
pub use stack::{Chain, ContextStack};
pub use status::{Participation, TransactionStatus};
