//! Status handle returned by `begin`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transaction::context::TransactionContext;

/// How the scope behind a status takes part in the physical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    /// Opened the physical transaction and owns its connection.
    NewTransaction,
    /// Runs behind a rollback mark inside an existing transaction.
    Nested,
    /// Joined an existing scope without a mark of its own.
    Joined,
}

/// Handle given to the caller of `begin` and handed back to `commit` or `rollback`.
pub struct TransactionStatus<C> {
    context: TransactionContext<C>,
    participation: Participation,
    /// Set by the first accepted terminal call on this handle.
    completed: AtomicBool,
}

impl<C> TransactionStatus<C> {
    pub(crate) fn new(context: TransactionContext<C>, participation: Participation) -> Self {
        Self {
            context,
            participation,
            completed: AtomicBool::new(false),
        }
    }

    /// True only if this call opened the physical transaction.
    pub fn is_new_transaction(&self) -> bool {
        self.participation == Participation::NewTransaction
    }

    pub fn participation(&self) -> Participation {
        self.participation
    }

    pub fn context(&self) -> &TransactionContext<C> {
        &self.context
    }

    pub fn is_rollback_only(&self) -> bool {
        self.context.is_rollback_only()
    }

    /// Poison the underlying scope without going through the manager.
    pub fn set_rollback_only(&self) {
        self.context.set_rollback_only();
    }

    /// Check if this handle, or the scope behind it, has been completed.
    ///
    /// A joined participant's handle completes on its own terminal call
    /// while the shared scope stays open for its owner.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire) || self.context.is_completed()
    }

    /// Flag this handle completed. Returns false if it already was.
    pub(crate) fn mark_completed(&self) -> bool {
        !self.completed.swap(true, Ordering::AcqRel)
    }

    pub fn is_expired(&self) -> bool {
        self.context.is_expired()
    }
}

impl<C> fmt::Display for TransactionStatus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransactionStatus{{new_transaction={}, participation={:?}, rollback_only={}, completed={}}}",
            self.is_new_transaction(),
            self.participation,
            self.is_rollback_only(),
            self.is_completed()
        )
    }
}

impl<C> fmt::Debug for TransactionStatus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("participation", &self.participation)
            .field("context", &self.context)
            .finish()
    }
}
