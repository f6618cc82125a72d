//! Transaction context: the record of one active or suspended scope.
//!
//! A context is a shared handle. The stack, the status returned to the
//! caller and any joined participants all point at the same record, so a
//! participant can poison the transaction its owner will later commit.
//!
//! The connection is held in a shared slot. A root context fills the slot
//! and empties it again on release; a nested context borrows the slot of
//! the context it nested under, so both see the same physical transaction.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ulid::Ulid;

use crate::connection::{ConnectionError, ConnectionResult, Mark};
use crate::transaction::definition::TransactionDefinition;

type ConnectionSlot<C> = Arc<Mutex<Option<C>>>;

/// Handle to one transaction scope.
pub struct TransactionContext<C> {
    inner: Arc<ContextInner<C>>,
}

struct ContextInner<C> {
    id: String,
    connection: ConnectionSlot<C>,
    definition: Arc<TransactionDefinition>,
    is_new_transaction: bool,
    started_at: DateTime<Utc>,
    started: Instant,
    mark: Option<Mark>,
    state: Mutex<ContextState<C>>,
}

struct ContextState<C> {
    rollback_only: bool,
    completed: bool,
    active: bool,
    /// The context this one displaced on the stack.
    previous: Option<TransactionContext<C>>,
}

impl<C> Clone for TransactionContext<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> TransactionContext<C> {
    /// Context that opened its own physical transaction on `connection`.
    pub(crate) fn root(connection: C, definition: Arc<TransactionDefinition>) -> Self {
        Self::build(
            Arc::new(Mutex::new(Some(connection))),
            definition,
            true,
            None,
            Instant::now(),
        )
    }

    /// Context running behind `mark` on the connection of `parent`.
    pub(crate) fn nested(parent: &Self, definition: Arc<TransactionDefinition>, mark: Mark) -> Self {
        Self::build(
            Arc::clone(&parent.inner.connection),
            definition,
            false,
            Some(mark),
            Instant::now(),
        )
    }

    fn build(
        connection: ConnectionSlot<C>,
        definition: Arc<TransactionDefinition>,
        is_new_transaction: bool,
        mark: Option<Mark>,
        started: Instant,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: Ulid::new().to_string().to_lowercase(),
                connection,
                definition,
                is_new_transaction,
                started_at: Utc::now(),
                started,
                mark,
                state: Mutex::new(ContextState {
                    rollback_only: false,
                    completed: false,
                    active: true,
                    previous: None,
                }),
            }),
        }
    }

    /// Unique id of this scope.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.inner.definition
    }

    /// True only for the scope that opened the physical transaction.
    pub fn is_new_transaction(&self) -> bool {
        self.inner.is_new_transaction
    }

    /// Wall-clock time the scope began.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Check if the scope has outlived its timeout.
    ///
    /// Advisory only: nothing aborts an expired scope.
    pub fn is_expired(&self) -> bool {
        match self.inner.definition.timeout() {
            Some(timeout) => self.elapsed() > timeout,
            None => false,
        }
    }

    pub fn is_nested(&self) -> bool {
        self.inner.mark.is_some()
    }

    pub fn nested_mark_name(&self) -> Option<&str> {
        self.inner.mark.as_ref().map(Mark::name)
    }

    pub(crate) fn mark(&self) -> Option<&Mark> {
        self.inner.mark.as_ref()
    }

    pub fn is_rollback_only(&self) -> bool {
        self.inner.state.lock().rollback_only
    }

    /// Poison the transaction so its owner rolls back instead of committing.
    pub fn set_rollback_only(&self) {
        self.inner.state.lock().rollback_only = true;
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.inner.state.lock().active = active;
    }

    pub(crate) fn mark_completed(&self) {
        let mut state = self.inner.state.lock();
        state.completed = true;
        state.active = false;
    }

    /// The context this one displaced, if any.
    pub fn previous(&self) -> Option<TransactionContext<C>> {
        self.inner.state.lock().previous.clone()
    }

    pub(crate) fn link_previous(&self, previous: Option<TransactionContext<C>>) {
        self.inner.state.lock().previous = previous;
    }

    pub(crate) fn take_previous(&self) -> Option<TransactionContext<C>> {
        self.inner.state.lock().previous.take()
    }

    /// Check if both handles refer to the same scope.
    pub fn is_same(&self, other: &TransactionContext<C>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check if both scopes run on the same physical connection.
    pub fn shares_connection_with(&self, other: &TransactionContext<C>) -> bool {
        Arc::ptr_eq(&self.inner.connection, &other.inner.connection)
    }

    /// Run `f` against the connection, failing if it was already released.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut C) -> ConnectionResult<R>,
    ) -> ConnectionResult<R> {
        let mut slot = self.inner.connection.lock();
        match slot.as_mut() {
            Some(connection) => f(connection),
            None => Err(ConnectionError::Closed),
        }
    }

    /// Remove the connection from its slot for release.
    pub(crate) fn take_connection(&self) -> Option<C> {
        self.inner.connection.lock().take()
    }

    #[cfg(test)]
    pub(crate) fn root_started_at(
        connection: C,
        definition: Arc<TransactionDefinition>,
        started: Instant,
    ) -> Self {
        Self::build(
            Arc::new(Mutex::new(Some(connection))),
            definition,
            true,
            None,
            started,
        )
    }
}

impl<C> fmt::Display for TransactionContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        write!(
            f,
            "TransactionContext{{id={}, propagation={}, new_transaction={}, rollback_only={}, \
             completed={}, active={}, elapsed={}ms, nested={}}}",
            self.inner.id,
            self.inner.definition.propagation(),
            self.inner.is_new_transaction,
            state.rollback_only,
            state.completed,
            state.active,
            self.elapsed().as_millis(),
            self.inner.mark.is_some(),
        )
    }
}

impl<C> fmt::Debug for TransactionContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TransactionContext")
            .field("id", &self.inner.id)
            .field("is_new_transaction", &self.inner.is_new_transaction)
            .field("mark", &self.inner.mark)
            .field("rollback_only", &state.rollback_only)
            .field("completed", &state.completed)
            .field("active", &state.active)
            .field("has_previous", &state.previous.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(timeout_seconds: i64) -> Arc<TransactionDefinition> {
        Arc::new(TransactionDefinition::required().with_timeout_seconds(timeout_seconds))
    }

    #[test]
    fn test_root_context_flags() {
        let ctx = TransactionContext::root(7u32, definition(30));
        assert!(ctx.is_new_transaction());
        assert!(ctx.is_active());
        assert!(!ctx.is_completed());
        assert!(!ctx.is_rollback_only());
        assert!(!ctx.is_nested());
        assert!(ctx.previous().is_none());
    }

    #[test]
    fn test_nested_shares_connection() {
        let parent = TransactionContext::root(7u32, definition(30));
        let child = TransactionContext::nested(&parent, definition(30), Mark::new("SAVEPOINT_a"));

        assert!(!child.is_new_transaction());
        assert!(child.is_nested());
        assert_eq!(child.nested_mark_name(), Some("SAVEPOINT_a"));
        assert!(child.shares_connection_with(&parent));
        assert!(!child.is_same(&parent));

        child.with_connection(|c| {
            *c += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(parent.with_connection(|c| Ok(*c)).unwrap(), 8);
    }

    #[test]
    fn test_take_connection_closes_slot() {
        let ctx = TransactionContext::root(1u32, definition(30));
        assert_eq!(ctx.take_connection(), Some(1));
        assert!(matches!(
            ctx.with_connection(|c| Ok(*c)),
            Err(ConnectionError::Closed)
        ));
    }

    #[test]
    fn test_rollback_only_visible_through_clones() {
        let ctx = TransactionContext::root((), definition(30));
        let participant = ctx.clone();
        participant.set_rollback_only();
        assert!(ctx.is_rollback_only());
    }

    #[test]
    fn test_mark_completed_deactivates() {
        let ctx = TransactionContext::root((), definition(30));
        ctx.mark_completed();
        assert!(ctx.is_completed());
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_expiry() {
        let long_ago = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap();

        let expired = TransactionContext::root_started_at((), definition(2), long_ago);
        assert!(expired.is_expired());

        let unbounded = TransactionContext::root_started_at((), definition(0), long_ago);
        assert!(!unbounded.is_expired());

        let fresh = TransactionContext::root((), definition(30));
        assert!(!fresh.is_expired());
    }
}
