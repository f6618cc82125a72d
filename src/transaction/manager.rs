//! Transaction manager - applies propagation rules and owns connection lifecycle.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Propagation dispatch (join, suspend-and-start, nest behind a mark)
//! - Acquiring, configuring and releasing connections
//! - Physical commit, rollback and partial rollback
//! - Keeping the caller's [`ContextStack`] balanced on every exit path
//!
//! The manager itself holds no per-call-chain state and can be cloned and
//! shared freely. Each call chain brings its own stack.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::connection::{Connection, ConnectionSource};
use crate::transaction::context::TransactionContext;
use crate::transaction::definition::{Propagation, TransactionDefinition};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::Isolation;
use crate::transaction::stack::ContextStack;
use crate::transaction::status::{Participation, TransactionStatus};

type Conn<S> = <S as ConnectionSource>::Connection;

/// What `Nested` does when there is no transaction to nest under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedFallback {
    /// Start a fresh physical transaction.
    #[default]
    CreateNew,
    /// Fail with [`TransactionError::NoExistingTransaction`].
    Reject,
}

/// Manager configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Prefix of generated mark names.
    pub mark_prefix: String,
    /// Behavior of `Nested` without an active transaction.
    pub nested_fallback: NestedFallback,
    /// Log a warning when a scope completes after its timeout.
    pub warn_on_expired: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mark_prefix: "SAVEPOINT_".to_string(),
            nested_fallback: NestedFallback::CreateNew,
            warn_on_expired: true,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mark name prefix.
    pub fn mark_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mark_prefix = prefix.into();
        self
    }

    /// Set the nested fallback behavior.
    pub fn nested_fallback(mut self, fallback: NestedFallback) -> Self {
        self.nested_fallback = fallback;
        self
    }

    /// Set warn_on_expired flag.
    pub fn warn_on_expired(mut self, value: bool) -> Self {
        self.warn_on_expired = value;
        self
    }
}

/// Metadata of a physical transaction currently open.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub tx_id: String,
    pub propagation: Propagation,
    pub isolation: Isolation,
    pub read_only: bool,
    pub started_at: DateTime<Utc>,
}

/// Running totals kept by a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Physical transactions opened.
    pub begun: u64,
    pub committed: u64,
    /// Full physical rollbacks, including rollback-only commits.
    pub rolled_back: u64,
    /// Scopes that joined an existing transaction.
    pub joined: u64,
    /// Scopes nested behind a mark.
    pub nested: u64,
    pub partial_rollbacks: u64,
    /// Rollbacks of joined participants turned into rollback-only markings.
    pub poisoned: u64,
    pub suspended: u64,
    pub resumed: u64,
    /// Scopes completed after their timeout.
    pub expired: u64,
}

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
pub struct TransactionManager<S: ConnectionSource> {
    inner: Arc<ManagerInner<S>>,
}

struct ManagerInner<S: ConnectionSource> {
    /// Where connections come from.
    source: S,
    config: ManagerConfig,
    /// Open physical transactions tracked by ID.
    active: RwLock<HashMap<String, TransactionInfo>>,
    stats: Mutex<ManagerStats>,
}

impl<S: ConnectionSource> Clone for TransactionManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ConnectionSource> TransactionManager<S> {
    /// Create a new transaction manager over the given connection source.
    pub fn new(source: S) -> Self {
        Self::with_config(source, ManagerConfig::default())
    }

    /// Create a new transaction manager with custom configuration.
    pub fn with_config(source: S, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                source,
                config,
                active: RwLock::new(HashMap::new()),
                stats: Mutex::new(ManagerStats::default()),
            }),
        }
    }

    /// Get a reference to the underlying connection source.
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Get the number of open physical transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all open physical transactions.
    pub fn active_transactions(&self) -> Vec<TransactionInfo> {
        self.inner.active.read().values().cloned().collect()
    }

    /// Check if a physical transaction is open.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    pub fn stats(&self) -> ManagerStats {
        *self.inner.stats.lock()
    }

    fn record(&self, f: impl FnOnce(&mut ManagerStats)) {
        f(&mut *self.inner.stats.lock());
    }

    // ==================== Begin ====================

    /// Begin a scope described by `definition` on `stack`.
    ///
    /// On error the stack is left exactly as it was.
    pub fn begin(
        &self,
        stack: &mut ContextStack<Conn<S>>,
        definition: &TransactionDefinition,
    ) -> TransactionResult<TransactionStatus<Conn<S>>> {
        let definition = Arc::new(definition.clone());
        let current = stack.current().filter(|ctx| ctx.is_active()).cloned();

        debug!(
            propagation = %definition.propagation(),
            depth = stack.depth(),
            has_current = current.is_some(),
            "begin requested"
        );

        match definition.propagation() {
            Propagation::Required => match current {
                Some(ctx) => Ok(self.join(ctx)),
                None => self.start_new(stack, definition),
            },
            Propagation::RequiresNew => self.start_independent(stack, definition),
            Propagation::Nested => match current {
                Some(parent) => self.start_nested(stack, &parent, definition),
                None => match self.inner.config.nested_fallback {
                    NestedFallback::CreateNew => {
                        debug!("no transaction to nest under, starting a new one");
                        self.start_new(stack, definition)
                    }
                    NestedFallback::Reject => Err(TransactionError::NoExistingTransaction),
                },
            },
        }
    }

    fn join(&self, ctx: TransactionContext<Conn<S>>) -> TransactionStatus<Conn<S>> {
        self.record(|s| s.joined += 1);
        debug!(tx_id = ctx.id(), "joined existing transaction");
        TransactionStatus::new(ctx, Participation::Joined)
    }

    fn start_new(
        &self,
        stack: &mut ContextStack<Conn<S>>,
        definition: Arc<TransactionDefinition>,
    ) -> TransactionResult<TransactionStatus<Conn<S>>> {
        let ctx = self.open(definition)?;
        stack.push(ctx.clone());
        Ok(TransactionStatus::new(ctx, Participation::NewTransaction))
    }

    fn start_independent(
        &self,
        stack: &mut ContextStack<Conn<S>>,
        definition: Arc<TransactionDefinition>,
    ) -> TransactionResult<TransactionStatus<Conn<S>>> {
        let suspended = stack.suspend();
        if let Some(ctx) = &suspended {
            self.record(|s| s.suspended += 1);
            debug!(tx_id = ctx.id(), "suspended current transaction");
        }

        match self.open(definition) {
            Ok(ctx) => {
                stack.push_over_suspended(ctx.clone(), suspended);
                Ok(TransactionStatus::new(ctx, Participation::NewTransaction))
            }
            Err(err) => {
                if let Some(ctx) = suspended {
                    debug!(tx_id = ctx.id(), "resuming suspended transaction after failed begin");
                    stack.resume(ctx);
                }
                Err(err)
            }
        }
    }

    fn start_nested(
        &self,
        stack: &mut ContextStack<Conn<S>>,
        parent: &TransactionContext<Conn<S>>,
        definition: Arc<TransactionDefinition>,
    ) -> TransactionResult<TransactionStatus<Conn<S>>> {
        let name = format!(
            "{}{}",
            self.inner.config.mark_prefix,
            Ulid::new().to_string().to_lowercase()
        );
        let mark = parent
            .with_connection(|conn| conn.create_mark(&name))
            .map_err(TransactionError::Mark)?;

        let ctx = TransactionContext::nested(parent, definition, mark);
        stack.push(ctx.clone());
        self.record(|s| s.nested += 1);
        debug!(
            tx_id = ctx.id(),
            parent = parent.id(),
            mark = %name,
            depth = stack.depth(),
            "created nested scope"
        );
        Ok(TransactionStatus::new(ctx, Participation::Nested))
    }

    /// Acquire and configure a connection for a new physical transaction.
    fn open(
        &self,
        definition: Arc<TransactionDefinition>,
    ) -> TransactionResult<TransactionContext<Conn<S>>> {
        let mut connection = self
            .inner
            .source
            .acquire()
            .map_err(TransactionError::Acquire)?;

        if let Err(source) = configure(&mut connection, &definition) {
            restore(&mut connection, &definition, "-");
            if let Err(err) = self.inner.source.release(connection) {
                error!(error = %err, "failed to release connection after configuration failure");
            }
            return Err(TransactionError::Configure(source));
        }

        let ctx = TransactionContext::root(connection, Arc::clone(&definition));
        self.inner.active.write().insert(
            ctx.id().to_string(),
            TransactionInfo {
                tx_id: ctx.id().to_string(),
                propagation: definition.propagation(),
                isolation: definition.isolation(),
                read_only: definition.is_read_only(),
                started_at: ctx.started_at(),
            },
        );
        self.record(|s| s.begun += 1);
        info!(
            tx_id = ctx.id(),
            propagation = %definition.propagation(),
            isolation = %definition.isolation(),
            read_only = definition.is_read_only(),
            "started new transaction"
        );
        Ok(ctx)
    }

    // ==================== Commit / Rollback ====================

    /// Complete a scope successfully.
    ///
    /// Only the owner of the physical transaction commits it. A joined
    /// participant's commit does nothing; a nested scope's commit leaves its
    /// work in the enclosing transaction. An owner marked rollback-only is
    /// rolled back and [`TransactionError::UnexpectedRollback`] is returned.
    pub fn commit(
        &self,
        stack: &mut ContextStack<Conn<S>>,
        status: &TransactionStatus<Conn<S>>,
    ) -> TransactionResult<()> {
        let ctx = status.context();
        ensure_not_completed(status)?;

        let outcome = match status.participation() {
            Participation::Joined => {
                status.mark_completed();
                debug!(tx_id = ctx.id(), "participant commit deferred to owning scope");
                return Ok(());
            }
            Participation::NewTransaction => {
                ensure_current(stack, ctx)?;
                self.check_deadline(ctx);
                self.commit_physical(ctx)
            }
            Participation::Nested => {
                ensure_current(stack, ctx)?;
                self.check_deadline(ctx);
                self.complete_nested(ctx)
            }
        };

        self.cleanup(stack, status);
        outcome
    }

    /// Complete a scope unsuccessfully.
    ///
    /// The owner rolls back the physical transaction, a nested scope rolls
    /// back to its mark, and a joined participant marks the shared scope
    /// rollback-only for its owner to act on.
    pub fn rollback(
        &self,
        stack: &mut ContextStack<Conn<S>>,
        status: &TransactionStatus<Conn<S>>,
    ) -> TransactionResult<()> {
        let ctx = status.context();
        ensure_not_completed(status)?;

        let outcome = match status.participation() {
            Participation::Joined => {
                status.mark_completed();
                ctx.set_rollback_only();
                self.record(|s| s.poisoned += 1);
                debug!(tx_id = ctx.id(), "participant rollback, transaction marked rollback-only");
                return Ok(());
            }
            Participation::NewTransaction => {
                ensure_current(stack, ctx)?;
                self.rollback_physical(ctx)
            }
            Participation::Nested => {
                ensure_current(stack, ctx)?;
                self.rollback_to_mark(ctx)
            }
        };

        self.cleanup(stack, status);
        outcome
    }

    fn commit_physical(&self, ctx: &TransactionContext<Conn<S>>) -> TransactionResult<()> {
        if ctx.is_rollback_only() {
            warn!(tx_id = ctx.id(), "transaction marked rollback-only, rolling back instead of committing");
            self.rollback_physical(ctx)?;
            return Err(TransactionError::UnexpectedRollback {
                tx_id: ctx.id().to_string(),
            });
        }

        ctx.with_connection(|conn| conn.commit())
            .map_err(|source| TransactionError::Commit {
                tx_id: ctx.id().to_string(),
                source,
            })?;
        self.record(|s| s.committed += 1);
        info!(tx_id = ctx.id(), elapsed_ms = ctx.elapsed().as_millis() as u64, "committed transaction");
        Ok(())
    }

    fn rollback_physical(&self, ctx: &TransactionContext<Conn<S>>) -> TransactionResult<()> {
        ctx.with_connection(|conn| conn.rollback())
            .map_err(|source| TransactionError::Rollback {
                tx_id: ctx.id().to_string(),
                source,
            })?;
        self.record(|s| s.rolled_back += 1);
        info!(tx_id = ctx.id(), elapsed_ms = ctx.elapsed().as_millis() as u64, "rolled back transaction");
        Ok(())
    }

    fn complete_nested(&self, ctx: &TransactionContext<Conn<S>>) -> TransactionResult<()> {
        if ctx.is_rollback_only() {
            warn!(tx_id = ctx.id(), "nested scope marked rollback-only, rolling back to its mark");
            self.rollback_to_mark(ctx)?;
            return Err(TransactionError::UnexpectedRollback {
                tx_id: ctx.id().to_string(),
            });
        }
        debug!(tx_id = ctx.id(), "nested scope completed, work stays in enclosing transaction");
        Ok(())
    }

    fn rollback_to_mark(&self, ctx: &TransactionContext<Conn<S>>) -> TransactionResult<()> {
        let Some(mark) = ctx.mark() else {
            return Ok(());
        };
        ctx.with_connection(|conn| conn.rollback_to_mark(mark))
            .map_err(|source| TransactionError::Rollback {
                tx_id: ctx.id().to_string(),
                source,
            })?;
        self.record(|s| s.partial_rollbacks += 1);
        info!(tx_id = ctx.id(), mark = %mark, "rolled back to mark");
        Ok(())
    }

    fn check_deadline(&self, ctx: &TransactionContext<Conn<S>>) {
        if !ctx.is_expired() {
            return;
        }
        self.record(|s| s.expired += 1);
        if self.inner.config.warn_on_expired {
            warn!(
                tx_id = ctx.id(),
                elapsed_ms = ctx.elapsed().as_millis() as u64,
                timeout_seconds = ctx.definition().timeout_seconds(),
                "transaction completed after its timeout"
            );
        }
    }

    /// Finish a scope: flag it, hand back an owned connection, pop the stack.
    ///
    /// Runs after the connection-level operation whether it succeeded or not.
    /// Failures here are logged and never replace the primary outcome.
    fn cleanup(&self, stack: &mut ContextStack<Conn<S>>, status: &TransactionStatus<Conn<S>>) {
        let ctx = status.context();
        status.mark_completed();
        ctx.mark_completed();

        if ctx.is_new_transaction() {
            if let Some(mut connection) = ctx.take_connection() {
                restore(&mut connection, ctx.definition(), ctx.id());
                if let Err(err) = self.inner.source.release(connection) {
                    error!(tx_id = ctx.id(), error = %err, "failed to release connection");
                }
            }
            self.inner.active.write().remove(ctx.id());
        }

        let resumes_suspended = ctx.previous().is_some_and(|prev| !prev.is_active());
        stack.pop();

        if let Some(current) = stack.current() {
            if resumes_suspended {
                self.record(|s| s.resumed += 1);
                debug!(tx_id = current.id(), "resumed suspended transaction");
            }
        }
        debug!(tx_id = ctx.id(), depth = stack.depth(), "scope cleaned up");
    }
}

fn ensure_not_completed<C>(status: &TransactionStatus<C>) -> TransactionResult<()> {
    if status.is_completed() {
        return Err(TransactionError::AlreadyCompleted {
            tx_id: status.context().id().to_string(),
        });
    }
    Ok(())
}

fn ensure_current<C>(stack: &ContextStack<C>, ctx: &TransactionContext<C>) -> TransactionResult<()> {
    match stack.current() {
        Some(top) if top.is_same(ctx) => Ok(()),
        top => Err(TransactionError::NotCurrent {
            tx_id: ctx.id().to_string(),
            current: top.map_or_else(|| "none".to_string(), |t| t.id().to_string()),
        }),
    }
}

/// Prepare a fresh connection for a physical transaction.
fn configure<C: Connection>(
    connection: &mut C,
    definition: &TransactionDefinition,
) -> crate::connection::ConnectionResult<()> {
    connection.set_autocommit(false)?;
    if definition.isolation().is_explicit() {
        connection.set_isolation(definition.isolation())?;
    }
    if definition.is_read_only() {
        connection.set_read_only(true)?;
    }
    Ok(())
}

/// Undo `configure` before the connection goes back to its source.
fn restore<C: Connection>(connection: &mut C, definition: &TransactionDefinition, tx_id: &str) {
    if let Err(err) = connection.set_autocommit(true) {
        error!(tx_id, error = %err, "failed to re-enable autocommit");
    }
    if definition.is_read_only() {
        if let Err(err) = connection.set_read_only(false) {
            error!(tx_id, error = %err, "failed to clear read-only flag");
        }
    }
}

impl<S: ConnectionSource> std::fmt::Debug for TransactionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("config", &self.inner.config)
            .finish()
    }
}
