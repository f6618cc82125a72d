//! Per-call-chain transaction stack.
//!
//! The stack exposes exactly one current context. Deeper levels hang off
//! the `previous` links of that context, so `depth()` walks the chain.
//!
//! One stack belongs to one logical call chain (a thread, or a task). It is
//! passed explicitly to the manager and must never be shared between call
//! chains that can interleave.

use std::fmt::Write as _;

use crate::transaction::context::TransactionContext;

/// Stack of transaction scopes for one call chain.
pub struct ContextStack<C> {
    current: Option<TransactionContext<C>>,
}

impl<C> Default for ContextStack<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ContextStack<C> {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// The current scope, if any.
    pub fn current(&self) -> Option<&TransactionContext<C>> {
        self.current.as_ref()
    }

    /// Alias of [`ContextStack::current`].
    pub fn peek(&self) -> Option<&TransactionContext<C>> {
        self.current()
    }

    /// Number of chained scopes, suspended ones included.
    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Check if there is a current scope that is still active.
    pub fn has_current_transaction(&self) -> bool {
        self.current.as_ref().is_some_and(|ctx| ctx.is_active())
    }

    /// Iterate from the current scope outwards.
    pub fn iter(&self) -> Chain<C> {
        Chain {
            next: self.current.clone(),
        }
    }

    /// Install `context` on top, linking it to the scope it displaces.
    pub(crate) fn push(&mut self, context: TransactionContext<C>) {
        context.link_previous(self.current.take());
        self.current = Some(context);
    }

    /// Install `context` on top of a scope taken off by [`ContextStack::suspend`].
    pub(crate) fn push_over_suspended(
        &mut self,
        context: TransactionContext<C>,
        suspended: Option<TransactionContext<C>>,
    ) {
        debug_assert!(self.current.is_none(), "push over a suspended scope with a live top");
        context.link_previous(suspended);
        self.current = Some(context);
    }

    /// Remove the current scope and reinstate the one it displaced.
    ///
    /// The reinstated scope is active again, which is how a scope suspended
    /// by `RequiresNew` resumes.
    pub(crate) fn pop(&mut self) -> Option<TransactionContext<C>> {
        let top = self.current.take()?;
        if let Some(previous) = top.take_previous() {
            self.resume(previous);
        }
        Some(top)
    }

    /// Take the current scope off the stack and deactivate it.
    pub(crate) fn suspend(&mut self) -> Option<TransactionContext<C>> {
        let suspended = self.current.take()?;
        suspended.set_active(false);
        Some(suspended)
    }

    /// Make a suspended scope current and active again.
    pub(crate) fn resume(&mut self, context: TransactionContext<C>) {
        debug_assert!(self.current.is_none(), "resume over a live top");
        context.set_active(true);
        self.current = Some(context);
    }

    /// Drop every scope without completing it.
    ///
    /// Connections owned by dropped scopes are not released to their source.
    /// Returns the depth that was discarded.
    pub fn clear(&mut self) -> usize {
        let depth = self.depth();
        if depth > 0 {
            tracing::warn!(depth, "clearing transaction stack with open scopes");
        }
        self.current = None;
        depth
    }

    /// Multi-line dump of the chain, current scope first.
    pub fn debug_info(&self) -> String {
        if self.current.is_none() {
            return "No active transaction".to_string();
        }

        let mut out = format!("Transaction stack (depth: {}):\n", self.depth());
        for (level, ctx) in self.iter().enumerate() {
            let _ = writeln!(out, "  Level {}: {}", level + 1, ctx);
        }
        out
    }
}

/// Iterator over a chain of scopes.
pub struct Chain<C> {
    next: Option<TransactionContext<C>>,
}

impl<C> Iterator for Chain<C> {
    type Item = TransactionContext<C>;

    fn next(&mut self) -> Option<Self::Item> {
        let ctx = self.next.take()?;
        self.next = ctx.previous();
        Some(ctx)
    }
}

impl<C> std::fmt::Debug for ContextStack<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStack")
            .field("depth", &self.depth())
            .field("current", &self.current)
            .finish()
    }
}
