//! Run a unit of work inside a scope.
//!
//! `execute` pairs `begin` with exactly one of `commit` or `rollback`, so the
//! stack stays balanced even when the work returns early or panics.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::connection::ConnectionSource;
use crate::transaction::definition::TransactionDefinition;
use crate::transaction::error::TransactionError;
use crate::transaction::manager::TransactionManager;
use crate::transaction::rules::Classify;
use crate::transaction::stack::ContextStack;
use crate::transaction::status::TransactionStatus;

type Conn<S> = <S as ConnectionSource>::Connection;

impl<S: ConnectionSource> TransactionManager<S> {
    /// Begin a scope, run `work` in it and complete the scope.
    ///
    /// - `Ok` commits; a commit failure is returned as `E`.
    /// - `Err(e)` rolls back when `definition.should_rollback_for` says so and
    ///   commits otherwise. Either way `e` is returned; a failure to complete
    ///   the scope is logged.
    /// - A panic rolls back and resumes unwinding.
    ///
    /// `work` receives the stack so that it can open inner scopes.
    pub fn execute<T, E, F>(
        &self,
        stack: &mut ContextStack<Conn<S>>,
        definition: &TransactionDefinition,
        work: F,
    ) -> Result<T, E>
    where
        E: Classify + From<TransactionError>,
        F: FnOnce(&mut ContextStack<Conn<S>>, &TransactionStatus<Conn<S>>) -> Result<T, E>,
    {
        let status = self.begin(stack, definition)?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *stack, &status)));

        match outcome {
            Ok(Ok(value)) => {
                self.commit(stack, &status)?;
                Ok(value)
            }
            Ok(Err(err)) => {
                let kind = err.error_kind();
                let completion = if definition.should_rollback_for(&kind) {
                    debug!(tx_id = status.context().id(), kind = %kind, "rolling back on error");
                    self.rollback(stack, &status)
                } else {
                    debug!(tx_id = status.context().id(), kind = %kind, "committing despite error");
                    self.commit(stack, &status)
                };
                if let Err(completion_err) = completion {
                    error!(
                        tx_id = status.context().id(),
                        error = %completion_err,
                        "failed to complete scope after error"
                    );
                }
                Err(err)
            }
            Err(payload) => {
                if let Err(rollback_err) = self.rollback(stack, &status) {
                    error!(
                        tx_id = status.context().id(),
                        error = %rollback_err,
                        "failed to roll back after panic"
                    );
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use thiserror::Error;

    use crate::connection::ConnectionError;
    use crate::memory::{MemoryConnection, MemoryPool};
    use crate::transaction::rules::ErrorKind;

    use super::*;

    #[derive(Debug, Error)]
    enum AppError {
        #[error("payment declined")]
        Declined,
        #[error("constraint violated")]
        Constraint,
        #[error(transparent)]
        Store(#[from] ConnectionError),
        #[error(transparent)]
        Transaction(#[from] TransactionError),
    }

    impl Classify for AppError {
        fn error_kind(&self) -> ErrorKind {
            match self {
                AppError::Declined => ErrorKind::checked("billing.declined"),
                AppError::Constraint => ErrorKind::unchecked("data.constraint"),
                AppError::Store(_) => ErrorKind::unchecked("data.store"),
                AppError::Transaction(err) => err.error_kind(),
            }
        }
    }

    fn setup() -> (MemoryPool, TransactionManager<MemoryPool>, ContextStack<MemoryConnection>) {
        let pool = MemoryPool::new(4);
        (pool.clone(), TransactionManager::new(pool), ContextStack::new())
    }

    #[test]
    fn test_execute_commits_on_success() {
        let (pool, manager, mut stack) = setup();

        let value = manager
            .execute(&mut stack, &TransactionDefinition::required(), |_, status| {
                status.context().with_connection(|c| c.put("a", json!(1)))?;
                Ok::<_, AppError>(42)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(pool.committed("a"), Some(json!(1)));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_unchecked_error_rolls_back() {
        let (pool, manager, mut stack) = setup();

        let result: Result<(), AppError> =
            manager.execute(&mut stack, &TransactionDefinition::required(), |_, status| {
                status.context().with_connection(|c| c.put("a", json!(1)))?;
                Err(AppError::Constraint)
            });

        assert!(matches!(result, Err(AppError::Constraint)));
        assert_eq!(pool.committed("a"), None);
        assert_eq!(pool.journal().rollbacks(), 1);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_checked_error_commits() {
        let (pool, manager, mut stack) = setup();

        let result: Result<(), AppError> =
            manager.execute(&mut stack, &TransactionDefinition::required(), |_, status| {
                status.context().with_connection(|c| c.put("a", json!(1)))?;
                Err(AppError::Declined)
            });

        assert!(matches!(result, Err(AppError::Declined)));
        assert_eq!(pool.committed("a"), Some(json!(1)));
        assert_eq!(pool.journal().commits(), 1);
    }

    #[test]
    fn test_rollback_rule_overrides_class() {
        let (pool, manager, mut stack) = setup();
        let definition = TransactionDefinition::required().rollback_for("billing");

        let result: Result<(), AppError> = manager.execute(&mut stack, &definition, |_, status| {
            status.context().with_connection(|c| c.put("a", json!(1)))?;
            Err(AppError::Declined)
        });

        assert!(result.is_err());
        assert_eq!(pool.committed("a"), None);
    }

    #[test]
    fn test_inner_requires_new_failure_keeps_outer_work() {
        let (pool, manager, mut stack) = setup();

        let result: Result<(), AppError> =
            manager.execute(&mut stack, &TransactionDefinition::required(), |stack, outer| {
                outer.context().with_connection(|c| c.put("order", json!("placed")))?;

                let inner: Result<(), AppError> = manager.execute(
                    stack,
                    &TransactionDefinition::requires_new(),
                    |_, status| {
                        status.context().with_connection(|c| c.put("audit", json!(1)))?;
                        Err(AppError::Constraint)
                    },
                );
                assert!(inner.is_err());
                assert!(stack.current().unwrap().is_same(outer.context()));
                Ok(())
            });

        assert!(result.is_ok());
        assert_eq!(pool.committed("order"), Some(json!("placed")));
        assert_eq!(pool.committed("audit"), None);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_inner_required_failure_surfaces_on_outer_commit() {
        let (pool, manager, mut stack) = setup();

        let result: Result<(), AppError> =
            manager.execute(&mut stack, &TransactionDefinition::required(), |stack, _| {
                let inner: Result<(), AppError> = manager.execute(
                    stack,
                    &TransactionDefinition::required(),
                    |_, _| Err(AppError::Constraint),
                );
                assert!(inner.is_err());
                Ok(())
            });

        assert!(matches!(
            result,
            Err(AppError::Transaction(TransactionError::UnexpectedRollback { .. }))
        ));
        assert_eq!(pool.journal().commits(), 0);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_panic_rolls_back_and_propagates() {
        let (pool, manager, mut stack) = setup();

        let caught = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), AppError> =
                manager.execute(&mut stack, &TransactionDefinition::required(), |_, status| {
                    status.context().with_connection(|c| c.put("a", json!(1)))?;
                    panic!("boom");
                });
        }));

        assert!(caught.is_err());
        assert!(stack.is_empty());
        assert_eq!(pool.committed("a"), None);
        assert_eq!(pool.journal().rollbacks(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_begin_failure_returned_as_app_error() {
        let (pool, manager, mut stack) = setup();
        pool.fail_next(crate::memory::Fault::Acquire);

        let result: Result<(), AppError> =
            manager.execute(&mut stack, &TransactionDefinition::required(), |_, _| Ok(()));
        assert!(matches!(
            result,
            Err(AppError::Transaction(TransactionError::Acquire(_)))
        ));
    }
}
