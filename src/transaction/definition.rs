//! Transaction definitions: how a scope relates to the ambient transaction.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transaction::isolation::Isolation;
use crate::transaction::rules::{ErrorKind, RollbackRule};

/// How a scope relates to the transaction already running, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Join the current transaction, or start one if there is none.
    #[default]
    Required,

    /// Suspend the current transaction and always start an independent one.
    RequiresNew,

    /// Run inside the current transaction behind a rollback mark, or start
    /// one if there is none.
    Nested,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Required => write!(f, "REQUIRED"),
            Propagation::RequiresNew => write!(f, "REQUIRES_NEW"),
            Propagation::Nested => write!(f, "NESTED"),
        }
    }
}

impl std::str::FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(['-', ' '], "_").as_str() {
            "REQUIRED" => Ok(Propagation::Required),
            "REQUIRES_NEW" | "REQUIRESNEW" => Ok(Propagation::RequiresNew),
            "NESTED" => Ok(Propagation::Nested),
            _ => Err(format!("unknown propagation: {}", s)),
        }
    }
}

/// Immutable description of a transaction scope.
///
/// Built once per call site with the `with_*` setters and then shared.
/// Nothing in the crate mutates a definition after it has been handed to
/// the manager.
///
/// ```
/// use txscope::transaction::{Isolation, Propagation, TransactionDefinition};
///
/// let definition = TransactionDefinition::new(Propagation::RequiresNew)
///     .with_isolation(Isolation::Serializable)
///     .with_timeout_seconds(5)
///     .no_rollback_for("billing.declined");
///
/// assert_eq!(definition.propagation(), Propagation::RequiresNew);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionDefinition {
    propagation: Propagation,
    isolation: Isolation,
    read_only: bool,
    /// `<= 0` means no timeout.
    timeout_seconds: i64,
    rollback_for: Vec<RollbackRule>,
    no_rollback_for: Vec<RollbackRule>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::ReadCommitted,
            read_only: false,
            timeout_seconds: 30,
            rollback_for: Vec::new(),
            no_rollback_for: Vec::new(),
        }
    }
}

impl TransactionDefinition {
    /// Create a definition with the given propagation and default settings.
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Default::default()
        }
    }

    pub fn required() -> Self {
        Self::new(Propagation::Required)
    }

    pub fn requires_new() -> Self {
        Self::new(Propagation::RequiresNew)
    }

    pub fn nested() -> Self {
        Self::new(Propagation::Nested)
    }

    /// Set the propagation mode.
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Set the isolation level.
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the read-only flag.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the timeout; `<= 0` disables it.
    pub fn with_timeout_seconds(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Add a kind that forces a rollback.
    pub fn rollback_for(mut self, rule: impl Into<RollbackRule>) -> Self {
        self.rollback_for.push(rule.into());
        self
    }

    /// Add a kind that never causes a rollback.
    pub fn no_rollback_for(mut self, rule: impl Into<RollbackRule>) -> Self {
        self.no_rollback_for.push(rule.into());
        self
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn timeout_seconds(&self) -> i64 {
        self.timeout_seconds
    }

    /// The timeout as a duration, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn rollback_rules(&self) -> &[RollbackRule] {
        &self.rollback_for
    }

    pub fn no_rollback_rules(&self) -> &[RollbackRule] {
        &self.no_rollback_for
    }

    /// Decide whether a failure of `kind` rolls the scope back.
    ///
    /// Exclusions are checked first, so a kind listed in both lists commits.
    /// Without a matching rule, unchecked and fatal failures roll back and
    /// checked failures commit.
    pub fn should_rollback_for(&self, kind: &ErrorKind) -> bool {
        if self.no_rollback_for.iter().any(|rule| rule.matches(kind)) {
            return false;
        }
        if self.rollback_for.iter().any(|rule| rule.matches(kind)) {
            return true;
        }
        kind.class().rolls_back_by_default()
    }
}

impl fmt::Display for TransactionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "propagation={}, isolation={}, read_only={}, timeout={}s",
            self.propagation, self.isolation, self.read_only, self.timeout_seconds
        )
    }
}
