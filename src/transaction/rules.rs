//! Rollback rules.
//!
//! A failure is described by an [`ErrorKind`]: a dotted path from the most
//! general kind to the most specific one (`data.constraint.unique`) plus the
//! [`FailureClass`] that decides the default outcome. A [`RollbackRule`]
//! names a path and matches that kind and every kind derived from it.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad class of a failure, used when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Recoverable failure the caller is expected to handle. Commits by default.
    Checked,
    /// Programming or runtime failure. Rolls back by default.
    Unchecked,
    /// Unrecoverable failure (a panic, resource exhaustion). Rolls back by default.
    Fatal,
}

impl FailureClass {
    /// Outcome when neither rule list matches.
    pub fn rolls_back_by_default(&self) -> bool {
        !matches!(self, FailureClass::Checked)
    }
}

/// Kind of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorKind {
    path: Cow<'static, str>,
    class: FailureClass,
}

impl ErrorKind {
    /// A recoverable kind.
    pub const fn checked(path: &'static str) -> Self {
        Self {
            path: Cow::Borrowed(path),
            class: FailureClass::Checked,
        }
    }

    /// A runtime kind.
    pub const fn unchecked(path: &'static str) -> Self {
        Self {
            path: Cow::Borrowed(path),
            class: FailureClass::Unchecked,
        }
    }

    /// An unrecoverable kind.
    pub const fn fatal(path: &'static str) -> Self {
        Self {
            path: Cow::Borrowed(path),
            class: FailureClass::Fatal,
        }
    }

    /// Build a kind from an owned path.
    pub fn new(path: impl Into<String>, class: FailureClass) -> Self {
        Self {
            path: Cow::Owned(path.into()),
            class,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn class(&self) -> FailureClass {
        self.class
    }

    /// Path of the kind this one is derived from, if any.
    pub fn parent(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Check if this kind is `ancestor` or derived from it.
    ///
    /// Matching is per segment: `data.io` is not derived from `data.i`.
    pub fn is_a(&self, ancestor: &str) -> bool {
        if ancestor.is_empty() {
            return false;
        }
        match self.path.strip_prefix(ancestor) {
            Some("") => true,
            Some(rest) => rest.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// A rule matching one kind and every kind derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollbackRule(String);

impl RollbackRule {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Check if `kind` falls under this rule.
    pub fn matches(&self, kind: &ErrorKind) -> bool {
        kind.is_a(&self.0)
    }
}

impl From<&str> for RollbackRule {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&ErrorKind> for RollbackRule {
    fn from(kind: &ErrorKind) -> Self {
        Self::new(kind.path())
    }
}

impl fmt::Display for RollbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can be routed through rollback rules.
pub trait Classify {
    /// The kind of this failure.
    fn error_kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSTRAINT: ErrorKind = ErrorKind::unchecked("data.constraint");
    const UNIQUE: ErrorKind = ErrorKind::unchecked("data.constraint.unique");

    #[test]
    fn test_default_outcome_per_class() {
        assert!(!FailureClass::Checked.rolls_back_by_default());
        assert!(FailureClass::Unchecked.rolls_back_by_default());
        assert!(FailureClass::Fatal.rolls_back_by_default());
    }

    #[test]
    fn test_kind_hierarchy() {
        assert!(UNIQUE.is_a("data"));
        assert!(UNIQUE.is_a("data.constraint"));
        assert!(UNIQUE.is_a("data.constraint.unique"));
        assert!(!CONSTRAINT.is_a("data.constraint.unique"));
        assert!(!UNIQUE.is_a("data.cons"));
        assert!(!UNIQUE.is_a(""));
        assert_eq!(UNIQUE.parent(), Some("data.constraint"));
        assert_eq!(ErrorKind::checked("io").parent(), None);
    }

    #[test]
    fn test_rule_matches_derived_kinds() {
        let rule = RollbackRule::from(&CONSTRAINT);
        assert!(rule.matches(&UNIQUE));
        assert!(rule.matches(&CONSTRAINT));
        assert!(!rule.matches(&ErrorKind::unchecked("data")));
    }

    #[test]
    fn test_owned_kind() {
        let kind = ErrorKind::new(format!("billing.{}", "declined"), FailureClass::Checked);
        assert_eq!(kind.path(), "billing.declined");
        assert_eq!(kind.class(), FailureClass::Checked);
        assert!(RollbackRule::from("billing").matches(&kind));
    }
}
