//! Expectation matrices.
//!
//! A matrix maps principal ids to an [`ExpectationCase`]. Per-role variants
//! are produced by layering overrides onto a base table:
//!
//! ```
//! use dirconform_core::matrix::{Expectation, ExpectationMatrix};
//!
//! let matrix = ExpectationMatrix::uniform(["anonymous", "user", "admin"], Expectation::Fail)
//!     .succeed(["admin"])
//!     .skip(["anonymous"]);
//!
//! assert_eq!(matrix.expectation("admin"), Expectation::Succeed);
//! assert_eq!(matrix.expectation("user"), Expectation::Fail);
//! assert_eq!(matrix.expectation("anonymous"), Expectation::Skip);
//! // No slot at all is the same as an explicit skip.
//! assert_eq!(matrix.expectation("app"), Expectation::Skip);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{CaseResult, MatrixError};
use crate::runner::CaseContext;

/// Expected outcome for one principal.
///
/// `Skip` is a third state, distinct from `Fail`: no session is opened and
/// no hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Not applicable to this principal.
    Skip,
    /// The operation must succeed.
    Succeed,
    /// The operation must fail.
    Fail,
}

impl Expectation {
    /// Expected boolean outcome, `None` for [`Expectation::Skip`].
    #[must_use]
    pub const fn expected(self) -> Option<bool> {
        match self {
            Self::Skip => None,
            Self::Succeed => Some(true),
            Self::Fail => Some(false),
        }
    }
}

impl From<bool> for Expectation {
    fn from(success: bool) -> Self {
        if success { Self::Succeed } else { Self::Fail }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Succeed => "success",
            Self::Fail => "failure",
        })
    }
}

/// Hook run before or after the operation under test.
pub type Hook = Arc<dyn Fn(&mut CaseContext<'_>) -> CaseResult + Send + Sync>;

/// Wraps a closure as a [`Hook`].
pub fn hook<F>(f: F) -> Hook
where
    F: Fn(&mut CaseContext<'_>) -> CaseResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One principal's slot in a matrix.
#[derive(Clone)]
pub struct ExpectationCase {
    /// Expected outcome.
    pub expectation: Expectation,
    /// Replaces the scenario's setup hook for this principal.
    pub setup: Option<Hook>,
    /// Replaces the scenario's post hook for this principal.
    pub check: Option<Hook>,
}

impl ExpectationCase {
    /// A slot with no hooks of its own.
    #[must_use]
    pub const fn new(expectation: Expectation) -> Self {
        Self {
            expectation,
            setup: None,
            check: None,
        }
    }

    /// Sets the setup hook.
    #[must_use]
    pub fn with_setup(mut self, setup: Hook) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Sets the post hook.
    #[must_use]
    pub fn with_check(mut self, check: Hook) -> Self {
        self.check = Some(check);
        self
    }
}

impl fmt::Debug for ExpectationCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectationCase")
            .field("expectation", &self.expectation)
            .field("setup", &self.setup.is_some())
            .field("check", &self.check.is_some())
            .finish()
    }
}

impl From<Expectation> for ExpectationCase {
    fn from(expectation: Expectation) -> Self {
        Self::new(expectation)
    }
}

/// Principal id to expectation table.
#[derive(Debug, Clone, Default)]
pub struct ExpectationMatrix {
    cases: BTreeMap<String, ExpectationCase>,
}

impl ExpectationMatrix {
    /// Empty matrix; every principal is skipped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Base table giving every id in `ids` the same expectation.
    #[must_use]
    pub fn uniform<I, S>(ids: I, expectation: Expectation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().set(ids, expectation)
    }

    /// Overrides the expectation of `ids`, keeping their hooks.
    #[must_use]
    pub fn set<I, S>(mut self, ids: I, expectation: Expectation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.cases
                .entry(id.into())
                .and_modify(|case| case.expectation = expectation)
                .or_insert_with(|| ExpectationCase::new(expectation));
        }
        self
    }

    /// Shorthand for [`set`](Self::set) with [`Expectation::Succeed`].
    #[must_use]
    pub fn succeed<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(ids, Expectation::Succeed)
    }

    /// Shorthand for [`set`](Self::set) with [`Expectation::Fail`].
    #[must_use]
    pub fn fail<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(ids, Expectation::Fail)
    }

    /// Shorthand for [`set`](Self::set) with [`Expectation::Skip`].
    #[must_use]
    pub fn skip<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(ids, Expectation::Skip)
    }

    /// Replaces one slot entirely.
    #[must_use]
    pub fn with_case(mut self, id: impl Into<String>, case: ExpectationCase) -> Self {
        self.cases.insert(id.into(), case);
        self
    }

    /// Layers `overrides` on top of this matrix; slots in `overrides` win.
    #[must_use]
    pub fn merge(mut self, overrides: Self) -> Self {
        self.cases.extend(overrides.cases);
        self
    }

    /// Slot of `id`, if any.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ExpectationCase> {
        self.cases.get(id)
    }

    /// Expectation of `id`; a missing slot reads as [`Expectation::Skip`].
    #[must_use]
    pub fn expectation(&self, id: &str) -> Expectation {
        self.get(id).map_or(Expectation::Skip, |case| case.expectation)
    }

    /// Ids with a slot.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.cases.keys().map(String::as_str)
    }

    /// Ids expected to succeed.
    pub fn succeeding(&self) -> impl Iterator<Item = &str> {
        self.cases
            .iter()
            .filter(|(_, case)| case.expectation == Expectation::Succeed)
            .map(|(id, _)| id.as_str())
    }

    /// Checks that every slot names a registered principal.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::UnknownPrincipal`] for the first stray slot.
    pub fn validate<'a>(
        &self,
        scenario: &str,
        registered: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), MatrixError> {
        let registered: Vec<&str> = registered.into_iter().collect();
        match self.ids().find(|id| !registered.contains(id)) {
            Some(id) => Err(MatrixError::UnknownPrincipal {
                scenario: scenario.to_string(),
                principal: id.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Like [`validate`](Self::validate), and additionally requires a slot
    /// (possibly `Skip`) for every registered principal.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::UnknownPrincipal`] or
    /// [`MatrixError::MissingPrincipal`].
    pub fn validate_complete<'a>(
        &self,
        scenario: &str,
        registered: impl IntoIterator<Item = &'a str> + Clone,
    ) -> Result<(), MatrixError> {
        self.validate(scenario, registered.clone())?;
        match registered.into_iter().find(|id| self.get(id).is_none()) {
            Some(id) => Err(MatrixError::MissingPrincipal {
                scenario: scenario.to_string(),
                principal: id.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: [&str; 4] = ["anonymous", "user", "user-admin", "admin"];

    #[test]
    fn test_skip_is_distinct_from_fail() {
        assert_eq!(Expectation::Skip.expected(), None);
        assert_eq!(Expectation::Fail.expected(), Some(false));
        assert_ne!(Expectation::Skip, Expectation::Fail);
        assert_eq!(Expectation::from(true), Expectation::Succeed);
    }

    #[test]
    fn test_override_merge() {
        let base = ExpectationMatrix::uniform(IDS, Expectation::Fail);
        let variant = base
            .clone()
            .merge(ExpectationMatrix::new().succeed(["user-admin", "admin"]));
        assert_eq!(base.expectation("admin"), Expectation::Fail);
        assert_eq!(variant.expectation("admin"), Expectation::Succeed);
        assert_eq!(variant.expectation("user"), Expectation::Fail);
        assert_eq!(
            variant.succeeding().collect::<Vec<_>>(),
            ["admin", "user-admin"]
        );
    }

    #[test]
    fn test_set_keeps_hooks() {
        let matrix = ExpectationMatrix::new()
            .with_case(
                "user",
                ExpectationCase::new(Expectation::Fail).with_check(hook(|_| Ok(()))),
            )
            .succeed(["user"]);
        let case = matrix.get("user").unwrap();
        assert_eq!(case.expectation, Expectation::Succeed);
        assert!(case.check.is_some());
        assert!(case.setup.is_none());
    }

    #[test]
    fn test_validate_rejects_unknown_principal() {
        let matrix = ExpectationMatrix::uniform(["user", "ghost"], Expectation::Fail);
        let err = matrix.validate("search-people", IDS).unwrap_err();
        assert_eq!(
            err,
            MatrixError::UnknownPrincipal {
                scenario: "search-people".to_string(),
                principal: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn test_validate_complete_requires_every_principal() {
        let matrix = ExpectationMatrix::uniform(["anonymous", "user", "admin"], Expectation::Fail);
        assert!(matrix.validate("bind", IDS).is_ok());
        assert!(matches!(
            matrix.validate_complete("bind", IDS),
            Err(MatrixError::MissingPrincipal { principal, .. }) if principal == "user-admin"
        ));
        let full = matrix.skip(["user-admin"]);
        assert!(full.validate_complete("bind", IDS).is_ok());
    }
}
