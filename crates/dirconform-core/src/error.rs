//! Error types for conformance runs.
//!
//! Two layers exist. [`ConformError`] covers faults of the engine and its
//! environment; only [`ConformError::ConnectionFailure`] is fatal to a run.
//! [`CaseError`] is what hooks and actions return inside a single case: an
//! assertion that did not hold, or an engine error bubbling up.
//!
//! Policy refusals, missing targets and schema rejections are *not* errors.
//! They travel as data inside a [`Diagnostic`](crate::directory::Diagnostic)
//! and are compared against the expectation matrix.

use std::fmt;

use thiserror::Error;

use crate::dn::DnError;
use crate::filter::FilterError;

/// Errors raised by the conformance engine.
#[derive(Debug, Error)]
pub enum ConformError {
    /// The directory endpoint is unusable (unreachable, timed out, protocol
    /// fault). Every later assertion would be meaningless, so the run stops.
    #[error("connection failure on {endpoint}: {reason}")]
    ConnectionFailure {
        /// Endpoint that failed.
        endpoint: String,
        /// Transport-level reason.
        reason: String,
    },

    /// A distinguished name could not be parsed.
    #[error(transparent)]
    InvalidDn(#[from] DnError),

    /// A search filter could not be parsed.
    #[error(transparent)]
    InvalidFilter(#[from] FilterError),

    /// An expectation matrix does not line up with the principal registry.
    #[error(transparent)]
    InvalidMatrix(#[from] MatrixError),

    /// A principal id was referenced that the registry does not hold.
    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    /// Registry preconditions could not be established.
    #[error("principal preconditions failed for {group}: {reason}")]
    Precondition {
        /// Group whose membership could not be granted.
        group: String,
        /// Diagnostic returned by the directory.
        reason: String,
    },

    /// The out-of-band query tool could not be launched.
    #[error("query tool {program} could not run: {reason}")]
    Probe {
        /// Program that was invoked.
        program: String,
        /// Why it could not run.
        reason: String,
    },
}

impl ConformError {
    /// Creates a new connection failure.
    #[must_use]
    pub fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new precondition failure.
    #[must_use]
    pub fn precondition(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Precondition {
            group: group.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new probe launch failure.
    #[must_use]
    pub fn probe(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Probe {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the whole run must stop.
    ///
    /// Preconditions are fatal as well: without them every admin principal
    /// would deviate for reasons unrelated to the policy under test.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. } | Self::Precondition { .. }
        )
    }
}

/// Errors detected while validating an expectation matrix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    /// A registered principal has no slot in the matrix.
    #[error("scenario {scenario}: no expectation for principal {principal}")]
    MissingPrincipal {
        /// Scenario name.
        scenario: String,
        /// Principal without a slot.
        principal: String,
    },

    /// The matrix names a principal the registry does not know.
    #[error("scenario {scenario}: expectation for unknown principal {principal}")]
    UnknownPrincipal {
        /// Scenario name.
        scenario: String,
        /// Unknown principal id.
        principal: String,
    },
}

/// Outcome of a single case that did not pass.
#[derive(Debug, Error)]
pub enum CaseError {
    /// A check inside a hook did not hold.
    #[error("{0}")]
    Assertion(String),

    /// A value the hook expected in the case data was never recorded.
    #[error("case data has no value for {0:?}")]
    MissingData(String),

    /// A fixture could not be created.
    #[error("fixture {dn} could not be created: {diagnostic}")]
    Fixture {
        /// DN of the fixture.
        dn: String,
        /// Directory diagnostic.
        diagnostic: String,
    },

    /// Engine error raised while running the case.
    #[error(transparent)]
    Conform(#[from] ConformError),
}

impl CaseError {
    /// Creates a new assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Creates a new fixture failure.
    #[must_use]
    pub fn fixture(dn: impl fmt::Display, diagnostic: impl fmt::Display) -> Self {
        Self::Fixture {
            dn: dn.to_string(),
            diagnostic: diagnostic.to_string(),
        }
    }

    /// Returns `true` if the error must abort the run instead of failing the
    /// case.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Conform(err) => err.is_fatal(),
            Self::Assertion(_) | Self::MissingData(_) | Self::Fixture { .. } => false,
        }
    }
}

/// Shorthand for hook results.
pub type CaseResult<T = ()> = Result<T, CaseError>;

/// Fails the case with `message` unless `condition` holds.
///
/// # Errors
///
/// Returns [`CaseError::Assertion`] when `condition` is false.
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> CaseResult {
    if condition {
        Ok(())
    } else {
        Err(CaseError::Assertion(message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_is_fatal() {
        let err = ConformError::connection("ldap://localhost:389", "connection refused");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("ldap://localhost:389"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_probe_error_is_not_fatal() {
        let err = ConformError::probe("ldapsearch", "not found");
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("ldapsearch"));
    }

    #[test]
    fn test_case_error_fatality_follows_source() {
        let fatal = CaseError::from(ConformError::connection("ldap://x", "timeout"));
        assert!(fatal.is_fatal());

        let assertion = CaseError::assertion("entry still present");
        assert!(!assertion.is_fatal());
        assert_eq!(assertion.to_string(), "entry still present");
    }

    #[test]
    fn test_ensure() {
        assert!(ensure(true, || "unused".to_string()).is_ok());
        let err = ensure(false, || "expected 1 entry".to_string()).unwrap_err();
        assert!(matches!(err, CaseError::Assertion(msg) if msg == "expected 1 entry"));
    }

    #[test]
    fn test_matrix_error_display() {
        let err = MatrixError::MissingPrincipal {
            scenario: "create-person".to_string(),
            principal: "app".to_string(),
        };
        assert!(err.to_string().contains("create-person"));
        assert!(err.to_string().contains("app"));
    }
}
