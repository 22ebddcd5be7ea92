//! Directory transport seam.
//!
//! The engine never talks to a server directly. It goes through
//! [`Connector`] (opens channels) and [`Connection`] (one channel, the
//! operation vocabulary). Two implementations ship with the crate:
//!
//! - [`ldap::LdapConnector`] drives a live server with `ldap3`.
//! - [`memory::MemoryDirectory`] is an in-process reference store used by
//!   the self-test and the test suite.
//!
//! Every method returns `Err` only for transport faults
//! ([`ConformError::ConnectionFailure`]). Refusals, missing targets and
//! schema rejections come back as `Ok` outcomes carrying a [`Diagnostic`].

pub mod ldap;
pub mod memory;

use std::fmt;

use secrecy::SecretString;
use serde::Serialize;

use crate::dn::Dn;
use crate::entry::{Attributes, Entry, OBJECT_CLASS};
use crate::error::ConformError;
use crate::filter::Filter;

// =============================================================================
// Result codes
// =============================================================================

/// Protocol result codes the engine refers to by name.
pub mod rc {
    /// `success`
    pub const SUCCESS: u32 = 0;
    /// `operationsError`
    pub const OPERATIONS_ERROR: u32 = 1;
    /// `protocolError`
    pub const PROTOCOL_ERROR: u32 = 2;
    /// `strongerAuthRequired`
    pub const STRONGER_AUTH_REQUIRED: u32 = 8;
    /// `confidentialityRequired`
    pub const CONFIDENTIALITY_REQUIRED: u32 = 13;
    /// `noSuchAttribute`
    pub const NO_SUCH_ATTRIBUTE: u32 = 16;
    /// `undefinedAttributeType`
    pub const UNDEFINED_ATTRIBUTE_TYPE: u32 = 17;
    /// `constraintViolation`
    pub const CONSTRAINT_VIOLATION: u32 = 19;
    /// `attributeOrValueExists`
    pub const ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
    /// `invalidAttributeSyntax`
    pub const INVALID_ATTRIBUTE_SYNTAX: u32 = 21;
    /// `noSuchObject`
    pub const NO_SUCH_OBJECT: u32 = 32;
    /// `invalidDNSyntax`
    pub const INVALID_DN_SYNTAX: u32 = 34;
    /// `inappropriateAuthentication`
    pub const INAPPROPRIATE_AUTHENTICATION: u32 = 48;
    /// `invalidCredentials`
    pub const INVALID_CREDENTIALS: u32 = 49;
    /// `insufficientAccessRights`
    pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
    /// `unwillingToPerform`
    pub const UNWILLING_TO_PERFORM: u32 = 53;
    /// `namingViolation`
    pub const NAMING_VIOLATION: u32 = 64;
    /// `objectClassViolation`
    pub const OBJECT_CLASS_VIOLATION: u32 = 65;
    /// `notAllowedOnNonLeaf`
    pub const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
    /// `notAllowedOnRDN`
    pub const NOT_ALLOWED_ON_RDN: u32 = 67;
    /// `entryAlreadyExists`
    pub const ENTRY_ALREADY_EXISTS: u32 = 68;
    /// `objectClassModsProhibited`
    pub const OBJECT_CLASS_MODS_PROHIBITED: u32 = 69;
    /// `other`
    pub const OTHER: u32 = 80;
}

/// Symbolic name of a result code.
#[must_use]
pub const fn code_name(code: u32) -> &'static str {
    match code {
        rc::SUCCESS => "success",
        rc::OPERATIONS_ERROR => "operationsError",
        rc::PROTOCOL_ERROR => "protocolError",
        3 => "timeLimitExceeded",
        4 => "sizeLimitExceeded",
        7 => "authMethodNotSupported",
        rc::STRONGER_AUTH_REQUIRED => "strongerAuthRequired",
        rc::CONFIDENTIALITY_REQUIRED => "confidentialityRequired",
        rc::NO_SUCH_ATTRIBUTE => "noSuchAttribute",
        rc::UNDEFINED_ATTRIBUTE_TYPE => "undefinedAttributeType",
        18 => "inappropriateMatching",
        rc::CONSTRAINT_VIOLATION => "constraintViolation",
        rc::ATTRIBUTE_OR_VALUE_EXISTS => "attributeOrValueExists",
        rc::INVALID_ATTRIBUTE_SYNTAX => "invalidAttributeSyntax",
        rc::NO_SUCH_OBJECT => "noSuchObject",
        rc::INVALID_DN_SYNTAX => "invalidDNSyntax",
        rc::INAPPROPRIATE_AUTHENTICATION => "inappropriateAuthentication",
        rc::INVALID_CREDENTIALS => "invalidCredentials",
        rc::INSUFFICIENT_ACCESS_RIGHTS => "insufficientAccessRights",
        51 => "busy",
        52 => "unavailable",
        rc::UNWILLING_TO_PERFORM => "unwillingToPerform",
        rc::NAMING_VIOLATION => "namingViolation",
        rc::OBJECT_CLASS_VIOLATION => "objectClassViolation",
        rc::NOT_ALLOWED_ON_NON_LEAF => "notAllowedOnNonLeaf",
        rc::NOT_ALLOWED_ON_RDN => "notAllowedOnRDN",
        rc::ENTRY_ALREADY_EXISTS => "entryAlreadyExists",
        rc::OBJECT_CLASS_MODS_PROHIBITED => "objectClassModsProhibited",
        rc::OTHER => "other",
        _ => "unknown",
    }
}

/// Classification of a result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// The operation was applied.
    Success,
    /// Refused by access policy or authentication.
    AuthzDenied,
    /// Target (or its parent) does not exist.
    NotFound,
    /// Rejected by a schema or attribute constraint.
    ConstraintViolation,
    /// Anything else the server reported.
    Other,
}

impl ResultKind {
    /// Classifies a protocol result code.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            rc::SUCCESS => Self::Success,
            rc::STRONGER_AUTH_REQUIRED
            | rc::CONFIDENTIALITY_REQUIRED
            | rc::INAPPROPRIATE_AUTHENTICATION
            | rc::INVALID_CREDENTIALS
            | rc::INSUFFICIENT_ACCESS_RIGHTS
            | rc::UNWILLING_TO_PERFORM => Self::AuthzDenied,
            rc::NO_SUCH_OBJECT => Self::NotFound,
            rc::UNDEFINED_ATTRIBUTE_TYPE
            | rc::CONSTRAINT_VIOLATION
            | rc::ATTRIBUTE_OR_VALUE_EXISTS
            | rc::INVALID_ATTRIBUTE_SYNTAX
            | rc::INVALID_DN_SYNTAX
            | rc::NAMING_VIOLATION
            | rc::OBJECT_CLASS_VIOLATION
            | rc::NOT_ALLOWED_ON_NON_LEAF
            | rc::NOT_ALLOWED_ON_RDN
            | rc::ENTRY_ALREADY_EXISTS
            | rc::OBJECT_CLASS_MODS_PROHIBITED => Self::ConstraintViolation,
            _ => Self::Other,
        }
    }
}

/// Structured result of one directory operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Protocol result code.
    pub code: u32,
    /// Symbolic name of `code`.
    pub name: &'static str,
    /// Server-supplied message.
    pub message: String,
    /// Matched DN reported by the server, if any.
    pub matched: Option<String>,
    /// Classification of `code`.
    pub kind: ResultKind,
}

impl Diagnostic {
    /// Creates a diagnostic from a result code and message.
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            name: code_name(code),
            message: message.into(),
            matched: None,
            kind: ResultKind::from_code(code),
        }
    }

    /// A plain `success`.
    #[must_use]
    pub fn success() -> Self {
        Self::new(rc::SUCCESS, "")
    }

    /// Attaches the matched DN.
    #[must_use]
    pub fn with_matched(mut self, matched: impl Into<String>) -> Self {
        let matched = matched.into();
        self.matched = (!matched.is_empty()).then_some(matched);
        self
    }

    /// Returns `true` for `success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == ResultKind::Success
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(matched) = &self.matched {
            write!(f, " [matched: {matched}]")?;
        }
        Ok(())
    }
}

// =============================================================================
// Outcomes and payloads
// =============================================================================

/// Outcome of a mutation or bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpOutcome {
    /// Whether the operation was applied.
    pub success: bool,
    /// Full diagnostic.
    pub diagnostic: Diagnostic,
}

impl From<Diagnostic> for OpOutcome {
    fn from(diagnostic: Diagnostic) -> Self {
        Self {
            success: diagnostic.is_success(),
            diagnostic,
        }
    }
}

/// Outcome of a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOutcome {
    /// `true` when the search succeeded and returned at least one entry.
    pub matched: bool,
    /// Returned entries.
    pub entries: Vec<Entry>,
    /// Full diagnostic.
    pub diagnostic: Diagnostic,
}

impl SearchOutcome {
    /// Builds an outcome; `matched` is derived.
    #[must_use]
    pub fn new(entries: Vec<Entry>, diagnostic: Diagnostic) -> Self {
        Self {
            matched: diagnostic.is_success() && !entries.is_empty(),
            entries,
            diagnostic,
        }
    }

    /// A refused or empty search.
    #[must_use]
    pub fn empty(diagnostic: Diagnostic) -> Self {
        Self::new(Vec::new(), diagnostic)
    }

    /// First returned entry.
    #[must_use]
    pub fn first(&self) -> Option<&Entry> {
        self.entries.first()
    }
}

impl From<&SearchOutcome> for OpOutcome {
    fn from(outcome: &SearchOutcome) -> Self {
        Self {
            success: outcome.matched,
            diagnostic: outcome.diagnostic.clone(),
        }
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and everything below it.
    #[default]
    Subtree,
}

/// A search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Search base.
    pub base: Dn,
    /// Scope.
    pub scope: SearchScope,
    /// Filter.
    pub filter: Filter,
    /// Requested attributes; empty means all user attributes.
    pub attributes: Vec<String>,
}

impl SearchRequest {
    /// Subtree search matching every entry below `base`.
    #[must_use]
    pub fn subtree(base: Dn) -> Self {
        Self {
            base,
            scope: SearchScope::Subtree,
            filter: Filter::any(),
            attributes: Vec::new(),
        }
    }

    /// Base-scope read of a single entry.
    #[must_use]
    pub fn entry(dn: Dn) -> Self {
        Self {
            scope: SearchScope::Base,
            ..Self::subtree(dn)
        }
    }

    /// Replaces the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Restricts the returned attributes.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

/// An entry to be added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Target DN.
    pub dn: Dn,
    /// Object classes.
    pub object_classes: Vec<String>,
    /// Other attributes.
    pub attributes: Attributes,
}

impl NewEntry {
    /// Creates a new entry payload.
    #[must_use]
    pub fn new<I, S>(dn: Dn, object_classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dn,
            object_classes: object_classes.into_iter().map(Into::into).collect(),
            attributes: Attributes::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attr<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attributes.insert(name, values);
        self
    }

    /// Flattens object classes into the attribute set.
    #[must_use]
    pub fn into_entry(self) -> Entry {
        let mut attributes = self.attributes;
        attributes.insert(OBJECT_CLASS, self.object_classes);
        Entry::new(self.dn, attributes)
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModOp {
    /// Add values.
    Add,
    /// Delete values (all values when empty).
    Delete,
    /// Replace every value.
    Replace,
}

/// One attribute modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Operation.
    pub op: ModOp,
    /// Attribute name.
    pub attr: String,
    /// Values.
    pub values: Vec<String>,
}

impl Modification {
    fn new<I, V>(op: ModOp, attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            op,
            attr: attr.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Replaces every value of `attr`.
    #[must_use]
    pub fn replace<I, V>(attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::new(ModOp::Replace, attr, values)
    }

    /// Adds values to `attr`.
    #[must_use]
    pub fn add<I, V>(attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::new(ModOp::Add, attr, values)
    }

    /// Deletes values from `attr`.
    #[must_use]
    pub fn delete<I, V>(attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::new(ModOp::Delete, attr, values)
    }
}

/// Root DSE facts checked by the connection suite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// `namingContexts`.
    pub naming_contexts: Vec<String>,
    /// `supportedLDAPVersion`.
    pub supported_versions: Vec<String>,
}

// =============================================================================
// Traits
// =============================================================================

/// Opens channels to a directory.
pub trait Connector: Send + Sync {
    /// Opens a fresh, unbound channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] when the endpoint is
    /// unreachable or does not answer in time.
    fn connect(&self) -> Result<Box<dyn Connection>, ConformError>;

    /// Endpoint label used in logs and errors.
    fn endpoint(&self) -> &str;
}

/// One channel to the directory.
///
/// All methods return `Err` only for transport faults.
pub trait Connection {
    /// Simple bind.
    fn bind(&mut self, dn: &Dn, secret: &SecretString) -> Result<OpOutcome, ConformError>;

    /// Search.
    fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, ConformError>;

    /// Add an entry.
    fn add(&mut self, entry: &NewEntry) -> Result<OpOutcome, ConformError>;

    /// Delete a leaf entry.
    fn delete(&mut self, dn: &Dn) -> Result<OpOutcome, ConformError>;

    /// Apply modifications atomically.
    fn modify(&mut self, dn: &Dn, changes: &[Modification]) -> Result<OpOutcome, ConformError>;

    /// Rename an entry in place (old RDN is removed).
    fn rename(&mut self, dn: &Dn, new_rdn: &crate::dn::Rdn) -> Result<OpOutcome, ConformError>;

    /// Password-modify extended operation.
    fn change_password(
        &mut self,
        user: &Dn,
        old: Option<&SecretString>,
        new: &SecretString,
    ) -> Result<OpOutcome, ConformError>;

    /// Reads the root DSE.
    fn root_dse(&mut self) -> Result<ServerInfo, ConformError>;

    /// Releases the channel.
    fn unbind(&mut self) -> Result<(), ConformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(ResultKind::from_code(0), ResultKind::Success);
        assert_eq!(ResultKind::from_code(50), ResultKind::AuthzDenied);
        assert_eq!(ResultKind::from_code(49), ResultKind::AuthzDenied);
        assert_eq!(ResultKind::from_code(32), ResultKind::NotFound);
        assert_eq!(ResultKind::from_code(19), ResultKind::ConstraintViolation);
        assert_eq!(ResultKind::from_code(68), ResultKind::ConstraintViolation);
        assert_eq!(ResultKind::from_code(80), ResultKind::Other);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::new(rc::NO_SUCH_OBJECT, "no such entry")
            .with_matched("ou=people,dc=ci");
        assert_eq!(
            diag.to_string(),
            "noSuchObject (32): no such entry [matched: ou=people,dc=ci]"
        );
        assert_eq!(Diagnostic::success().to_string(), "success (0)");
        assert!(Diagnostic::new(50, "x").with_matched("").matched.is_none());
    }

    #[test]
    fn test_search_matched_requires_entries() {
        let empty = SearchOutcome::empty(Diagnostic::success());
        assert!(!empty.matched);

        let entry = Entry::new(Dn::parse("dc=ci").unwrap(), Attributes::new());
        let refused = SearchOutcome::new(
            vec![entry.clone()],
            Diagnostic::new(rc::INSUFFICIENT_ACCESS_RIGHTS, ""),
        );
        assert!(!refused.matched);

        let found = SearchOutcome::new(vec![entry], Diagnostic::success());
        assert!(found.matched);
        assert!(OpOutcome::from(&found).success);
    }

    #[test]
    fn test_new_entry_flattens_object_classes() {
        let entry = NewEntry::new(Dn::parse("cn=g,ou=groups,dc=ci").unwrap(), ["groupOfNames"])
            .attr("cn", ["g"])
            .into_entry();
        assert!(entry.has_object_class("groupofnames"));
        assert_eq!(entry.first("cn"), Some("g"));
    }
}
