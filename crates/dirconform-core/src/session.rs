//! Scoped, authenticated channel to the directory.
//!
//! A [`DirectorySession`] owns one connection for its whole lifetime. A bad
//! credential is an observable outcome ([`DirectorySession::bound`] is
//! `false`), not an error. The connection is always released: explicitly
//! through [`DirectorySession::release`], otherwise when the session drops,
//! including during unwinding.

use secrecy::SecretString;
use tracing::{debug, instrument, warn};

use crate::directory::{
    Connection, Connector, Diagnostic, Modification, NewEntry, OpOutcome, SearchOutcome,
    SearchRequest, ServerInfo,
};
use crate::dn::{Dn, Rdn};
use crate::entry::Entry;
use crate::error::ConformError;
use crate::principal::Credential;

/// A scoped handle to one authenticated connection.
pub struct DirectorySession {
    conn: Box<dyn Connection>,
    identity: Option<Dn>,
    bind: OpOutcome,
    released: bool,
}

impl std::fmt::Debug for DirectorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectorySession")
            .field("identity", &self.identity.as_ref().map(ToString::to_string))
            .field("bound", &self.bind.success)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl DirectorySession {
    /// Connects and binds with `credential`. An anonymous credential skips
    /// the bind.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] when the transport fails.
    #[instrument(skip_all, fields(endpoint = connector.endpoint(), identity = %credential))]
    pub fn open(connector: &dyn Connector, credential: &Credential) -> Result<Self, ConformError> {
        let mut conn = connector.connect()?;
        let Some(dn) = credential.dn() else {
            return Ok(Self {
                conn,
                identity: None,
                bind: Diagnostic::success().into(),
                released: false,
            });
        };
        let empty = SecretString::from(String::new());
        let secret = credential.secret().unwrap_or(&empty);
        let bind = match conn.bind(dn, secret) {
            Ok(bind) => bind,
            Err(err) => {
                let _ = conn.unbind();
                return Err(err);
            },
        };
        if bind.success {
            debug!("bound");
        } else {
            debug!(diagnostic = %bind.diagnostic, "bind refused");
        }
        Ok(Self {
            conn,
            identity: Some(dn.clone()),
            bind,
            released: false,
        })
    }

    /// Returns `true` when the bind succeeded (always for anonymous).
    #[must_use]
    pub const fn bound(&self) -> bool {
        self.bind.success
    }

    /// Outcome of the bind.
    #[must_use]
    pub const fn bind_outcome(&self) -> &OpOutcome {
        &self.bind
    }

    /// Identity the session was opened with.
    #[must_use]
    pub const fn identity(&self) -> Option<&Dn> {
        self.identity.as_ref()
    }

    /// Runs a search.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, ConformError> {
        let outcome = self.conn.search(request)?;
        debug!(
            base = %request.base,
            filter = %request.filter,
            rc = outcome.diagnostic.code,
            entries = outcome.entries.len(),
            "search"
        );
        Ok(outcome)
    }

    /// Reads one entry; `None` when it is absent or not visible.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn read(&mut self, dn: &Dn) -> Result<Option<Entry>, ConformError> {
        let outcome = self.search(&SearchRequest::entry(dn.clone()))?;
        Ok(outcome.entries.into_iter().next())
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn add(&mut self, entry: &NewEntry) -> Result<OpOutcome, ConformError> {
        let outcome = self.conn.add(entry)?;
        debug!(dn = %entry.dn, rc = outcome.diagnostic.code, "add");
        Ok(outcome)
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn delete(&mut self, dn: &Dn) -> Result<OpOutcome, ConformError> {
        let outcome = self.conn.delete(dn)?;
        debug!(%dn, rc = outcome.diagnostic.code, "delete");
        Ok(outcome)
    }

    /// Modifies an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn modify(&mut self, dn: &Dn, changes: &[Modification]) -> Result<OpOutcome, ConformError> {
        let outcome = self.conn.modify(dn, changes)?;
        debug!(%dn, changes = changes.len(), rc = outcome.diagnostic.code, "modify");
        Ok(outcome)
    }

    /// Renames an entry in place.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn rename(&mut self, dn: &Dn, new_rdn: &Rdn) -> Result<OpOutcome, ConformError> {
        let outcome = self.conn.rename(dn, new_rdn)?;
        debug!(%dn, %new_rdn, rc = outcome.diagnostic.code, "rename");
        Ok(outcome)
    }

    /// Password-modify extended operation.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn change_password(
        &mut self,
        user: &Dn,
        old: Option<&SecretString>,
        new: &SecretString,
    ) -> Result<OpOutcome, ConformError> {
        let outcome = self.conn.change_password(user, old, new)?;
        debug!(%user, rc = outcome.diagnostic.code, "password modify");
        Ok(outcome)
    }

    /// Reads the root DSE.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn root_dse(&mut self) -> Result<ServerInfo, ConformError> {
        self.conn.root_dse()
    }

    /// Releases the connection, reporting an unbind failure.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] when the unbind fails.
    pub fn release(mut self) -> Result<(), ConformError> {
        self.released = true;
        self.conn.unbind()
    }
}

impl Drop for DirectorySession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.conn.unbind() {
            warn!(error = %err, "unbind failed while releasing session");
        }
    }
}
