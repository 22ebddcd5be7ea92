//! Live transport on `ldap3`'s synchronous client.
//!
//! Every call carries the configured timeout. An `ldap3` error (socket
//! failure, TLS failure, timeout, protocol decode error) is a
//! [`ConformError::ConnectionFailure`]; anything the server answers with a
//! result code is returned as data.

use std::collections::HashSet;
use std::time::Duration;

use ldap3::exop::PasswordModify;
use ldap3::{LdapConn, LdapConnSettings, LdapError, LdapResult, Mod, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use super::{
    Connection, Connector, Diagnostic, ModOp, Modification, NewEntry, OpOutcome, SearchOutcome,
    SearchRequest, SearchScope, ServerInfo,
};
use crate::dn::{Dn, Rdn};
use crate::entry::{Attributes, Entry};
use crate::error::ConformError;

/// Opens `ldap3` connections to one endpoint.
#[derive(Debug, Clone)]
pub struct LdapConnector {
    endpoint: String,
    timeout: Duration,
    tls_verify: bool,
}

impl LdapConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            tls_verify: true,
        }
    }

    /// Sets certificate verification for `ldaps://` endpoints.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }
}

impl Connector for LdapConnector {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    fn connect(&self) -> Result<Box<dyn Connection>, ConformError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_no_tls_verify(!self.tls_verify);
        let conn = LdapConn::with_settings(settings, &self.endpoint)
            .map_err(|err| ConformError::connection(&self.endpoint, err.to_string()))?;
        debug!("connection established");
        Ok(Box::new(LdapConnection {
            conn,
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
        }))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct LdapConnection {
    conn: LdapConn,
    endpoint: String,
    timeout: Duration,
}

impl LdapConnection {
    fn timed(&mut self) -> &mut LdapConn {
        self.conn.with_timeout(self.timeout)
    }

    fn fault(&self, err: &LdapError) -> ConformError {
        ConformError::connection(&self.endpoint, err.to_string())
    }
}

fn diagnostic(result: &LdapResult) -> Diagnostic {
    Diagnostic::new(result.rc, result.text.clone()).with_matched(result.matched.clone())
}

fn value_set(values: &[String]) -> HashSet<&str> {
    values.iter().map(String::as_str).collect()
}

/// Converts a returned entry. A DN we cannot parse fails the search rather
/// than shrinking the result set.
fn to_entry(raw: SearchEntry) -> Result<Entry, ConformError> {
    let dn = Dn::parse(&raw.dn).map_err(|err| {
        warn!(dn = %raw.dn, error = %err, "server returned an unparseable DN");
        err
    })?;
    let mut attributes = Attributes::new();
    for (name, values) in raw.attrs {
        attributes.insert(&name, values);
    }
    Ok(Entry::new(dn, attributes))
}

impl Connection for LdapConnection {
    fn bind(&mut self, dn: &Dn, secret: &SecretString) -> Result<OpOutcome, ConformError> {
        let dn = dn.to_string();
        let result = self
            .timed()
            .simple_bind(&dn, secret.expose_secret())
            .map_err(|err| self.fault(&err))?;
        Ok(diagnostic(&result).into())
    }

    fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, ConformError> {
        let scope = match request.scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        };
        let base = request.base.to_string();
        let filter = request.filter.to_string();
        let attrs: Vec<&str> = request.attributes.iter().map(String::as_str).collect();
        let ldap3::SearchResult(entries, result) = self
            .timed()
            .search(&base, scope, &filter, attrs)
            .map_err(|err| self.fault(&err))?;
        let entries = entries
            .into_iter()
            .map(|entry| to_entry(SearchEntry::construct(entry)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SearchOutcome::new(entries, diagnostic(&result)))
    }

    fn add(&mut self, entry: &NewEntry) -> Result<OpOutcome, ConformError> {
        let dn = entry.dn.to_string();
        let mut attrs: Vec<(&str, HashSet<&str>)> = vec![(
            "objectClass",
            value_set(&entry.object_classes),
        )];
        attrs.extend(
            entry
                .attributes
                .iter()
                .map(|(name, values)| (name, value_set(values))),
        );
        let result = self
            .timed()
            .add(&dn, attrs)
            .map_err(|err| self.fault(&err))?;
        Ok(diagnostic(&result).into())
    }

    fn delete(&mut self, dn: &Dn) -> Result<OpOutcome, ConformError> {
        let dn = dn.to_string();
        let result = self.timed().delete(&dn).map_err(|err| self.fault(&err))?;
        Ok(diagnostic(&result).into())
    }

    fn modify(&mut self, dn: &Dn, changes: &[Modification]) -> Result<OpOutcome, ConformError> {
        let dn = dn.to_string();
        let mods: Vec<Mod<&str>> = changes
            .iter()
            .map(|change| {
                let values = value_set(&change.values);
                match change.op {
                    ModOp::Add => Mod::Add(change.attr.as_str(), values),
                    ModOp::Delete => Mod::Delete(change.attr.as_str(), values),
                    ModOp::Replace => Mod::Replace(change.attr.as_str(), values),
                }
            })
            .collect();
        let result = self
            .timed()
            .modify(&dn, mods)
            .map_err(|err| self.fault(&err))?;
        Ok(diagnostic(&result).into())
    }

    fn rename(&mut self, dn: &Dn, new_rdn: &Rdn) -> Result<OpOutcome, ConformError> {
        let dn = dn.to_string();
        let rdn = new_rdn.to_string();
        let result = self
            .timed()
            .modifydn(&dn, &rdn, true, None)
            .map_err(|err| self.fault(&err))?;
        Ok(diagnostic(&result).into())
    }

    fn change_password(
        &mut self,
        user: &Dn,
        old: Option<&SecretString>,
        new: &SecretString,
    ) -> Result<OpOutcome, ConformError> {
        let user = user.to_string();
        let exop = PasswordModify {
            user_id: Some(&user),
            old_pass: old.map(ExposeSecret::expose_secret),
            new_pass: Some(new.expose_secret()),
        };
        let ldap3::result::ExopResult(_, result) = self
            .timed()
            .extended(exop)
            .map_err(|err| self.fault(&err))?;
        Ok(diagnostic(&result).into())
    }

    fn root_dse(&mut self) -> Result<ServerInfo, ConformError> {
        let ldap3::SearchResult(entries, result) = self
            .timed()
            .search(
                "",
                Scope::Base,
                "(objectClass=*)",
                vec!["namingContexts", "supportedLDAPVersion"],
            )
            .map_err(|err| self.fault(&err))?;
        if result.rc != 0 {
            return Ok(ServerInfo::default());
        }
        let Some(raw) = entries.into_iter().next().map(SearchEntry::construct) else {
            return Ok(ServerInfo::default());
        };
        let lookup = |name: &str| {
            raw.attrs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, values)| values.clone())
                .unwrap_or_default()
        };
        Ok(ServerInfo {
            naming_contexts: lookup("namingContexts"),
            supported_versions: lookup("supportedLDAPVersion"),
        })
    }

    fn unbind(&mut self) -> Result<(), ConformError> {
        self.conn.unbind().map_err(|err| self.fault(&err))
    }
}
