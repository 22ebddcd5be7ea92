//! Principals and the registry that prepares them.
//!
//! A principal is an identity operations are attempted under. Capabilities
//! are not stored here: the expectation matrices define them.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::SecretString;
use tracing::{debug, info, instrument};

use crate::config::{AdminGroup, ConfigError, ConformConfig, DirectoryLayout};
use crate::directory::{Connector, Modification, rc};
use crate::dn::Dn;
use crate::error::ConformError;
use crate::session::DirectorySession;

/// Ids of the default roster.
pub mod roles {
    /// Unauthenticated connection.
    pub const ANONYMOUS: &str = "anonymous";
    /// Plain person.
    pub const USER: &str = "user";
    /// Person in the people admin group.
    pub const USER_PEOPLE_ADMIN: &str = "user-people-admin";
    /// Person in the applications admin group.
    pub const USER_APPS_ADMIN: &str = "user-apps-admin";
    /// Person in both admin groups.
    pub const USER_ADMIN: &str = "user-admin";
    /// Directory root.
    pub const ADMIN: &str = "admin";
    /// Plain application identity.
    pub const APP: &str = "app";
    /// Application in the people admin group.
    pub const APP_PEOPLE_ADMIN: &str = "app-people-admin";
    /// Application in the applications admin group.
    pub const APP_APPS_ADMIN: &str = "app-apps-admin";
    /// Application in both admin groups.
    pub const APP_ADMIN: &str = "app-admin";

    /// Every id, in roster order.
    pub const ALL: [&str; 10] = [
        ANONYMOUS,
        USER,
        USER_PEOPLE_ADMIN,
        USER_APPS_ADMIN,
        USER_ADMIN,
        ADMIN,
        APP,
        APP_PEOPLE_ADMIN,
        APP_APPS_ADMIN,
        APP_ADMIN,
    ];

    /// May write people and groups.
    pub const PEOPLE_WRITERS: [&str; 5] =
        [USER_PEOPLE_ADMIN, USER_ADMIN, ADMIN, APP_PEOPLE_ADMIN, APP_ADMIN];

    /// May write application identities.
    pub const APPS_WRITERS: [&str; 5] =
        [USER_APPS_ADMIN, USER_ADMIN, ADMIN, APP_APPS_ADMIN, APP_ADMIN];
}

/// Bind identity. The secret never appears in `Debug` or `Display`.
#[derive(Clone, Default)]
pub struct Credential {
    dn: Option<Dn>,
    secret: Option<SecretString>,
}

impl Credential {
    /// No bind at all.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            dn: None,
            secret: None,
        }
    }

    /// Simple bind as `dn`.
    #[must_use]
    pub const fn simple(dn: Dn, secret: SecretString) -> Self {
        Self {
            dn: Some(dn),
            secret: Some(secret),
        }
    }

    /// Simple bind as `dn` with no password.
    #[must_use]
    pub const fn without_secret(dn: Dn) -> Self {
        Self {
            dn: Some(dn),
            secret: None,
        }
    }

    /// Bind DN.
    #[must_use]
    pub const fn dn(&self) -> Option<&Dn> {
        self.dn.as_ref()
    }

    /// Bind secret.
    #[must_use]
    pub const fn secret(&self) -> Option<&SecretString> {
        self.secret.as_ref()
    }

    /// Returns `true` if no bind happens.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.dn.is_none()
    }

    /// Same secret, different DN.
    #[must_use]
    pub fn with_dn(&self, dn: Dn) -> Self {
        Self {
            dn: Some(dn),
            secret: self.secret.clone(),
        }
    }

    /// Same DN, different secret.
    #[must_use]
    pub fn with_secret(&self, secret: SecretString) -> Self {
        Self {
            dn: self.dn.clone(),
            secret: Some(secret),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("dn", &self.dn.as_ref().map(ToString::to_string))
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dn {
            Some(dn) => write!(f, "{dn}"),
            None => f.write_str("<anonymous>"),
        }
    }
}

/// A registered identity.
#[derive(Debug, Clone)]
pub struct Principal {
    id: String,
    description: String,
    credential: Credential,
    root: bool,
    grants: Vec<AdminGroup>,
    preseeded: bool,
}

impl Principal {
    /// Unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Description used in failure messages.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Bind identity.
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Bind DN, `None` for anonymous.
    #[must_use]
    pub const fn dn(&self) -> Option<&Dn> {
        self.credential.dn()
    }

    /// Returns `true` for the root identity.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.root
    }

    /// Returns `true` for the unauthenticated principal.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.credential.is_anonymous()
    }

    /// Groups granted to this principal.
    #[must_use]
    pub fn grants(&self) -> &[AdminGroup] {
        &self.grants
    }
}

/// The fixed set of principals for a run.
#[derive(Debug)]
pub struct PrincipalRegistry {
    principals: Vec<Principal>,
    root: Credential,
    layout: DirectoryLayout,
    prepared: AtomicBool,
}

impl PrincipalRegistry {
    /// Builds the registry from the configuration roster, reading secret
    /// overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when a principal has a DN without
    /// a secret or a DN that does not parse.
    pub fn from_config(config: &ConformConfig, layout: &DirectoryLayout) -> Result<Self, ConfigError> {
        Self::from_config_with(config, layout, |name| std::env::var(name).ok())
    }

    /// Like [`from_config`](Self::from_config), reading the environment
    /// through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_config`](Self::from_config).
    pub fn from_config_with(
        config: &ConformConfig,
        layout: &DirectoryLayout,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let root = Credential::simple(layout.root.clone(), config.root_secret_with(&lookup));
        let mut principals = Vec::with_capacity(config.principals.len());
        let mut seen = BTreeSet::new();
        for entry in &config.principals {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate principal id: {}",
                    entry.id
                )));
            }
            let credential = if entry.root {
                root.clone()
            } else if let Some(relative) = &entry.dn {
                let dn = Dn::parse(relative)
                    .map_err(|err| ConfigError::Validation(format!("principal {}: {err}", entry.id)))?
                    .under(&layout.base);
                let secret = entry
                    .secret_env
                    .as_deref()
                    .and_then(&lookup)
                    .or_else(|| entry.secret.clone())
                    .ok_or_else(|| {
                        ConfigError::Validation(format!("principal {} has no secret", entry.id))
                    })?;
                Credential::simple(dn, SecretString::from(secret))
            } else {
                Credential::anonymous()
            };
            principals.push(Principal {
                id: entry.id.clone(),
                description: entry.description.clone(),
                credential,
                root: entry.root,
                grants: entry.grants.clone(),
                preseeded: entry.preseeded,
            });
        }
        Ok(Self {
            principals,
            root,
            layout: layout.clone(),
            prepared: AtomicBool::new(false),
        })
    }

    /// Looks up a principal.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::UnknownPrincipal`] for an unregistered id.
    pub fn get(&self, id: &str) -> Result<&Principal, ConformError> {
        self.principals
            .iter()
            .find(|principal| principal.id == id)
            .ok_or_else(|| ConformError::UnknownPrincipal(id.to_string()))
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.principals.iter().any(|principal| principal.id == id)
    }

    /// Principals in roster order.
    pub fn iter(&self) -> impl Iterator<Item = &Principal> {
        self.principals.iter()
    }

    /// Ids in roster order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.principals.iter().map(Principal::id)
    }

    /// Number of principals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Returns `true` for an empty roster.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    /// Root credential used for setup, fixtures and privileged re-reads.
    #[must_use]
    pub const fn root(&self) -> &Credential {
        &self.root
    }

    /// Resolved directory layout.
    #[must_use]
    pub const fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Adds every granted principal to its admin groups as root.
    ///
    /// Runs once per registry; later calls return immediately. Members that
    /// are already present are left alone, and a concurrent
    /// `attributeOrValueExists` is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults and
    /// [`ConformError::Precondition`] when root cannot bind or a group
    /// cannot be updated.
    #[instrument(skip_all, fields(endpoint = connector.endpoint()))]
    pub fn ensure_prepared(&self, connector: &dyn Connector) -> Result<(), ConformError> {
        if self.prepared.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut session = DirectorySession::open(connector, &self.root)?;
        if !session.bound() {
            return Err(ConformError::precondition(
                "root",
                session.bind_outcome().diagnostic.to_string(),
            ));
        }
        for group in [AdminGroup::PeopleAdmin, AdminGroup::AppsAdmin] {
            self.grant(&mut session, group)?;
        }
        session.release()?;
        self.prepared.store(true, Ordering::Release);
        info!(principals = self.principals.len(), "principal preconditions established");
        Ok(())
    }

    fn grant(&self, session: &mut DirectorySession, group: AdminGroup) -> Result<(), ConformError> {
        let group_dn = self.layout.admin_group(group);
        let Some(entry) = session.read(group_dn)? else {
            return Err(ConformError::precondition(
                group_dn.to_string(),
                "admin group does not exist",
            ));
        };
        let present = entry.dn_values("member");
        let missing: Vec<String> = self
            .principals
            .iter()
            .filter(|principal| !principal.preseeded && principal.grants.contains(&group))
            .filter_map(Principal::dn)
            .filter(|dn| !present.contains(dn))
            .map(ToString::to_string)
            .collect();
        if missing.is_empty() {
            debug!(group = %group_dn, "grants already satisfied");
            return Ok(());
        }
        let outcome = session.modify(group_dn, &[Modification::add("member", missing.iter())])?;
        if outcome.success || outcome.diagnostic.code == rc::ATTRIBUTE_OR_VALUE_EXISTS {
            debug!(group = %group_dn, added = missing.len(), "grants applied");
            return Ok(());
        }
        Err(ConformError::precondition(
            group_dn.to_string(),
            outcome.diagnostic.to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;
    use crate::directory::memory::MemoryDirectory;

    fn setup() -> (ConformConfig, DirectoryLayout) {
        let config = ConformConfig::default();
        let layout = config.validate().unwrap();
        (config, layout)
    }

    #[test]
    fn test_default_roster() {
        let (config, layout) = setup();
        let registry = PrincipalRegistry::from_config(&config, &layout).unwrap();
        assert_eq!(registry.ids().collect::<Vec<_>>(), roles::ALL);
        assert!(registry.get(roles::ANONYMOUS).unwrap().is_anonymous());
        let admin = registry.get(roles::ADMIN).unwrap();
        assert!(admin.is_root());
        assert_eq!(admin.dn(), Some(&layout.root));
        assert_eq!(
            registry.get(roles::APP).unwrap().dn().unwrap().to_string(),
            "uid=fakeapp2,ou=applications,dc=ci,dc=example,dc=com"
        );
    }

    #[test]
    fn test_unknown_principal() {
        let (config, layout) = setup();
        let registry = PrincipalRegistry::from_config(&config, &layout).unwrap();
        assert!(matches!(
            registry.get("nobody"),
            Err(ConformError::UnknownPrincipal(id)) if id == "nobody"
        ));
    }

    #[test]
    fn test_secret_env_overrides_secret() {
        let (mut config, layout) = setup();
        config.principals[1].secret_env = Some("TUSER_SECRET".to_string());
        let env = HashMap::from([("TUSER_SECRET", "from-env")]);
        let registry = PrincipalRegistry::from_config_with(&config, &layout, |name| {
            env.get(name).map(ToString::to_string)
        })
        .unwrap();
        let secret = registry.get(roles::USER).unwrap().credential().secret().unwrap();
        assert_eq!(secret.expose_secret(), "from-env");
    }

    #[test]
    fn test_credential_debug_redacts() {
        let credential = Credential::simple(
            Dn::parse("uid=tuser,ou=people").unwrap(),
            SecretString::from("tuserPASS".to_string()),
        );
        let debug = format!("{credential:?}");
        assert!(!debug.contains("tuserPASS"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(credential.to_string(), "uid=tuser,ou=people");
    }

    #[test]
    fn test_ensure_prepared_is_idempotent() {
        let (config, layout) = setup();
        let directory = MemoryDirectory::reference(&config).unwrap();
        let registry = PrincipalRegistry::from_config(&config, &layout).unwrap();
        registry.ensure_prepared(&directory).unwrap();
        registry.ensure_prepared(&directory).unwrap();

        // A second registry finds everything in place and does not duplicate.
        let again = PrincipalRegistry::from_config(&config, &layout).unwrap();
        again.ensure_prepared(&directory).unwrap();

        let people = directory.snapshot(&layout.people_admin_group).unwrap();
        let members = people.get("member");
        assert_eq!(members.len(), 4);
        let apps = directory.snapshot(&layout.apps_admin_group).unwrap();
        assert_eq!(apps.get("member").len(), 4);
    }

    #[test]
    fn test_ensure_prepared_fails_without_root() {
        let (config, layout) = setup();
        let directory = MemoryDirectory::reference(&config).unwrap();
        let env = HashMap::from([("ROOT_LDAP_SECRET", "wrong")]);
        let registry = PrincipalRegistry::from_config_with(&config, &layout, |name| {
            env.get(name).map(ToString::to_string)
        })
        .unwrap();
        let err = registry.ensure_prepared(&directory).unwrap_err();
        assert!(matches!(err, ConformError::Precondition { .. }));
        assert!(err.is_fatal());
    }
}
