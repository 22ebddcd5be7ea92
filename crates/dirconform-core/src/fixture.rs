//! Ephemeral directory entries with guaranteed cleanup.
//!
//! Every fixture gets a generated identifier, so scenarios never share
//! entries. Cleanup actions are registered when the entry is created (or
//! the value snapshotted), not at the end of a case, and run last-in
//! first-out from [`EntryFixtureManager::teardown`] or on drop.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DirectoryLayout;
use crate::directory::{Connector, Modification, NewEntry, ResultKind};
use crate::dn::{Dn, Rdn};
use crate::entry::Attributes;
use crate::error::{CaseError, CaseResult, ConformError};
use crate::principal::Credential;
use crate::session::DirectorySession;

/// Object classes of generated people.
pub const PERSON_CLASSES: [&str; 3] = ["top", "person", "inetOrgPerson"];
/// Object classes of generated groups.
pub const GROUP_CLASSES: [&str; 2] = ["top", "groupOfNames"];
/// Object classes of generated password policies.
pub const POLICY_CLASSES: [&str; 3] = ["top", "person", "pwdPolicy"];

/// Kinds of generated entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureKind {
    /// Person under the people subtree.
    Person,
    /// Application identity under the applications subtree.
    Application,
    /// Group under the groups subtree.
    Group,
    /// Password policy under the policies subtree.
    Policy,
}

impl FixtureKind {
    /// Prefix of generated identifiers.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Person => "user",
            Self::Application => "app",
            Self::Group => "group",
            Self::Policy => "policy",
        }
    }

    /// Naming attribute of generated entries.
    #[must_use]
    pub const fn naming_attr(self) -> &'static str {
        match self {
            Self::Person | Self::Application => "uid",
            Self::Group | Self::Policy => "cn",
        }
    }

    /// Subtree the entries live in.
    #[must_use]
    pub const fn container(self, layout: &DirectoryLayout) -> &Dn {
        match self {
            Self::Person => &layout.people,
            Self::Application => &layout.applications,
            Self::Group => &layout.groups,
            Self::Policy => &layout.policies,
        }
    }

    /// A fresh, unused DN of this kind.
    #[must_use]
    pub fn generate(self, layout: &DirectoryLayout) -> Dn {
        self.container(layout).child(self.generate_rdn())
    }

    /// A fresh RDN of this kind, for renames.
    #[must_use]
    pub fn generate_rdn(self) -> Rdn {
        Rdn::new(
            self.naming_attr(),
            format!("{}-{}", self.prefix(), Uuid::new_v4()),
        )
    }
}

/// Generates a random secret for fixture identities.
#[must_use]
pub fn generate_secret() -> SecretString {
    SecretString::from(format!("pw-{}", Uuid::new_v4().simple()))
}

/// A created identity and its secret.
#[derive(Debug, Clone)]
pub struct IdentityFixture {
    /// Entry DN.
    pub dn: Dn,
    /// Bind secret.
    pub secret: SecretString,
}

impl IdentityFixture {
    /// Bind credential for the fixture.
    #[must_use]
    pub fn credential(&self) -> Credential {
        Credential::simple(self.dn.clone(), self.secret.clone())
    }
}

#[derive(Debug)]
enum Cleanup {
    Delete(Dn),
    Restore { dn: Dn, attr: String, values: Vec<String> },
    RemoveValues { dn: Dn, attr: String, values: Vec<String> },
}

/// Creates and tears down fixtures under a root session.
#[derive(Debug)]
pub struct EntryFixtureManager {
    session: DirectorySession,
    layout: DirectoryLayout,
    cleanup: Vec<Cleanup>,
}

impl EntryFixtureManager {
    /// Opens the privileged session fixtures are created with.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults and
    /// [`ConformError::Precondition`] when root cannot bind.
    pub fn open(
        connector: &dyn Connector,
        root: &Credential,
        layout: &DirectoryLayout,
    ) -> Result<Self, ConformError> {
        let session = DirectorySession::open(connector, root)?;
        if !session.bound() {
            return Err(ConformError::precondition(
                "root",
                session.bind_outcome().diagnostic.to_string(),
            ));
        }
        Ok(Self {
            session,
            layout: layout.clone(),
            cleanup: Vec::new(),
        })
    }

    /// The privileged session, for re-reads in hooks.
    pub fn session(&mut self) -> &mut DirectorySession {
        &mut self.session
    }

    /// Number of pending cleanup actions.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.cleanup.len()
    }

    /// Creates a person with a generated uid and secret.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Fixture`] when the directory refuses the entry.
    pub fn create_person(&mut self) -> CaseResult<IdentityFixture> {
        self.create_identity(FixtureKind::Person, Attributes::new())
    }

    /// Creates a person carrying `extra`. Without `secret` the person has no
    /// password.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Fixture`] when the directory refuses the entry.
    pub fn create_person_with(
        &mut self,
        secret: Option<&SecretString>,
        extra: Attributes,
    ) -> CaseResult<Dn> {
        let dn = FixtureKind::Person.generate(&self.layout);
        let mut entry = person_entry(&dn);
        if let Some(secret) = secret {
            entry = entry.attr("userPassword", [secret.expose_secret()]);
        }
        for (name, values) in &extra {
            entry.attributes.insert(name, values.iter().cloned());
        }
        self.add(entry)?;
        Ok(dn)
    }

    /// Creates an application identity with a generated uid and secret.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Fixture`] when the directory refuses the entry.
    pub fn create_application(&mut self) -> CaseResult<IdentityFixture> {
        self.create_identity(FixtureKind::Application, Attributes::new())
    }

    /// Creates an identity of `kind` with extra attributes.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Fixture`] when the directory refuses the entry.
    pub fn create_identity(
        &mut self,
        kind: FixtureKind,
        extra: Attributes,
    ) -> CaseResult<IdentityFixture> {
        let dn = kind.generate(&self.layout);
        let secret = generate_secret();
        let mut entry = person_entry(&dn).attr("userPassword", [secret.expose_secret()]);
        for (name, values) in &extra {
            entry.attributes.insert(name, values.iter().cloned());
        }
        self.add(entry)?;
        Ok(IdentityFixture { dn, secret })
    }

    /// Creates a group. A group needs at least one member, so a person is
    /// generated when `members` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Fixture`] when the directory refuses an entry.
    pub fn create_group(&mut self, members: &[Dn]) -> CaseResult<Dn> {
        let members: Vec<String> = if members.is_empty() {
            vec![self.create_person()?.dn.to_string()]
        } else {
            members.iter().map(ToString::to_string).collect()
        };
        let dn = FixtureKind::Group.generate(&self.layout);
        let entry = NewEntry::new(dn.clone(), GROUP_CLASSES)
            .attr("cn", [rdn_value(&dn)])
            .attr("description", ["generated group"])
            .attr("member", members);
        self.add(entry)?;
        Ok(dn)
    }

    /// Creates a password policy.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Fixture`] when the directory refuses the entry.
    pub fn create_policy(&mut self) -> CaseResult<Dn> {
        let dn = FixtureKind::Policy.generate(&self.layout);
        self.add(policy_entry(&dn))?;
        Ok(dn)
    }

    /// Adds an arbitrary entry and registers its deletion.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Fixture`] when the directory refuses the entry.
    pub fn add(&mut self, entry: NewEntry) -> CaseResult {
        let outcome = self.session.add(&entry)?;
        if !outcome.success {
            return Err(CaseError::fixture(&entry.dn, &outcome.diagnostic));
        }
        debug!(dn = %entry.dn, "fixture created");
        self.cleanup.push(Cleanup::Delete(entry.dn));
        Ok(())
    }

    /// Registers deletion of an entry the operation under test may create
    /// or move to. A missing entry at teardown is fine.
    pub fn track(&mut self, dn: Dn) {
        self.cleanup.push(Cleanup::Delete(dn));
    }

    /// Reads the current values of `attr` and registers restoring them.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::Assertion`] when the entry is not readable.
    pub fn remember(&mut self, dn: &Dn, attr: &str) -> CaseResult<Vec<String>> {
        let entry = self
            .session
            .read(dn)?
            .ok_or_else(|| CaseError::assertion(format!("cannot snapshot {attr} of missing {dn}")))?;
        let values = entry.get(attr).to_vec();
        self.cleanup.push(Cleanup::Restore {
            dn: dn.clone(),
            attr: attr.to_string(),
            values: values.clone(),
        });
        Ok(values)
    }

    /// Registers removal of `values` from `attr` if they are present at
    /// teardown.
    pub fn remove_later(&mut self, dn: &Dn, attr: &str, values: Vec<String>) {
        self.cleanup.push(Cleanup::RemoveValues {
            dn: dn.clone(),
            attr: attr.to_string(),
            values,
        });
    }

    /// Runs every pending cleanup action, newest first. Safe to call more
    /// than once.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    /// Directory refusals are logged and skipped.
    pub fn teardown(&mut self) -> Result<(), ConformError> {
        while let Some(action) = self.cleanup.pop() {
            self.undo(&action)?;
        }
        Ok(())
    }

    fn undo(&mut self, action: &Cleanup) -> Result<(), ConformError> {
        let (dn, outcome) = match action {
            Cleanup::Delete(dn) => (dn, self.session.delete(dn)?),
            Cleanup::Restore { dn, attr, values } => {
                (dn, self.session.modify(dn, &[Modification::replace(attr, values.iter())])?)
            },
            Cleanup::RemoveValues { dn, attr, values } => {
                let Some(entry) = self.session.read(dn)? else {
                    return Ok(());
                };
                let present: Vec<&String> = values
                    .iter()
                    .filter(|value| entry.attributes().contains_value(attr, value))
                    .collect();
                if present.is_empty() {
                    return Ok(());
                }
                (dn, self.session.modify(dn, &[Modification::delete(attr, present)])?)
            },
        };
        if !outcome.success && outcome.diagnostic.kind != ResultKind::NotFound {
            warn!(%dn, diagnostic = %outcome.diagnostic, "fixture cleanup refused");
        } else if outcome.success {
            debug!(%dn, "fixture cleaned up");
        }
        Ok(())
    }
}

impl Drop for EntryFixtureManager {
    fn drop(&mut self) {
        if self.cleanup.is_empty() {
            return;
        }
        if let Err(err) = self.teardown() {
            warn!(error = %err, left = self.cleanup.len(), "fixture teardown aborted");
        }
    }
}

/// Minimal valid person payload; the naming value doubles as cn and sn.
#[must_use]
pub fn person_entry(dn: &Dn) -> NewEntry {
    let name = rdn_value(dn);
    NewEntry::new(dn.clone(), PERSON_CLASSES)
        .attr("uid", [name.clone()])
        .attr("cn", [name.clone()])
        .attr("sn", [name])
}

/// Minimal valid password-policy payload.
#[must_use]
pub fn policy_entry(dn: &Dn) -> NewEntry {
    let name = rdn_value(dn);
    NewEntry::new(dn.clone(), POLICY_CLASSES)
        .attr("cn", [name.clone()])
        .attr("sn", [name])
        .attr("pwdAttribute", ["userPassword"])
        .attr("pwdMinLength", ["1"])
}

fn rdn_value(dn: &Dn) -> String {
    dn.rdn().map(|rdn| rdn.value().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConformConfig;
    use crate::directory::memory::MemoryDirectory;
    use crate::principal::PrincipalRegistry;

    fn setup() -> (MemoryDirectory, PrincipalRegistry) {
        let config = ConformConfig::default();
        let layout = config.validate().unwrap();
        let directory = MemoryDirectory::reference(&config).unwrap();
        let registry = PrincipalRegistry::from_config(&config, &layout).unwrap();
        (directory, registry)
    }

    fn manager(directory: &MemoryDirectory, registry: &PrincipalRegistry) -> EntryFixtureManager {
        EntryFixtureManager::open(directory, registry.root(), registry.layout()).unwrap()
    }

    #[test]
    fn test_generated_dns_are_unique_and_placed() {
        let (_, registry) = setup();
        let layout = registry.layout();
        let a = FixtureKind::Group.generate(layout);
        let b = FixtureKind::Group.generate(layout);
        assert_ne!(a, b);
        assert!(a.is_descendant_of(&layout.groups));
        assert!(a.to_string().starts_with("cn=group-"));
    }

    #[test]
    fn test_every_kind_is_created_and_removed() {
        let (directory, registry) = setup();
        let before = directory.len();
        let mut fixtures = manager(&directory, &registry);
        let person = fixtures.create_person().unwrap();
        let app = fixtures.create_application().unwrap();
        let group = fixtures.create_group(&[person.dn.clone()]).unwrap();
        let policy = fixtures.create_policy().unwrap();
        for dn in [&person.dn, &app.dn, &group, &policy] {
            assert!(directory.snapshot(dn).is_some(), "{dn} missing");
        }
        fixtures.teardown().unwrap();
        assert_eq!(directory.len(), before);
        fixtures.teardown().unwrap();
    }

    #[test]
    fn test_group_without_members_gets_one() {
        let (directory, registry) = setup();
        let before = directory.len();
        {
            let mut fixtures = manager(&directory, &registry);
            let group = fixtures.create_group(&[]).unwrap();
            let entry = directory.snapshot(&group).unwrap();
            assert_eq!(entry.get("member").len(), 1);
        }
        assert_eq!(directory.len(), before);
    }

    #[test]
    fn test_drop_runs_cleanup_after_panic() {
        let (directory, registry) = setup();
        let before = directory.len();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut fixtures = manager(&directory, &registry);
            fixtures.create_person().unwrap();
            panic!("case failed");
        }));
        assert!(result.is_err());
        assert_eq!(directory.len(), before);
    }

    #[test]
    fn test_remember_restores_value() {
        let (directory, registry) = setup();
        let tuser = registry.get("user").unwrap().dn().unwrap().clone();
        let mut fixtures = manager(&directory, &registry);
        let before = fixtures.remember(&tuser, "cn").unwrap();
        fixtures
            .session()
            .modify(&tuser, &[Modification::replace("cn", ["changed"])])
            .unwrap();
        fixtures.teardown().unwrap();
        assert_eq!(directory.snapshot(&tuser).unwrap().get("cn"), before.as_slice());
    }

    #[test]
    fn test_refused_fixture_is_case_error() {
        let (directory, registry) = setup();
        let mut fixtures = manager(&directory, &registry);
        let orphan = registry
            .layout()
            .people
            .child(Rdn::new("ou", "missing"))
            .child(Rdn::new("uid", "x"));
        let err = fixtures.add(person_entry(&orphan)).unwrap_err();
        assert!(matches!(err, CaseError::Fixture { .. }));
        assert_eq!(fixtures.pending(), 0);
    }
}
