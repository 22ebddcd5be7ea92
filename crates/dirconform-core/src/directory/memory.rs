//! In-process reference directory.
//!
//! `MemoryDirectory` behaves like the directory the default catalog
//! describes: simple bind against `userPassword`, a subtree access policy,
//! minimal schema checks, the referential-integrity overlay rewriting
//! `member` on delete and rename, and a `memberOf` attribute derived from
//! group membership. It backs `dirconform selftest` and the test suite; it
//! is not a server.
//!
//! The access policy is pluggable through [`AccessPolicy`] so tests can
//! swap in a deviating policy and watch the runner attribute failures.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{
    Connection, Connector, Diagnostic, ModOp, Modification, NewEntry, OpOutcome, SearchOutcome,
    SearchRequest, SearchScope, ServerInfo, rc,
};
use crate::config::{AdminGroup, ConfigError, ConformConfig, DirectoryLayout, PrincipalConfig};
use crate::dn::{Dn, Rdn};
use crate::entry::{Attributes, Entry, OBJECT_CLASS};
use crate::error::ConformError;
use crate::probe::{ProbeOutcome, ProbeRequest, QueryProbe};

const MEMBER: &str = "member";
const MEMBER_OF: &str = "memberOf";
const USER_PASSWORD: &str = "userPassword";
const LOCKED_TIME: &str = "pwdAccountLockedTime";

/// Endpoint label reported by the reference directory.
pub const MEMORY_ENDPOINT: &str = "memory://reference";

// =============================================================================
// Access policy
// =============================================================================

/// The identity an operation runs as, with its resolved group memberships.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    dn: Option<Dn>,
    root: bool,
    people_admin: bool,
    apps_admin: bool,
}

impl Subject {
    /// Unauthenticated subject.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            dn: None,
            root: false,
            people_admin: false,
            apps_admin: false,
        }
    }

    /// Bound DN, if any.
    #[must_use]
    pub const fn dn(&self) -> Option<&Dn> {
        self.dn.as_ref()
    }

    /// Returns `true` for the root identity.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.root
    }

    /// Returns `true` if the subject belongs to `group`.
    #[must_use]
    pub const fn is_member(&self, group: AdminGroup) -> bool {
        match group {
            AdminGroup::PeopleAdmin => self.people_admin,
            AdminGroup::AppsAdmin => self.apps_admin,
        }
    }

    /// Returns `true` if the subject is bound as `target`.
    #[must_use]
    pub fn is_self(&self, target: &Dn) -> bool {
        self.dn.as_ref() == Some(target)
    }
}

/// What a write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget<'a> {
    /// The entry as a whole (add, delete, rename).
    Entry,
    /// One attribute (modify, password change).
    Attribute(&'a str),
}

/// Read and write decisions of the reference directory.
pub trait AccessPolicy: Send + Sync {
    /// May `subject` see `target`?
    fn can_read(&self, layout: &DirectoryLayout, subject: &Subject, target: &Dn) -> bool;

    /// May `subject` write `what` on `target`?
    fn can_write(
        &self,
        layout: &DirectoryLayout,
        subject: &Subject,
        target: &Dn,
        what: WriteTarget<'_>,
    ) -> bool;
}

/// The policy the default catalog expects.
///
/// | Subtree | Read | Write |
/// |---|---|---|
/// | base entry | any admin group | root |
/// | people, groups | people admins, application identities | people admins |
/// | applications | application admins | application admins |
/// | policies | people admins | root |
///
/// Root reads and writes everything. Every bound identity reads its own
/// entry; people may also change their own password.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferencePolicy;

impl AccessPolicy for ReferencePolicy {
    fn can_read(&self, layout: &DirectoryLayout, subject: &Subject, target: &Dn) -> bool {
        if subject.is_root() {
            return true;
        }
        let Some(dn) = subject.dn() else {
            return false;
        };
        if dn == target {
            return true;
        }
        let people_admin = subject.is_member(AdminGroup::PeopleAdmin);
        let apps_admin = subject.is_member(AdminGroup::AppsAdmin);
        if target.is_within(&layout.people) || target.is_within(&layout.groups) {
            people_admin || dn.is_descendant_of(&layout.applications)
        } else if target.is_within(&layout.applications) {
            apps_admin
        } else if target.is_within(&layout.policies) {
            people_admin
        } else if target.is_within(&layout.base) {
            people_admin || apps_admin
        } else {
            false
        }
    }

    fn can_write(
        &self,
        layout: &DirectoryLayout,
        subject: &Subject,
        target: &Dn,
        what: WriteTarget<'_>,
    ) -> bool {
        if subject.is_root() {
            return true;
        }
        if subject.dn().is_none() {
            return false;
        }
        if subject.is_self(target)
            && target.is_descendant_of(&layout.people)
            && matches!(what, WriteTarget::Attribute(attr) if attr.eq_ignore_ascii_case(USER_PASSWORD))
        {
            return true;
        }
        if target.is_descendant_of(&layout.people) || target.is_descendant_of(&layout.groups) {
            subject.is_member(AdminGroup::PeopleAdmin)
        } else if target.is_descendant_of(&layout.applications) {
            subject.is_member(AdminGroup::AppsAdmin)
        } else {
            false
        }
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Default)]
struct Store {
    entries: BTreeMap<Dn, Entry>,
}

impl Store {
    fn is_group_member(&self, group: &Dn, dn: &Dn) -> bool {
        self.entries
            .get(group)
            .is_some_and(|entry| entry.dn_values(MEMBER).iter().any(|member| member == dn))
    }

    fn has_children(&self, dn: &Dn) -> bool {
        self.entries.keys().any(|key| key.parent().as_ref() == Some(dn))
    }

    /// Adds the derived `memberOf` values.
    fn materialize(&self, entry: &Entry) -> Entry {
        let mut view = entry.clone();
        view.attributes_mut().remove(MEMBER_OF);
        let groups: Vec<String> = self
            .entries
            .values()
            .filter(|candidate| {
                candidate
                    .dn_values(MEMBER)
                    .iter()
                    .any(|member| member == entry.dn())
            })
            .map(|group| group.dn().to_string())
            .collect();
        if !groups.is_empty() {
            view.attributes_mut().insert(MEMBER_OF, groups);
        }
        view
    }

    /// Referential integrity: drops `old` from every `member` list, or
    /// rewrites it to `new`.
    fn rewrite_references(&mut self, old: &Dn, new: Option<&Dn>) -> usize {
        let old_text = old.to_string();
        let mut touched = 0;
        for entry in self.entries.values_mut() {
            if !entry.attributes().contains_value(MEMBER, &old_text) {
                continue;
            }
            entry
                .attributes_mut()
                .remove_values(MEMBER, [old_text.as_str()]);
            if let Some(new) = new {
                entry.attributes_mut().extend(MEMBER, [new.to_string()]);
            }
            touched += 1;
        }
        touched
    }
}

/// Required attributes per object class.
fn schema_violation(entry: &Entry) -> Option<String> {
    const REQUIRED: &[(&str, &[&str])] = &[
        ("person", &["cn", "sn"]),
        ("inetOrgPerson", &["cn", "sn"]),
        ("groupOfNames", &["cn", MEMBER]),
        ("pwdPolicy", &["pwdAttribute"]),
        ("organizationalUnit", &["ou"]),
    ];
    if entry.get(OBJECT_CLASS).is_empty() {
        return Some("no objectClass attribute".to_string());
    }
    for (class, required) in REQUIRED {
        if !entry.has_object_class(class) {
            continue;
        }
        for attr in *required {
            if entry.get(attr).is_empty() {
                return Some(format!("object class '{class}' requires attribute '{attr}'"));
            }
        }
    }
    None
}

struct Shared {
    layout: DirectoryLayout,
    root_secret: SecretString,
    policy: Box<dyn AccessPolicy>,
    store: Mutex<Store>,
}

impl Shared {
    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process reference directory.
///
/// Clones share the same store.
#[derive(Clone)]
pub struct MemoryDirectory {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDirectory")
            .field("base", &self.shared.layout.base.to_string())
            .field("entries", &self.shared.store().entries.len())
            .finish_non_exhaustive()
    }
}

impl MemoryDirectory {
    /// Creates an empty directory governed by `policy`.
    #[must_use]
    pub fn new(
        layout: DirectoryLayout,
        root_secret: SecretString,
        policy: impl AccessPolicy + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                layout,
                root_secret,
                policy: Box::new(policy),
                store: Mutex::new(Store::default()),
            }),
        }
    }

    /// Builds the reference directory for `config`: layout, principal
    /// entries and admin groups, governed by [`ReferencePolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the configuration does not
    /// validate.
    pub fn reference(config: &ConformConfig) -> Result<Self, ConfigError> {
        Self::reference_with_policy(config, ReferencePolicy)
    }

    /// Like [`reference`](Self::reference) with a custom policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the configuration does not
    /// validate.
    pub fn reference_with_policy(
        config: &ConformConfig,
        policy: impl AccessPolicy + 'static,
    ) -> Result<Self, ConfigError> {
        let layout = config.validate()?;
        let directory = Self::new(layout, config.root_secret(), policy);
        directory.seed(&config.principals)?;
        Ok(directory)
    }

    /// Seeds the organization layout, the principal entries and the admin
    /// groups. Only pre-seeded grants are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when a principal DN does not parse.
    pub fn seed(&self, principals: &[PrincipalConfig]) -> Result<(), ConfigError> {
        let layout = &self.shared.layout;
        let mut store = self.shared.store();

        let base_value = layout
            .base
            .rdn()
            .map(|rdn| rdn.value().to_string())
            .unwrap_or_default();
        insert(
            &mut store,
            Entry::new(
                layout.base.clone(),
                Attributes::new()
                    .with(OBJECT_CLASS, ["top", "dcObject", "organization"])
                    .with("dc", [base_value])
                    .with("o", [layout.organization.clone()]),
            ),
        );
        for ou in [
            &layout.people,
            &layout.groups,
            &layout.applications,
            &layout.policies,
        ] {
            let name = ou.rdn().map(|rdn| rdn.value().to_string()).unwrap_or_default();
            insert(
                &mut store,
                Entry::new(
                    ou.clone(),
                    Attributes::new()
                        .with(OBJECT_CLASS, ["organizationalUnit"])
                        .with("ou", [name]),
                ),
            );
        }

        let mut preseeded: BTreeMap<AdminGroup, Vec<String>> = BTreeMap::new();
        for principal in principals {
            let Some(relative) = &principal.dn else {
                continue;
            };
            let dn = Dn::parse(relative)
                .map_err(|err| ConfigError::Validation(format!("principal {}: {err}", principal.id)))?
                .under(&layout.base);
            let uid = dn.rdn().map(|rdn| rdn.value().to_string()).unwrap_or_default();
            let mut attributes = Attributes::new()
                .with(OBJECT_CLASS, ["inetOrgPerson"])
                .with("uid", [uid.clone()])
                .with("cn", [uid.clone()])
                .with("sn", [uid]);
            if let Some(secret) = &principal.secret {
                attributes.insert(USER_PASSWORD, [secret.clone()]);
            }
            if principal.preseeded {
                for group in &principal.grants {
                    preseeded.entry(*group).or_default().push(dn.to_string());
                }
            }
            insert(&mut store, Entry::new(dn, attributes));
        }

        for group in [AdminGroup::PeopleAdmin, AdminGroup::AppsAdmin] {
            let dn = layout.admin_group(group).clone();
            let cn = dn.rdn().map(|rdn| rdn.value().to_string()).unwrap_or_default();
            insert(
                &mut store,
                Entry::new(
                    dn,
                    Attributes::new()
                        .with(OBJECT_CLASS, ["groupOfNames"])
                        .with("cn", [cn])
                        .with(MEMBER, preseeded.remove(&group).unwrap_or_default()),
                ),
            );
        }
        debug!(entries = store.entries.len(), "reference directory seeded");
        Ok(())
    }

    /// Privileged view of `dn`, derived attributes included.
    #[must_use]
    pub fn snapshot(&self, dn: &Dn) -> Option<Entry> {
        let store = self.shared.store();
        store.entries.get(dn).map(|entry| store.materialize(entry))
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.store().entries.len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The directory layout.
    #[must_use]
    pub fn layout(&self) -> &DirectoryLayout {
        &self.shared.layout
    }

    fn open(&self) -> MemoryConnection {
        MemoryConnection {
            shared: Arc::clone(&self.shared),
            identity: Identity::Anonymous,
        }
    }
}

fn insert(store: &mut Store, entry: Entry) {
    store.entries.insert(entry.dn().clone(), entry);
}

impl Connector for MemoryDirectory {
    fn connect(&self) -> Result<Box<dyn Connection>, ConformError> {
        Ok(Box::new(self.open()))
    }

    fn endpoint(&self) -> &str {
        MEMORY_ENDPOINT
    }
}

// =============================================================================
// Connection
// =============================================================================

#[derive(Debug, Clone)]
enum Identity {
    Anonymous,
    Root,
    Entry(Dn),
}

struct MemoryConnection {
    shared: Arc<Shared>,
    identity: Identity,
}

fn denied() -> OpOutcome {
    Diagnostic::new(rc::INSUFFICIENT_ACCESS_RIGHTS, "access denied").into()
}

fn no_such_object(dn: &Dn) -> OpOutcome {
    Diagnostic::new(rc::NO_SUCH_OBJECT, format!("no such object: {dn}")).into()
}

impl MemoryConnection {
    fn subject(&self, store: &Store) -> Subject {
        let layout = &self.shared.layout;
        match &self.identity {
            Identity::Anonymous => Subject::anonymous(),
            Identity::Root => Subject {
                dn: Some(layout.root.clone()),
                root: true,
                people_admin: false,
                apps_admin: false,
            },
            Identity::Entry(dn) => Subject {
                dn: Some(dn.clone()),
                root: false,
                people_admin: store.is_group_member(&layout.people_admin_group, dn),
                apps_admin: store.is_group_member(&layout.apps_admin_group, dn),
            },
        }
    }

    fn can_write(&self, subject: &Subject, target: &Dn, what: WriteTarget<'_>) -> bool {
        self.shared
            .policy
            .can_write(&self.shared.layout, subject, target, what)
    }

    fn can_read(&self, subject: &Subject, target: &Dn) -> bool {
        self.shared
            .policy
            .can_read(&self.shared.layout, subject, target)
    }

    /// Checks access on the whole target for every attribute touched, then
    /// handles the derived reverse attribute.
    fn apply_modifications(
        &self,
        store: &mut Store,
        subject: &Subject,
        dn: &Dn,
        changes: &[Modification],
    ) -> OpOutcome {
        for change in changes {
            if !self.can_write(subject, dn, WriteTarget::Attribute(&change.attr)) {
                return denied();
            }
        }
        let Some(current) = store.entries.get(dn) else {
            return no_such_object(dn);
        };
        let mut updated = current.clone();
        for change in changes {
            if change.attr.eq_ignore_ascii_case(MEMBER_OF) {
                if subject.is_root() {
                    debug!(%dn, "discarding root write to derived memberOf");
                    continue;
                }
                return Diagnostic::new(
                    rc::CONSTRAINT_VIOLATION,
                    "memberOf is maintained by the directory",
                )
                .into();
            }
            let attrs = updated.attributes_mut();
            match change.op {
                ModOp::Replace => {
                    if change.values.is_empty() {
                        attrs.remove(&change.attr);
                    } else {
                        attrs.insert(&change.attr, change.values.iter().cloned());
                    }
                },
                ModOp::Add => {
                    if change
                        .values
                        .iter()
                        .any(|value| attrs.contains_value(&change.attr, value))
                    {
                        return Diagnostic::new(
                            rc::ATTRIBUTE_OR_VALUE_EXISTS,
                            format!("{}: value already exists", change.attr),
                        )
                        .into();
                    }
                    attrs.extend(&change.attr, change.values.iter().cloned());
                },
                ModOp::Delete => {
                    if !attrs.contains(&change.attr)
                        || change
                            .values
                            .iter()
                            .any(|value| !attrs.contains_value(&change.attr, value))
                    {
                        return Diagnostic::new(
                            rc::NO_SUCH_ATTRIBUTE,
                            format!("{}: no such value", change.attr),
                        )
                        .into();
                    }
                    if change.values.is_empty() {
                        attrs.remove(&change.attr);
                    } else {
                        attrs.remove_values(&change.attr, change.values.iter().map(String::as_str));
                    }
                },
            }
        }
        if let Some(reason) = schema_violation(&updated) {
            return Diagnostic::new(rc::OBJECT_CLASS_VIOLATION, reason).into();
        }
        store.entries.insert(dn.clone(), updated);
        Diagnostic::success().into()
    }

    /// Strips what the subject may not see and projects attributes.
    fn present(&self, subject: &Subject, mut entry: Entry, wanted: &[String]) -> Entry {
        if !subject.is_root() && !subject.is_self(entry.dn()) {
            entry.attributes_mut().remove(USER_PASSWORD);
        }
        if wanted.is_empty() || wanted.iter().any(|name| name == "*") {
            return entry;
        }
        let mut projected = Attributes::new();
        for name in wanted {
            let values = entry.get(name);
            if !values.is_empty() {
                projected.insert(name, values.iter().cloned());
            }
        }
        Entry::new(entry.dn().clone(), projected)
    }
}

impl Connection for MemoryConnection {
    fn bind(&mut self, dn: &Dn, secret: &SecretString) -> Result<OpOutcome, ConformError> {
        self.identity = Identity::Anonymous;
        if secret.expose_secret().is_empty() {
            return Ok(Diagnostic::new(
                rc::UNWILLING_TO_PERFORM,
                "unauthenticated bind (DN with no password) disallowed",
            )
            .into());
        }
        let invalid =
            || -> OpOutcome { Diagnostic::new(rc::INVALID_CREDENTIALS, "invalid credentials").into() };
        if *dn == self.shared.layout.root {
            if secret.expose_secret() == self.shared.root_secret.expose_secret() {
                self.identity = Identity::Root;
                return Ok(Diagnostic::success().into());
            }
            return Ok(invalid());
        }
        let store = self.shared.store();
        let Some(entry) = store.entries.get(dn) else {
            return Ok(invalid());
        };
        if entry.attributes().contains(LOCKED_TIME) {
            return Ok(invalid());
        }
        if entry.first(USER_PASSWORD) != Some(secret.expose_secret()) {
            return Ok(invalid());
        }
        drop(store);
        self.identity = Identity::Entry(dn.clone());
        Ok(Diagnostic::success().into())
    }

    fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, ConformError> {
        let store = self.shared.store();
        let subject = self.subject(&store);
        if !store.entries.contains_key(&request.base) || !self.can_read(&subject, &request.base) {
            return Ok(SearchOutcome::empty(
                Diagnostic::new(rc::NO_SUCH_OBJECT, "no such object")
                    .with_matched(self.shared.layout.base.to_string()),
            ));
        }
        let entries = store
            .entries
            .values()
            .filter(|entry| match request.scope {
                SearchScope::Base => entry.dn() == &request.base,
                SearchScope::OneLevel => entry.dn().parent().as_ref() == Some(&request.base),
                SearchScope::Subtree => entry.dn().is_within(&request.base),
            })
            .filter(|entry| self.can_read(&subject, entry.dn()))
            .map(|entry| store.materialize(entry))
            .filter(|entry| request.filter.matches(entry))
            .map(|entry| self.present(&subject, entry, &request.attributes))
            .collect();
        Ok(SearchOutcome::new(entries, Diagnostic::success()))
    }

    fn add(&mut self, entry: &NewEntry) -> Result<OpOutcome, ConformError> {
        let mut store = self.shared.store();
        let subject = self.subject(&store);
        if !self.can_write(&subject, &entry.dn, WriteTarget::Entry) {
            return Ok(denied());
        }
        if store.entries.contains_key(&entry.dn) {
            return Ok(Diagnostic::new(rc::ENTRY_ALREADY_EXISTS, "entry already exists").into());
        }
        let parent_exists = entry
            .dn
            .parent()
            .is_some_and(|parent| store.entries.contains_key(&parent));
        if !parent_exists {
            return Ok(no_such_object(&entry.dn));
        }
        let mut new = entry.clone().into_entry();
        if new.attributes().contains(MEMBER_OF) {
            if !subject.is_root() {
                return Ok(Diagnostic::new(
                    rc::CONSTRAINT_VIOLATION,
                    "memberOf is maintained by the directory",
                )
                .into());
            }
            new.attributes_mut().remove(MEMBER_OF);
        }
        if let Some(reason) = schema_violation(&new) {
            return Ok(Diagnostic::new(rc::OBJECT_CLASS_VIOLATION, reason).into());
        }
        debug!(dn = %entry.dn, "entry added");
        insert(&mut store, new);
        Ok(Diagnostic::success().into())
    }

    fn delete(&mut self, dn: &Dn) -> Result<OpOutcome, ConformError> {
        let mut store = self.shared.store();
        let subject = self.subject(&store);
        if !self.can_write(&subject, dn, WriteTarget::Entry) {
            return Ok(denied());
        }
        if !store.entries.contains_key(dn) {
            return Ok(no_such_object(dn));
        }
        if store.has_children(dn) {
            return Ok(Diagnostic::new(rc::NOT_ALLOWED_ON_NON_LEAF, "subordinate objects exist").into());
        }
        store.entries.remove(dn);
        let touched = store.rewrite_references(dn, None);
        debug!(%dn, references = touched, "entry deleted");
        Ok(Diagnostic::success().into())
    }

    fn modify(&mut self, dn: &Dn, changes: &[Modification]) -> Result<OpOutcome, ConformError> {
        let mut store = self.shared.store();
        let subject = self.subject(&store);
        Ok(self.apply_modifications(&mut store, &subject, dn, changes))
    }

    fn rename(&mut self, dn: &Dn, new_rdn: &Rdn) -> Result<OpOutcome, ConformError> {
        let mut store = self.shared.store();
        let subject = self.subject(&store);
        let target = dn.with_rdn(new_rdn.clone());
        if !self.can_write(&subject, dn, WriteTarget::Entry)
            || !self.can_write(&subject, &target, WriteTarget::Entry)
        {
            return Ok(denied());
        }
        let Some(mut entry) = store.entries.get(dn).cloned() else {
            return Ok(no_such_object(dn));
        };
        if store.entries.contains_key(&target) {
            return Ok(Diagnostic::new(rc::ENTRY_ALREADY_EXISTS, "entry already exists").into());
        }
        if store.has_children(dn) {
            return Ok(Diagnostic::new(rc::NOT_ALLOWED_ON_NON_LEAF, "subordinate objects exist").into());
        }
        if let Some(old) = dn.rdn() {
            entry
                .attributes_mut()
                .remove_values(old.attr(), [old.value()]);
        }
        entry
            .attributes_mut()
            .extend(new_rdn.attr(), [new_rdn.value().to_string()]);
        entry.set_dn(target.clone());
        store.entries.remove(dn);
        insert(&mut store, entry);
        let touched = store.rewrite_references(dn, Some(&target));
        debug!(%dn, %target, references = touched, "entry renamed");
        Ok(Diagnostic::success().into())
    }

    fn change_password(
        &mut self,
        user: &Dn,
        old: Option<&SecretString>,
        new: &SecretString,
    ) -> Result<OpOutcome, ConformError> {
        let mut store = self.shared.store();
        let subject = self.subject(&store);
        if subject.dn().is_none() {
            return Ok(Diagnostic::new(rc::UNWILLING_TO_PERFORM, "password change requires a bound identity").into());
        }
        if !self.can_write(&subject, user, WriteTarget::Attribute(USER_PASSWORD)) {
            return Ok(denied());
        }
        let Some(entry) = store.entries.get(user) else {
            return Ok(no_such_object(user));
        };
        if let Some(old) = old {
            if entry.first(USER_PASSWORD) != Some(old.expose_secret()) {
                return Ok(Diagnostic::new(rc::UNWILLING_TO_PERFORM, "unwilling to verify old password").into());
            }
        }
        let change = Modification::replace(USER_PASSWORD, [new.expose_secret().to_string()]);
        Ok(self.apply_modifications(&mut store, &subject, user, &[change]))
    }

    fn root_dse(&mut self) -> Result<ServerInfo, ConformError> {
        Ok(ServerInfo {
            naming_contexts: vec![self.shared.layout.base.to_string()],
            supported_versions: vec!["3".to_string()],
        })
    }

    fn unbind(&mut self) -> Result<(), ConformError> {
        self.identity = Identity::Anonymous;
        Ok(())
    }
}

// =============================================================================
// Out-of-band probe
// =============================================================================

impl QueryProbe for MemoryDirectory {
    /// Mirrors `ldapsearch` exit codes: the result code of the failing
    /// bind or search, zero otherwise.
    fn query(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ConformError> {
        let mut conn = self.open();
        if let Some((dn, secret)) = &request.bind {
            let outcome = conn.bind(dn, secret)?;
            if !outcome.success {
                return Ok(ProbeOutcome::exited(i32::try_from(outcome.diagnostic.code).unwrap_or(1)));
            }
        }
        let search = SearchRequest::subtree(request.base.clone())
            .with_filter(request.filter.clone())
            .with_attributes(request.attributes.iter().cloned());
        let outcome = conn.search(&search)?;
        Ok(ProbeOutcome::exited(
            i32::try_from(outcome.diagnostic.code).unwrap_or(1),
        ))
    }

    fn program(&self) -> &str {
        MEMORY_ENDPOINT
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::filter::Filter;

    fn person_filter() -> Filter {
        Filter::object_class("inetOrgPerson")
    }

    fn directory() -> MemoryDirectory {
        MemoryDirectory::reference(&ConformConfig::default()).unwrap()
    }

    fn dn(text: &str) -> Dn {
        Dn::parse(text).unwrap()
    }

    fn secret(text: &str) -> SecretString {
        SecretString::from(text.to_string())
    }

    fn bound(directory: &MemoryDirectory, who: &str, password: &str) -> Box<dyn Connection> {
        let mut conn = directory.connect().unwrap();
        assert!(conn.bind(&dn(who), &secret(password)).unwrap().success);
        conn
    }

    const BASE: &str = "dc=ci,dc=example,dc=com";
    const ROOT: &str = "cn=admin,dc=ci,dc=example,dc=com";
    const TUSER: &str = "uid=tuser,ou=people,dc=ci,dc=example,dc=com";
    const ADMIN: &str = "uid=test_default_admin,ou=people,dc=ci,dc=example,dc=com";

    #[test]
    fn test_seed_grants_only_preseeded_members() {
        let directory = directory();
        let group = directory
            .snapshot(&dn("cn=ldap_people_admin,ou=groups,dc=ci,dc=example,dc=com"))
            .unwrap();
        assert_eq!(group.get("member"), [ADMIN.to_string()]);
        let admin = directory.snapshot(&dn(ADMIN)).unwrap();
        assert_eq!(admin.get("memberOf").len(), 2);
    }

    #[test]
    fn test_bind_outcomes() {
        let directory = directory();
        let mut conn = directory.connect().unwrap();
        assert!(conn.bind(&dn(TUSER), &secret("tuserPASS")).unwrap().success);
        let wrong = conn.bind(&dn(TUSER), &secret("nope")).unwrap();
        assert_eq!(wrong.diagnostic.code, rc::INVALID_CREDENTIALS);
        let empty = conn.bind(&dn(TUSER), &secret("")).unwrap();
        assert_eq!(empty.diagnostic.code, rc::UNWILLING_TO_PERFORM);
        assert!(conn.bind(&dn(ROOT), &secret("secret")).unwrap().success);
        assert!(!conn.bind(&dn(&format!("cn=fake_username,{BASE}")), &secret("secret")).unwrap().success);
    }

    #[test]
    fn test_search_visibility() {
        let directory = directory();
        let people = SearchRequest::subtree(dn(&format!("ou=people,{BASE}")));

        let mut anonymous = directory.connect().unwrap();
        let outcome = anonymous.search(&people).unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.diagnostic.code, rc::NO_SUCH_OBJECT);

        let mut user = bound(&directory, TUSER, "tuserPASS");
        assert!(!user.search(&people).unwrap().matched);
        assert!(user.search(&SearchRequest::entry(dn(TUSER))).unwrap().matched);

        let mut admin = bound(&directory, ADMIN, "test password");
        let outcome = admin.search(&people).unwrap();
        assert!(outcome.matched);
        assert!(outcome.entries.iter().all(|entry| !entry.attributes().contains("userPassword")
            || entry.dn() == &dn(ADMIN)));
    }

    #[test]
    fn test_write_policy_and_schema() {
        let directory = directory();
        let person = NewEntry::new(dn(&format!("uid=x,ou=people,{BASE}")), ["inetOrgPerson"])
            .attr("uid", ["x"])
            .attr("cn", ["x"])
            .attr("sn", ["x"]);

        let mut user = bound(&directory, TUSER, "tuserPASS");
        assert_eq!(user.add(&person).unwrap().diagnostic.code, rc::INSUFFICIENT_ACCESS_RIGHTS);

        let mut admin = bound(&directory, ADMIN, "test password");
        let incomplete = NewEntry::new(dn(&format!("uid=y,ou=people,{BASE}")), ["inetOrgPerson"]);
        assert_eq!(admin.add(&incomplete).unwrap().diagnostic.code, rc::OBJECT_CLASS_VIOLATION);
        assert!(admin.add(&person).unwrap().success);
        assert_eq!(admin.add(&person).unwrap().diagnostic.code, rc::ENTRY_ALREADY_EXISTS);

        let policy = NewEntry::new(dn(&format!("cn=p,ou=policies,{BASE}")), ["person", "pwdPolicy"])
            .attr("cn", ["p"])
            .attr("sn", ["p"])
            .attr("pwdAttribute", ["userPassword"]);
        assert!(!admin.add(&policy).unwrap().success);
        let mut root = bound(&directory, ROOT, "secret");
        assert!(root.add(&policy).unwrap().success);
    }

    #[test]
    fn test_config_database_is_not_found_for_root() {
        let directory = directory();
        let mut root = bound(&directory, ROOT, "secret");
        let outcome = root
            .modify(
                &dn("olcDatabase={1}mdb,cn=config"),
                &[Modification::replace("olcRootPW", ["test"])],
            )
            .unwrap();
        assert_eq!(outcome.diagnostic.code, rc::NO_SUCH_OBJECT);
    }

    #[test]
    fn test_refint_and_member_of() {
        let directory = directory();
        let mut root = bound(&directory, ROOT, "secret");
        let group = dn(&format!("cn=g,ou=groups,{BASE}"));
        assert!(root
            .add(&NewEntry::new(group.clone(), ["groupOfNames"])
                .attr("cn", ["g"])
                .attr("member", [TUSER, ADMIN]))
            .unwrap()
            .success);
        assert!(directory
            .snapshot(&dn(TUSER))
            .unwrap()
            .attributes()
            .contains_value("memberOf", &group.to_string()));

        let renamed = dn(&format!("uid=tuser-renamed,ou=people,{BASE}"));
        assert!(root.rename(&dn(TUSER), &Rdn::new("uid", "tuser-renamed")).unwrap().success);
        let members = directory.snapshot(&group).unwrap();
        assert!(members.attributes().contains_value("member", &renamed.to_string()));
        assert!(!members.attributes().contains_value("member", TUSER));

        assert!(root.delete(&renamed).unwrap().success);
        let members = directory.snapshot(&group).unwrap();
        assert_eq!(members.get("member"), [ADMIN.to_string()]);
    }

    #[test]
    fn test_member_of_writes() {
        let directory = directory();
        let group = format!("cn=ldap_apps_admin,ou=groups,{BASE}");
        let change = [Modification::replace("memberOf", [group.as_str()])];

        let mut admin = bound(&directory, ADMIN, "test password");
        let outcome = admin.modify(&dn(TUSER), &change).unwrap();
        assert_eq!(outcome.diagnostic.code, rc::CONSTRAINT_VIOLATION);

        let mut root = bound(&directory, ROOT, "secret");
        assert!(root.modify(&dn(TUSER), &change).unwrap().success);
        let tuser = directory.snapshot(&dn(TUSER)).unwrap();
        assert!(!tuser.attributes().contains("memberOf"));
    }

    #[test]
    fn test_own_password_change() {
        let directory = directory();
        let mut user = bound(&directory, TUSER, "tuserPASS");
        let outcome = user
            .change_password(&dn(TUSER), Some(&secret("tuserPASS")), &secret("n3w"))
            .unwrap();
        assert!(outcome.success);
        let mut again = directory.connect().unwrap();
        assert!(again.bind(&dn(TUSER), &secret("n3w")).unwrap().success);
        assert!(!again.bind(&dn(TUSER), &secret("tuserPASS")).unwrap().success);
    }

    #[test]
    fn test_locked_account_cannot_bind() {
        let directory = directory();
        let mut root = bound(&directory, ROOT, "secret");
        assert!(root
            .modify(&dn(TUSER), &[Modification::add("pwdAccountLockedTime", ["000001010000Z"])])
            .unwrap()
            .success);
        let mut conn = directory.connect().unwrap();
        assert!(!conn.bind(&dn(TUSER), &secret("tuserPASS")).unwrap().success);
    }

    #[test]
    fn test_probe_exit_codes() {
        let directory = directory();
        let anonymous = ProbeRequest::new(dn(&format!("ou=people,{BASE}")), person_filter());
        assert_eq!(directory.query(&anonymous).unwrap().exit_code, Some(32));

        let bad = anonymous.clone().bind_as(dn(TUSER), secret("wrong"));
        assert_eq!(directory.query(&bad).unwrap().exit_code, Some(49));

        let own = ProbeRequest::new(dn(TUSER), person_filter()).bind_as(dn(TUSER), secret("tuserPASS"));
        assert!(directory.query(&own).unwrap().success);
    }
}
