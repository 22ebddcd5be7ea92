//! Forward/reverse relationship consistency.
//!
//! Membership is written on the group (`member`, forward, authoritative)
//! and mirrored on the member (`memberOf`, reverse, derived). The store
//! must keep the two consistent on delete and rename, synchronously: the
//! checks here read right after the mutation and tolerate no lag.
//!
//! Every check reads through the session it is given, which should be
//! privileged so that visibility rules do not hide references.

use crate::directory::{ModOp, Modification};
use crate::dn::Dn;
use crate::error::{CaseError, CaseResult, ensure};
use crate::session::DirectorySession;

/// A forward attribute and the reverse attribute derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    /// Authoritative attribute on the holder (the group).
    pub forward: &'static str,
    /// Derived attribute on the target (the member).
    pub reverse: &'static str,
}

impl Relationship {
    /// Group membership.
    pub const MEMBERSHIP: Self = Self {
        forward: "member",
        reverse: "memberOf",
    };
}

/// Verifies referential integrity of one [`Relationship`].
#[derive(Debug, Clone, Copy)]
pub struct RelationshipIntegrityChecker {
    relationship: Relationship,
}

impl Default for RelationshipIntegrityChecker {
    fn default() -> Self {
        Self::new(Relationship::MEMBERSHIP)
    }
}

impl RelationshipIntegrityChecker {
    /// Creates a checker.
    #[must_use]
    pub const fn new(relationship: Relationship) -> Self {
        Self { relationship }
    }

    /// The relationship being checked.
    #[must_use]
    pub const fn relationship(&self) -> Relationship {
        self.relationship
    }

    /// Forward references held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns an assertion failure when `holder` cannot be read.
    pub fn forward(&self, session: &mut DirectorySession, holder: &Dn) -> CaseResult<Vec<Dn>> {
        let entry = session
            .read(holder)?
            .ok_or_else(|| CaseError::assertion(format!("{holder} is not readable")))?;
        Ok(entry.dn_values(self.relationship.forward))
    }

    /// Reverse references derived on `target`; empty when it is absent.
    ///
    /// # Errors
    ///
    /// Propagates transport faults.
    pub fn reverse(&self, session: &mut DirectorySession, target: &Dn) -> CaseResult<Vec<Dn>> {
        Ok(session
            .read(target)?
            .map(|entry| entry.dn_values(self.relationship.reverse))
            .unwrap_or_default())
    }

    /// A direct write of `holder` into `target`'s reverse attribute. Every
    /// ordinary principal must be refused this.
    #[must_use]
    pub fn reverse_write(&self, holder: &Dn) -> Modification {
        Modification {
            op: ModOp::Add,
            attr: self.relationship.reverse.to_string(),
            values: vec![holder.to_string()],
        }
    }

    /// Checks that `holder` references every DN in `present` and none in
    /// `absent`.
    ///
    /// # Errors
    ///
    /// Returns an assertion failure naming the offending reference.
    pub fn assert_forward(
        &self,
        session: &mut DirectorySession,
        holder: &Dn,
        present: &[Dn],
        absent: &[Dn],
    ) -> CaseResult {
        let references = self.forward(session, holder)?;
        for dn in present {
            ensure(references.contains(dn), || {
                format!(
                    "{holder} {} should reference {dn}, found [{}]",
                    self.relationship.forward,
                    join(&references)
                )
            })?;
        }
        for dn in absent {
            ensure(!references.contains(dn), || {
                format!(
                    "{holder} {} still references {dn}",
                    self.relationship.forward
                )
            })?;
        }
        Ok(())
    }

    /// Checks that every forward reference of `holder` is mirrored on the
    /// referenced entry.
    ///
    /// # Errors
    ///
    /// Returns an assertion failure for the first unmirrored reference.
    pub fn assert_mirrored(&self, session: &mut DirectorySession, holder: &Dn) -> CaseResult {
        for target in self.forward(session, holder)? {
            let reverse = self.reverse(session, &target)?;
            ensure(reverse.contains(holder), || {
                format!(
                    "{target} {} does not mirror {holder}, found [{}]",
                    self.relationship.reverse,
                    join(&reverse)
                )
            })?;
        }
        Ok(())
    }

    /// After `deleted` was removed: no holder references it any more.
    ///
    /// # Errors
    ///
    /// Returns an assertion failure naming the stale holder.
    pub fn assert_deleted(
        &self,
        session: &mut DirectorySession,
        deleted: &Dn,
        holders: &[Dn],
    ) -> CaseResult {
        ensure(session.read(deleted)?.is_none(), || {
            format!("{deleted} still exists")
        })?;
        for holder in holders {
            self.assert_forward(session, holder, &[], std::slice::from_ref(deleted))?;
        }
        Ok(())
    }

    /// After `old` was renamed to `new`: every holder references `new` and
    /// not `old`, and `new` mirrors every holder.
    ///
    /// # Errors
    ///
    /// Returns an assertion failure naming the stale holder.
    pub fn assert_renamed(
        &self,
        session: &mut DirectorySession,
        old: &Dn,
        new: &Dn,
        holders: &[Dn],
    ) -> CaseResult {
        for holder in holders {
            self.assert_forward(
                session,
                holder,
                std::slice::from_ref(new),
                std::slice::from_ref(old),
            )?;
        }
        let reverse = self.reverse(session, new)?;
        for holder in holders {
            ensure(reverse.contains(holder), || {
                format!(
                    "{new} {} lost {holder} after rename",
                    self.relationship.reverse
                )
            })?;
        }
        Ok(())
    }

    /// Checks that `target`'s reverse attribute still equals `before`.
    ///
    /// Used after a direct reverse write: refused writes must leave no
    /// trace, and a root write that reports success must not persist
    /// either.
    ///
    /// # Errors
    ///
    /// Returns an assertion failure showing both value sets.
    pub fn assert_reverse_unchanged(
        &self,
        session: &mut DirectorySession,
        target: &Dn,
        before: &[Dn],
    ) -> CaseResult {
        let mut now = self.reverse(session, target)?;
        let mut expected = before.to_vec();
        now.sort();
        expected.sort();
        ensure(now == expected, || {
            format!(
                "{target} {} changed from [{}] to [{}]",
                self.relationship.reverse,
                join(&expected),
                join(&now)
            )
        })
    }
}

fn join(dns: &[Dn]) -> String {
    dns.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConformConfig;
    use crate::directory::memory::MemoryDirectory;
    use crate::dn::Rdn;
    use crate::fixture::EntryFixtureManager;
    use crate::principal::PrincipalRegistry;

    fn setup() -> (MemoryDirectory, PrincipalRegistry) {
        let config = ConformConfig::default();
        let layout = config.validate().unwrap();
        (
            MemoryDirectory::reference(&config).unwrap(),
            PrincipalRegistry::from_config(&config, &layout).unwrap(),
        )
    }

    #[test]
    fn test_delete_and_rename_propagate() {
        let (directory, registry) = setup();
        let checker = RelationshipIntegrityChecker::default();
        let mut fixtures =
            EntryFixtureManager::open(&directory, registry.root(), registry.layout()).unwrap();
        let a = fixtures.create_person().unwrap().dn;
        let b = fixtures.create_person().unwrap().dn;
        let group = fixtures.create_group(&[a.clone(), b.clone()]).unwrap();
        let session = fixtures.session();
        checker.assert_mirrored(session, &group).unwrap();

        let renamed = a.with_rdn(Rdn::new("uid", "renamed-member"));
        assert!(session.rename(&a, renamed.rdn().unwrap()).unwrap().success);
        checker
            .assert_renamed(session, &a, &renamed, std::slice::from_ref(&group))
            .unwrap();

        assert!(session.delete(&b).unwrap().success);
        checker
            .assert_deleted(session, &b, std::slice::from_ref(&group))
            .unwrap();
        checker
            .assert_forward(session, &group, std::slice::from_ref(&renamed), &[])
            .unwrap();

        fixtures.track(renamed);
        fixtures.teardown().unwrap();
    }

    #[test]
    fn test_stale_reference_is_reported() {
        let (directory, registry) = setup();
        let checker = RelationshipIntegrityChecker::default();
        let mut fixtures =
            EntryFixtureManager::open(&directory, registry.root(), registry.layout()).unwrap();
        let a = fixtures.create_person().unwrap().dn;
        let group = fixtures.create_group(&[a.clone()]).unwrap();
        let err = checker
            .assert_forward(fixtures.session(), &group, &[], std::slice::from_ref(&a))
            .unwrap_err();
        assert!(matches!(err, CaseError::Assertion(msg) if msg.contains("still references")));
    }

    #[test]
    fn test_root_reverse_write_has_no_effect() {
        let (directory, registry) = setup();
        let checker = RelationshipIntegrityChecker::default();
        let mut fixtures =
            EntryFixtureManager::open(&directory, registry.root(), registry.layout()).unwrap();
        let person = fixtures.create_person().unwrap().dn;
        let group = fixtures.create_group(&[]).unwrap();
        let session = fixtures.session();
        let before = checker.reverse(session, &person).unwrap();
        let outcome = session
            .modify(&person, &[checker.reverse_write(&group)])
            .unwrap();
        assert!(outcome.success);
        checker
            .assert_reverse_unchanged(session, &person, &before)
            .unwrap();
    }
}
