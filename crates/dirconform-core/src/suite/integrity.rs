//! Membership integrity: the derived reverse attribute and the
//! referential-integrity rewrite of group members.

use super::{people_writers, refused};
use crate::dn::Dn;
use crate::error::{ConformError, ensure};
use crate::fixture::FixtureKind;
use crate::integrity::RelationshipIntegrityChecker;
use crate::matrix::hook;
use crate::principal::roles;
use crate::runner::{Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "integrity";

/// Scenarios of this suite.
#[must_use]
pub fn scenarios() -> Vec<Scenario> {
    vec![
        reverse_write(FixtureKind::Application),
        reverse_write(FixtureKind::Person),
        rename_member(),
        delete_member(),
        delete_group(),
    ]
}

fn checker() -> RelationshipIntegrityChecker {
    RelationshipIntegrityChecker::default()
}

/// Writes a group into the reverse attribute of an identity directly.
///
/// Root is expected to get a success that has no effect: the directory
/// derives the attribute and discards the write.
fn reverse_write(kind: FixtureKind) -> Scenario {
    let name = match kind {
        FixtureKind::Application => "reverse-write-application",
        _ => "reverse-write-person",
    };
    Scenario::new(
        SUITE,
        name,
        Operation::new(OperationKind::Modify, "memberOf of an identity", |ctx| {
            let target = ctx.data().dn("target")?.clone();
            let group = ctx.data().dn("group")?.clone();
            let change = checker().reverse_write(&group);
            Ok(ctx.session().modify(&target, &[change])?)
        }),
        refused().succeed([roles::ADMIN]),
    )
    .describe("nobody writes memberOf; it only follows group membership")
    .with_setup(hook(move |ctx| {
        let target = match kind {
            FixtureKind::Application => ctx.fixtures().create_application()?.dn,
            _ => ctx.fixtures().create_person()?.dn,
        };
        let group = ctx.fixtures().create_group(&[])?;
        let before = checker().reverse(ctx.admin(), &target)?;
        let data = ctx.data_mut();
        data.set_dn("target", target);
        data.set_dn("group", group);
        data.set_values("before", before.iter().map(ToString::to_string).collect());
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let target = ctx.data().dn("target")?.clone();
        let before = ctx
            .data()
            .values("before")?
            .iter()
            .map(String::as_str)
            .map(Dn::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConformError::from)?;
        checker().assert_reverse_unchanged(ctx.admin(), &target, &before)
    }))
}

fn rename_member() -> Scenario {
    Scenario::new(
        SUITE,
        "rename-member",
        Operation::new(OperationKind::Rename, "a person listed in a group", |ctx| {
            let member = ctx.data().dn("member")?.clone();
            let new_rdn = FixtureKind::Person.generate_rdn();
            let renamed = member.with_rdn(new_rdn.clone());
            ctx.fixtures().track(renamed.clone());
            ctx.data_mut().set_dn("renamed", renamed);
            Ok(ctx.session().rename(&member, &new_rdn)?)
        }),
        people_writers().skip([roles::ANONYMOUS]),
    )
    .describe("renaming a member rewrites every group that lists it")
    .with_setup(hook(|ctx| {
        let member = ctx.fixtures().create_person()?.dn;
        let other = ctx.fixtures().create_person()?.dn;
        let group = ctx.fixtures().create_group(&[member.clone(), other])?;
        let data = ctx.data_mut();
        data.set_dn("member", member);
        data.set_dn("group", group);
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let member = ctx.data().dn("member")?.clone();
        let renamed = ctx.data().dn("renamed")?.clone();
        let group = ctx.data().dn("group")?.clone();
        if ctx.succeeded() {
            checker().assert_renamed(ctx.admin(), &member, &renamed, &[group])
        } else {
            checker().assert_forward(ctx.admin(), &group, &[member], &[renamed])
        }
    }))
}

fn delete_member() -> Scenario {
    Scenario::new(
        SUITE,
        "delete-member",
        Operation::new(OperationKind::Delete, "a person listed in a group", |ctx| {
            let member = ctx.data().dn("member")?.clone();
            Ok(ctx.session().delete(&member)?)
        }),
        people_writers().skip([roles::ANONYMOUS]),
    )
    .describe("deleting a member drops it from every group and keeps the others")
    .with_setup(hook(|ctx| {
        let member = ctx.fixtures().create_person()?.dn;
        let other = ctx.fixtures().create_person()?.dn;
        let group = ctx.fixtures().create_group(&[member.clone(), other.clone()])?;
        let data = ctx.data_mut();
        data.set_dn("member", member);
        data.set_dn("other", other);
        data.set_dn("group", group);
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let member = ctx.data().dn("member")?.clone();
        let other = ctx.data().dn("other")?.clone();
        let group = ctx.data().dn("group")?.clone();
        if ctx.succeeded() {
            checker().assert_deleted(ctx.admin(), &member, std::slice::from_ref(&group))?;
            checker().assert_forward(ctx.admin(), &group, &[other], &[])
        } else {
            checker().assert_forward(ctx.admin(), &group, &[member, other], &[])
        }
    }))
}

fn delete_group() -> Scenario {
    Scenario::new(
        SUITE,
        "delete-group-membership",
        Operation::new(OperationKind::Delete, "one of two groups of a person", |ctx| {
            let group = ctx.data().dn("deleted")?.clone();
            Ok(ctx.session().delete(&group)?)
        }),
        people_writers(),
    )
    .describe("deleting a group drops it from its members' memberOf and keeps the others")
    .with_setup(hook(|ctx| {
        let member = ctx.fixtures().create_person()?.dn;
        let kept = ctx.fixtures().create_group(std::slice::from_ref(&member))?;
        let deleted = ctx.fixtures().create_group(std::slice::from_ref(&member))?;
        let data = ctx.data_mut();
        data.set_dn("member", member);
        data.set_dn("kept", kept);
        data.set_dn("deleted", deleted);
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let member = ctx.data().dn("member")?.clone();
        let kept = ctx.data().dn("kept")?.clone();
        let deleted = ctx.data().dn("deleted")?.clone();
        let reverse = checker().reverse(ctx.admin(), &member)?;
        ensure(reverse.contains(&kept), || {
            format!("{member} memberOf lost {kept}")
        })?;
        let gone = ctx.succeeded();
        ensure(reverse.contains(&deleted) != gone, || {
            if gone {
                format!("{member} memberOf still lists deleted {deleted}")
            } else {
                format!("{member} memberOf dropped {deleted} although it was not deleted")
            }
        })
    }))
}
