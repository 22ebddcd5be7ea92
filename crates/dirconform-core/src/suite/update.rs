//! Attribute updates, configuration writes and password changes.
//!
//! Setup hooks snapshot what the operation may change (`old`) and the
//! operation records what it wrote (`new`); post hooks compare the
//! privileged view against one or the other. Values changed on shared
//! entries are restored by the fixture manager at teardown.

use secrecy::ExposeSecret;
use uuid::Uuid;

use super::{
    apps_writers, binds, create_fixture, expect_values, own_dn, people_writers,
    privileged_values, refused, root_only, slug,
};
use crate::directory::{Modification, OpOutcome};
use crate::entry::Attributes;
use crate::error::{CaseResult, ensure};
use crate::fixture::{FixtureKind, generate_secret};
use crate::integrity::RelationshipIntegrityChecker;
use crate::matrix::{Expectation, ExpectationMatrix, Hook, hook};
use crate::principal::{Credential, roles};
use crate::runner::{CaseContext, Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "update";

/// Scenarios of this suite.
#[must_use]
pub fn scenarios() -> Vec<Scenario> {
    vec![
        own_cn(),
        attribute(FixtureKind::Person, "cn", people_writers()),
        attribute(FixtureKind::Group, "description", people_writers()),
        group_member(),
        attribute(FixtureKind::Application, "cn", apps_writers()),
        attribute(FixtureKind::Policy, "sn", root_only()),
        config_access(),
        config_root_password(),
        own_password(),
        password(FixtureKind::Person, people_writers()),
        password(FixtureKind::Application, apps_writers()),
    ]
}

/// Who may change attributes of their own entry.
fn self_writers() -> ExpectationMatrix {
    refused()
        .succeed([
            roles::USER_PEOPLE_ADMIN,
            roles::USER_ADMIN,
            roles::APP_APPS_ADMIN,
            roles::APP_ADMIN,
        ])
        .skip([roles::ANONYMOUS, roles::ADMIN])
}

// =============================================================================
// Plain attributes
// =============================================================================

/// Replaces `attr` on the recorded target with a fresh value.
fn replace_value(ctx: &mut CaseContext<'_>, attr: &str, value: String) -> CaseResult<OpOutcome> {
    let dn = ctx.data().dn("target")?.clone();
    ctx.data_mut().set_values("new", vec![value.clone()]);
    Ok(ctx.session().modify(&dn, &[Modification::replace(attr, [value])])?)
}

/// Compares `attr` on the recorded target with `new` or `old`.
fn values_follow(attr: &'static str) -> Hook {
    hook(move |ctx| {
        let dn = ctx.data().dn("target")?.clone();
        let new = ctx.data().values("new")?.to_vec();
        let old = ctx.data().values("old")?.to_vec();
        expect_values(ctx, &dn, attr, &new, &old)
    })
}

fn own_cn() -> Scenario {
    Scenario::new(
        SUITE,
        "update-own-cn",
        Operation::new(OperationKind::Modify, "cn of the principal's own entry", |ctx| {
            replace_value(ctx, "cn", "Name change".to_string())
        }),
        self_writers(),
    )
    .describe("only identities administering their own subtree rename themselves")
    .with_setup(hook(|ctx| {
        let dn = own_dn(ctx)?;
        let old = ctx.fixtures().remember(&dn, "cn")?;
        let data = ctx.data_mut();
        data.set_dn("target", dn);
        data.set_values("old", old);
        Ok(())
    }))
    .with_check(values_follow("cn"))
}

fn attribute(kind: FixtureKind, attr: &'static str, matrix: ExpectationMatrix) -> Scenario {
    Scenario::new(
        SUITE,
        format!("update-{}-{}", slug(kind), attr.to_ascii_lowercase()),
        Operation::new(
            OperationKind::Modify,
            format!("{attr} of a {}", slug(kind)),
            move |ctx| replace_value(ctx, attr, format!("{}-{}", kind.prefix(), Uuid::new_v4())),
        ),
        matrix,
    )
    .describe(format!("only the owners of the {} subtree change {attr}", slug(kind)))
    .with_setup(hook(move |ctx| {
        let dn = create_fixture(ctx, kind)?;
        let old = privileged_values(ctx, &dn, attr)?;
        let data = ctx.data_mut();
        data.set_dn("target", dn);
        data.set_values("old", old);
        Ok(())
    }))
    .with_check(values_follow(attr))
}

fn group_member() -> Scenario {
    Scenario::new(
        SUITE,
        "update-group-member",
        Operation::new(OperationKind::Modify, "member of a group", |ctx| {
            let group = ctx.data().dn("target")?.clone();
            let added = [
                ctx.data().dn("application")?.to_string(),
                ctx.data().dn("person")?.to_string(),
            ];
            Ok(ctx
                .session()
                .modify(&group, &[Modification::add("member", added)])?)
        }),
        people_writers(),
    )
    .describe("people administrators add members to groups")
    .with_setup(hook(|ctx| {
        let fixtures = ctx.fixtures();
        let first = fixtures.create_person()?.dn;
        let group = fixtures.create_group(std::slice::from_ref(&first))?;
        let person = fixtures.create_person()?.dn;
        let application = fixtures.create_application()?.dn;
        let data = ctx.data_mut();
        data.set_dn("first", first);
        data.set_dn("target", group);
        data.set_dn("person", person);
        data.set_dn("application", application);
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let group = ctx.data().dn("target")?.clone();
        let first = ctx.data().dn("first")?.clone();
        let added = [
            ctx.data().dn("application")?.clone(),
            ctx.data().dn("person")?.clone(),
        ];
        let checker = RelationshipIntegrityChecker::default();
        if ctx.succeeded() {
            let mut present = added.to_vec();
            present.push(first);
            checker.assert_forward(ctx.admin(), &group, &present, &[])?;
            checker.assert_mirrored(ctx.admin(), &group)
        } else {
            checker.assert_forward(ctx.admin(), &group, &[first], &added)
        }
    }))
}

// =============================================================================
// Configuration database
// =============================================================================

fn config_access() -> Scenario {
    Scenario::new(
        SUITE,
        "update-config-access",
        Operation::new(OperationKind::Modify, "access rules of the database", |ctx| {
            let rule = format!("{{100}}to dn.subtree=\"{}\" by self write", ctx.layout().people);
            let database = ctx.layout().config_database.clone();
            Ok(ctx
                .session()
                .modify(&database, &[Modification::add("olcAccess", [rule])])?)
        }),
        refused(),
    )
    .describe("no principal, root included, rewrites the access rules")
}

fn config_root_password() -> Scenario {
    Scenario::new(
        SUITE,
        "update-config-root-password",
        Operation::new(OperationKind::Modify, "root password of the database", |ctx| {
            let secret = generate_secret();
            let database = ctx.layout().config_database.clone();
            Ok(ctx.session().modify(
                &database,
                &[Modification::replace("olcRootPW", [secret.expose_secret()])],
            )?)
        }),
        refused(),
    )
    .describe("no principal, root included, replaces the root password")
}

// =============================================================================
// Passwords
// =============================================================================

fn own_password() -> Scenario {
    Scenario::new(
        SUITE,
        "update-own-password",
        Operation::new(OperationKind::PasswordModify, "of the principal's own entry", |ctx| {
            let dn = own_dn(ctx)?;
            let new = ctx.data().secret("new")?.clone();
            let old = ctx.principal().credential().secret().cloned();
            Ok(ctx.session().change_password(&dn, old.as_ref(), &new)?)
        }),
        refused()
            .succeed([
                roles::USER,
                roles::USER_PEOPLE_ADMIN,
                roles::USER_APPS_ADMIN,
                roles::USER_ADMIN,
                roles::APP_APPS_ADMIN,
                roles::APP_ADMIN,
            ])
            .set([roles::ANONYMOUS, roles::ADMIN], Expectation::Skip),
    )
    .describe("people and application administrators change their own password")
    .with_setup(hook(|ctx| {
        let dn = own_dn(ctx)?;
        ctx.fixtures().remember(&dn, "userPassword")?;
        ctx.data_mut().set_secret("new", generate_secret());
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let credential = ctx.principal().credential().clone();
        let new = credential.with_secret(ctx.data().secret("new")?.clone());
        if !ctx.succeeded() {
            ensure(binds(ctx, &credential)?, || {
                "refused password change still broke the old password".to_string()
            })?;
            return ensure(!binds(ctx, &new)?, || {
                "refused password change installed the new password".to_string()
            });
        }
        ensure(binds(ctx, &new)?, || "new password does not bind".to_string())?;
        ensure(!binds(ctx, &credential)?, || {
            "old password still binds after change".to_string()
        })?;
        let dn = own_dn(ctx)?;
        let old = credential
            .secret()
            .map(|secret| secret.expose_secret().to_string())
            .unwrap_or_default();
        let reset = ctx
            .admin()
            .modify(&dn, &[Modification::replace("userPassword", [old])])?;
        ensure(reset.success, || format!("password reset refused: {}", reset.diagnostic))?;
        ensure(binds(ctx, &credential)?, || {
            "old password does not bind after reset".to_string()
        })
    }))
}

fn password(kind: FixtureKind, matrix: ExpectationMatrix) -> Scenario {
    Scenario::new(
        SUITE,
        format!("update-{}-password", slug(kind)),
        Operation::new(OperationKind::Modify, format!("userPassword of a {}", slug(kind)), |ctx| {
            let dn = ctx.data().dn("target")?.clone();
            let new = ctx.data().secret("new")?.expose_secret().to_string();
            Ok(ctx
                .session()
                .modify(&dn, &[Modification::replace("userPassword", [new])])?)
        }),
        matrix,
    )
    .describe(format!(
        "only the owners of the {} subtree set passwords under a dedicated policy",
        slug(kind)
    ))
    .with_setup(hook(move |ctx| {
        let policy = ctx.fixtures().create_policy()?;
        let extra = Attributes::new().with("pwdPolicySubentry", [policy.to_string()]);
        let identity = ctx.fixtures().create_identity(kind, extra)?;
        let data = ctx.data_mut();
        data.set_dn("target", identity.dn);
        data.set_secret("old", identity.secret);
        data.set_secret("new", generate_secret());
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let dn = ctx.data().dn("target")?.clone();
        let key = if ctx.succeeded() { "new" } else { "old" };
        let credential = Credential::simple(dn, ctx.data().secret(key)?.clone());
        ensure(binds(ctx, &credential)?, || {
            format!("the {key} password does not bind")
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let names: Vec<String> = scenarios().iter().map(|s| s.name().to_string()).collect();
        assert!(names.contains(&"update-person-cn".to_string()));
        assert!(names.contains(&"update-group-description".to_string()));
        assert!(names.contains(&"update-policy-sn".to_string()));
        assert!(names.contains(&"update-application-password".to_string()));
    }

    #[test]
    fn test_self_writers() {
        let matrix = self_writers();
        assert_eq!(matrix.expectation(roles::USER), Expectation::Fail);
        assert_eq!(matrix.expectation(roles::USER_APPS_ADMIN), Expectation::Fail);
        assert_eq!(matrix.expectation(roles::APP_PEOPLE_ADMIN), Expectation::Fail);
        assert_eq!(matrix.expectation(roles::APP_APPS_ADMIN), Expectation::Succeed);
        assert_eq!(matrix.expectation(roles::ADMIN), Expectation::Skip);
    }
}
