//! Entry creation per subtree.

use super::{expect_presence, label, privileged_values, slug, writers};
use crate::directory::NewEntry;
use crate::dn::Dn;
use crate::error::{CaseResult, ensure};
use crate::fixture::{FixtureKind, GROUP_CLASSES, person_entry, policy_entry};
use crate::matrix::hook;
use crate::runner::{CaseContext, Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "create";

/// Scenarios of this suite.
#[must_use]
pub fn scenarios() -> Vec<Scenario> {
    [
        FixtureKind::Person,
        FixtureKind::Group,
        FixtureKind::Application,
        FixtureKind::Policy,
    ]
    .into_iter()
    .map(create)
    .collect()
}

/// Attribute and value the post hook looks for on a created entry.
const fn marker(kind: FixtureKind) -> (&'static str, &'static str) {
    match kind {
        FixtureKind::Person => ("cn", "Fake User"),
        FixtureKind::Application => ("cn", "Fake app"),
        FixtureKind::Group => ("description", "test group"),
        FixtureKind::Policy => ("pwdAttribute", "userPassword"),
    }
}

fn payload(ctx: &mut CaseContext<'_>, kind: FixtureKind, dn: &Dn) -> CaseResult<NewEntry> {
    let (attr, value) = marker(kind);
    let entry = match kind {
        FixtureKind::Person => person_entry(dn)
            .attr("mobile", ["1111"])
            .attr("givenName", ["User"])
            .attr("o", [ctx.layout().organization.clone()]),
        FixtureKind::Application => person_entry(dn),
        FixtureKind::Group => {
            let member = ctx.data().dn("member")?;
            NewEntry::new(dn.clone(), GROUP_CLASSES)
                .attr("cn", [dn.rdn().map(|rdn| rdn.value().to_string()).unwrap_or_default()])
                .attr("member", [member.to_string()])
        },
        FixtureKind::Policy => policy_entry(dn),
    };
    Ok(entry.attr(attr, [value]))
}

fn create(kind: FixtureKind) -> Scenario {
    let scenario = Scenario::new(
        SUITE,
        format!("create-{}", slug(kind)),
        Operation::new(OperationKind::Add, label(kind), move |ctx| {
            let dn = kind.generate(ctx.layout());
            ctx.fixtures().track(dn.clone());
            ctx.data_mut().set_dn("created", dn.clone());
            let entry = payload(ctx, kind, &dn)?;
            Ok(ctx.session().add(&entry)?)
        }),
        writers(kind),
    )
    .describe(format!("only the owners of the {} subtree add entries", slug(kind)))
    .with_check(hook(move |ctx| {
        let dn = ctx.data().dn("created")?.clone();
        let created = ctx.succeeded();
        expect_presence(ctx, &dn, created)?;
        if created {
            let (attr, value) = marker(kind);
            let values = privileged_values(ctx, &dn, attr)?;
            ensure(values.iter().any(|found| found == value), || {
                format!("{dn} {attr} is {values:?}, expected {value:?}")
            })?;
        }
        Ok(())
    }));
    if kind == FixtureKind::Group {
        scenario.with_setup(hook(|ctx| {
            let member = ctx.fixtures().create_person()?.dn;
            ctx.data_mut().set_dn("member", member);
            Ok(())
        }))
    } else {
        scenario
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Expectation;
    use crate::principal::roles;

    #[test]
    fn test_names_and_matrices() {
        let names: Vec<String> = scenarios().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(
            names,
            ["create-person", "create-group", "create-application", "create-policy"]
        );
        let policy = create(FixtureKind::Policy);
        assert_eq!(policy.matrix().succeeding().collect::<Vec<_>>(), [roles::ADMIN]);
        let app = create(FixtureKind::Application);
        assert_eq!(app.matrix().expectation(roles::USER_PEOPLE_ADMIN), Expectation::Fail);
        assert_eq!(app.matrix().expectation(roles::APP_APPS_ADMIN), Expectation::Succeed);
    }
}
