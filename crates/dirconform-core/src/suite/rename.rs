//! In-place renames per subtree.

use super::{create_fixture, expect_presence, label, slug, writers};
use crate::fixture::FixtureKind;
use crate::matrix::hook;
use crate::runner::{Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "rename";

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
    .map(rename)
    .collect()
}

fn rename(kind: FixtureKind) -> Scenario {
    Scenario::new(
        SUITE,
        format!("rename-{}", slug(kind)),
        Operation::new(OperationKind::Rename, label(kind), move |ctx| {
            let dn = ctx.data().dn("target")?.clone();
            let new_rdn = kind.generate_rdn();
            let renamed = dn.with_rdn(new_rdn.clone());
            ctx.fixtures().track(renamed.clone());
            ctx.data_mut().set_dn("renamed", renamed);
            Ok(ctx.session().rename(&dn, &new_rdn)?)
        }),
        writers(kind),
    )
    .describe(format!("only the owners of the {} subtree rename entries", slug(kind)))
    .with_setup(hook(move |ctx| {
        let dn = create_fixture(ctx, kind)?;
        ctx.data_mut().set_dn("target", dn);
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let old = ctx.data().dn("target")?.clone();
        let new = ctx.data().dn("renamed")?.clone();
        let renamed = ctx.succeeded();
        expect_presence(ctx, &new, renamed)?;
        expect_presence(ctx, &old, !renamed)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_scenario_per_kind() {
        let names: Vec<String> = scenarios().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(
            names,
            ["rename-person", "rename-group", "rename-application", "rename-policy"]
        );
    }
}
