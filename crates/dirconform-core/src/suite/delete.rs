//! Entry deletion per subtree.

use super::{create_fixture, expect_presence, label, slug, writers};
use crate::fixture::FixtureKind;
use crate::matrix::hook;
use crate::runner::{Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "delete";

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
    .map(delete)
    .collect()
}

fn delete(kind: FixtureKind) -> Scenario {
    Scenario::new(
        SUITE,
        format!("delete-{}", slug(kind)),
        Operation::new(OperationKind::Delete, label(kind), |ctx| {
            let dn = ctx.data().dn("target")?.clone();
            Ok(ctx.session().delete(&dn)?)
        }),
        writers(kind),
    )
    .describe(format!("only the owners of the {} subtree remove entries", slug(kind)))
    .with_setup(hook(move |ctx| {
        let dn = create_fixture(ctx, kind)?;
        ctx.data_mut().set_dn("target", dn);
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let dn = ctx.data().dn("target")?.clone();
        let removed = ctx.succeeded();
        expect_presence(ctx, &dn, !removed)
    }))
}
