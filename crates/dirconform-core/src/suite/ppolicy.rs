//! Password policy assignment.

use super::{expect_values, own_dn, refused};
use crate::directory::Modification;
use crate::matrix::hook;
use crate::principal::roles;
use crate::runner::{Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "ppolicy";

const SUBENTRY: &str = "pwdPolicySubentry";

/// Scenarios of this suite.
#[must_use]
pub fn scenarios() -> Vec<Scenario> {
    vec![own_subentry()]
}

fn own_subentry() -> Scenario {
    Scenario::new(
        SUITE,
        "own-policy-subentry",
        Operation::new(OperationKind::Modify, "pwdPolicySubentry of the principal's own entry", |ctx| {
            let dn = own_dn(ctx)?;
            let policy = ctx.data().dn("policy")?.to_string();
            ctx.data_mut().set_values("new", vec![policy.clone()]);
            Ok(ctx
                .session()
                .modify(&dn, &[Modification::replace(SUBENTRY, [policy])])?)
        }),
        refused()
            .succeed([
                roles::USER_PEOPLE_ADMIN,
                roles::USER_ADMIN,
                roles::APP_APPS_ADMIN,
                roles::APP_ADMIN,
            ])
            .skip([roles::ANONYMOUS, roles::ADMIN]),
    )
    .describe("only identities administering their own subtree pick their password policy")
    .with_setup(hook(|ctx| {
        let policy = ctx.fixtures().create_policy()?;
        let dn = own_dn(ctx)?;
        let old = ctx.fixtures().remember(&dn, SUBENTRY)?;
        let data = ctx.data_mut();
        data.set_dn("policy", policy);
        data.set_values("old", old);
        Ok(())
    }))
    .with_check(hook(|ctx| {
        let dn = own_dn(ctx)?;
        let new = ctx.data().values("new")?.to_vec();
        let old = ctx.data().values("old")?.to_vec();
        expect_values(ctx, &dn, SUBENTRY, &new, &old)
    }))
}
