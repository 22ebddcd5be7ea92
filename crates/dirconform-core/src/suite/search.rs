//! Read visibility per subtree.

use super::{apps_writers, people_writers, refused};
use crate::directory::{OpOutcome, SearchRequest};
use crate::dn::Dn;
use crate::error::ensure;
use crate::filter::Filter;
use crate::matrix::{Expectation, ExpectationMatrix, hook};
use crate::principal::roles;
use crate::runner::{CaseContext, Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "search";

/// Who may read the people and groups subtrees: their administrators and
/// every application identity.
pub(crate) fn people_readers() -> ExpectationMatrix {
    people_writers().succeed([roles::APP, roles::APP_APPS_ADMIN])
}

/// Scenarios of this suite.
#[must_use]
pub fn scenarios() -> Vec<Scenario> {
    vec![
        subtree(
            "search-root-dc",
            "of the whole naming context",
            |ctx| ctx.layout().base.clone(),
            refused().succeed([
                roles::USER_PEOPLE_ADMIN,
                roles::USER_APPS_ADMIN,
                roles::USER_ADMIN,
                roles::ADMIN,
                roles::APP_PEOPLE_ADMIN,
                roles::APP_APPS_ADMIN,
                roles::APP_ADMIN,
            ]),
        )
        .describe("administrators of either kind list the naming context"),
        subtree(
            "search-people",
            "of the people subtree",
            |ctx| ctx.layout().people.clone(),
            people_readers(),
        )
        .describe("people administrators and applications list people"),
        subtree(
            "search-groups",
            "of the groups subtree",
            |ctx| ctx.layout().groups.clone(),
            people_readers(),
        )
        .describe("people administrators and applications list groups"),
        subtree(
            "search-applications",
            "of the applications subtree",
            |ctx| ctx.layout().applications.clone(),
            apps_writers(),
        )
        .describe("only application administrators list applications"),
        subtree(
            "search-policies",
            "of the policies subtree",
            |ctx| ctx.layout().policies.clone(),
            people_writers(),
        )
        .describe("people administrators list password policies"),
        own_entry(),
        by_group(),
    ]
}

fn subtree(
    name: &str,
    target: &str,
    base: fn(&CaseContext<'_>) -> Dn,
    matrix: ExpectationMatrix,
) -> Scenario {
    Scenario::new(
        SUITE,
        name,
        Operation::new(OperationKind::Search, target, move |ctx| {
            let request = SearchRequest::subtree(base(ctx));
            let outcome = ctx.session().search(&request)?;
            Ok(OpOutcome::from(&outcome))
        }),
        matrix,
    )
}

fn own_entry() -> Scenario {
    Scenario::new(
        SUITE,
        "search-own-entry",
        Operation::new(OperationKind::Search, "of the principal's own entry", |ctx| {
            // Anonymous has no identity path; its own path is the empty DN.
            let request = match ctx.principal().dn() {
                Some(dn) => SearchRequest::entry(dn.clone()),
                None => SearchRequest::subtree(Dn::root()),
            };
            let outcome = ctx.session().search(&request)?;
            let returned = outcome.entries.iter().map(|entry| entry.dn().to_string());
            ctx.data_mut().set_values("returned", returned.collect());
            Ok(OpOutcome::from(&outcome))
        }),
        ExpectationMatrix::uniform(roles::ALL, Expectation::Succeed)
            .fail([roles::ANONYMOUS])
            .skip([roles::ADMIN]),
    )
    .describe("every identity reads its own entry; anonymous reads nothing")
    .with_check(hook(|ctx| {
        if ctx.succeeded() {
            return Ok(());
        }
        let returned = ctx.data().values("returned")?;
        ensure(returned.is_empty(), || {
            format!("refused search still returned {}", returned.join("; "))
        })
    }))
}

fn by_group() -> Scenario {
    Scenario::new(
        SUITE,
        "search-people-by-group",
        Operation::new(OperationKind::Search, "of people by memberOf", |ctx| {
            let group = ctx.data().dn("group")?.to_string();
            let request = SearchRequest::subtree(ctx.layout().people.clone()).with_filter(
                Filter::and([
                    Filter::object_class("inetOrgPerson"),
                    Filter::eq("memberOf", group),
                ]),
            );
            let outcome = ctx.session().search(&request)?;
            Ok(OpOutcome::from(&outcome))
        }),
        people_readers(),
    )
    .describe("the derived memberOf attribute is searchable by whoever reads people")
    .with_setup(hook(|ctx| {
        let member = ctx.fixtures().create_person()?.dn;
        let group = ctx.fixtures().create_group(&[member])?;
        ctx.data_mut().set_dn("group", group);
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_people_readers() {
        let matrix = people_readers();
        for id in [roles::APP, roles::APP_APPS_ADMIN, roles::USER_ADMIN, roles::ADMIN] {
            assert_eq!(matrix.expectation(id), Expectation::Succeed, "{id}");
        }
        for id in [roles::ANONYMOUS, roles::USER, roles::USER_APPS_ADMIN] {
            assert_eq!(matrix.expectation(id), Expectation::Fail, "{id}");
        }
    }

    #[test]
    fn test_own_entry_refused_to_anonymous() {
        let scenario = own_entry();
        assert_eq!(scenario.matrix().expectation(roles::ANONYMOUS), Expectation::Fail);
        assert_eq!(scenario.matrix().expectation(roles::ADMIN), Expectation::Skip);
        assert_eq!(scenario.matrix().expectation(roles::USER), Expectation::Succeed);
    }
}
