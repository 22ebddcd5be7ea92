//! Scenario catalog.
//!
//! The catalog is the policy under test: each scenario pairs one directory
//! operation with the outcome every principal must observe. Targets are
//! generated per case through the fixture manager, so scenarios do not
//! depend on each other and leave the directory as they found it.
//!
//! Suites group scenarios by operation family and can be selected by name
//! (`search`) or by `suite/scenario` (`update/update-own-password`).

pub mod connection;
pub mod create;
pub mod delete;
pub mod integrity;
pub mod ppolicy;
pub mod rename;
pub mod search;
pub mod update;

use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{CaseError, CaseResult, ensure};
use crate::fixture::FixtureKind;
use crate::matrix::{Expectation, ExpectationMatrix};
use crate::principal::{Credential, roles};
use crate::runner::{CaseContext, Scenario};

/// Suite names in run order.
pub const SUITES: [&str; 8] = [
    connection::SUITE,
    search::SUITE,
    create::SUITE,
    delete::SUITE,
    rename::SUITE,
    update::SUITE,
    integrity::SUITE,
    ppolicy::SUITE,
];

/// Knobs that change which scenarios the catalog contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Include scenarios that need the out-of-band query tool.
    pub probe: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self { probe: true }
    }
}

/// Every scenario, suite by suite.
#[must_use]
pub fn catalog(options: CatalogOptions) -> Vec<Scenario> {
    let mut scenarios = connection::scenarios(options);
    scenarios.extend(search::scenarios());
    scenarios.extend(create::scenarios());
    scenarios.extend(delete::scenarios());
    scenarios.extend(rename::scenarios());
    scenarios.extend(update::scenarios());
    scenarios.extend(integrity::scenarios());
    scenarios.extend(ppolicy::scenarios());
    scenarios
}

/// Keeps the scenarios matched by at least one selector. No selector keeps
/// everything.
#[must_use]
pub fn select(scenarios: Vec<Scenario>, selectors: &[String]) -> Vec<Scenario> {
    if selectors.is_empty() {
        return scenarios;
    }
    scenarios
        .into_iter()
        .filter(|scenario| selectors.iter().any(|selector| scenario.selected_by(selector)))
        .collect()
}

// =============================================================================
// Matrices
// =============================================================================

/// Every principal is refused.
pub(crate) fn refused() -> ExpectationMatrix {
    ExpectationMatrix::uniform(roles::ALL, Expectation::Fail)
}

/// People and group administrators succeed.
pub(crate) fn people_writers() -> ExpectationMatrix {
    refused().succeed(roles::PEOPLE_WRITERS)
}

/// Application administrators succeed.
pub(crate) fn apps_writers() -> ExpectationMatrix {
    refused().succeed(roles::APPS_WRITERS)
}

/// Only the root identity succeeds.
pub(crate) fn root_only() -> ExpectationMatrix {
    refused().succeed([roles::ADMIN])
}

/// Who may write entries of `kind`.
pub(crate) fn writers(kind: FixtureKind) -> ExpectationMatrix {
    match kind {
        FixtureKind::Person | FixtureKind::Group => people_writers(),
        FixtureKind::Application => apps_writers(),
        FixtureKind::Policy => root_only(),
    }
}

/// Short name of `kind` used in scenario names.
pub(crate) const fn slug(kind: FixtureKind) -> &'static str {
    match kind {
        FixtureKind::Person => "person",
        FixtureKind::Application => "application",
        FixtureKind::Group => "group",
        FixtureKind::Policy => "policy",
    }
}

/// Human label of `kind` for operation descriptions.
pub(crate) const fn label(kind: FixtureKind) -> &'static str {
    match kind {
        FixtureKind::Person => "person",
        FixtureKind::Application => "application",
        FixtureKind::Group => "group",
        FixtureKind::Policy => "password policy",
    }
}

// =============================================================================
// Shared hook helpers
// =============================================================================

/// Creates a fixture of `kind` and returns its DN.
pub(crate) fn create_fixture(ctx: &mut CaseContext<'_>, kind: FixtureKind) -> CaseResult<Dn> {
    let fixtures = ctx.fixtures();
    match kind {
        FixtureKind::Person => Ok(fixtures.create_person()?.dn),
        FixtureKind::Application => Ok(fixtures.create_application()?.dn),
        FixtureKind::Group => fixtures.create_group(&[]),
        FixtureKind::Policy => fixtures.create_policy(),
    }
}

/// DN of the principal under test.
pub(crate) fn own_dn(ctx: &CaseContext<'_>) -> CaseResult<Dn> {
    ctx.principal()
        .dn()
        .cloned()
        .ok_or_else(|| CaseError::MissingData("principal identity".to_string()))
}

/// Privileged read of `dn`.
pub(crate) fn privileged_read(ctx: &mut CaseContext<'_>, dn: &Dn) -> CaseResult<Option<Entry>> {
    Ok(ctx.admin().read(dn)?)
}

/// Checks through the privileged session that `dn` exists exactly when
/// `present` holds.
pub(crate) fn expect_presence(ctx: &mut CaseContext<'_>, dn: &Dn, present: bool) -> CaseResult {
    let found = privileged_read(ctx, dn)?.is_some();
    ensure(found == present, || {
        if present {
            format!("{dn} is missing")
        } else {
            format!("{dn} should not exist")
        }
    })
}

/// Values of `attr` on `dn` as seen by the privileged session.
pub(crate) fn privileged_values(
    ctx: &mut CaseContext<'_>,
    dn: &Dn,
    attr: &str,
) -> CaseResult<Vec<String>> {
    privileged_read(ctx, dn)?
        .map(|entry| entry.get(attr).to_vec())
        .ok_or_else(|| CaseError::assertion(format!("{dn} is not readable")))
}

/// Checks that `attr` on `dn` equals `new` after a successful write and
/// `old` after a refused one.
pub(crate) fn expect_values(
    ctx: &mut CaseContext<'_>,
    dn: &Dn,
    attr: &str,
    new: &[String],
    old: &[String],
) -> CaseResult {
    let mut now = privileged_values(ctx, dn, attr)?;
    let mut expected = if ctx.succeeded() { new.to_vec() } else { old.to_vec() };
    now.sort();
    expected.sort();
    ensure(now == expected, || {
        format!(
            "{dn} {attr} is [{}], expected [{}]",
            now.join(", "),
            expected.join(", ")
        )
    })
}

/// Opens a throwaway session as `credential` and reports whether it bound.
pub(crate) fn binds(ctx: &CaseContext<'_>, credential: &Credential) -> CaseResult<bool> {
    let session = ctx.open_session(credential)?;
    let bound = session.bound();
    session.release()?;
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::config::ConformConfig;
    use crate::principal::PrincipalRegistry;

    #[test]
    fn test_names_are_unique() {
        let scenarios = catalog(CatalogOptions::default());
        let names: BTreeSet<&str> = scenarios.iter().map(Scenario::name).collect();
        assert_eq!(names.len(), scenarios.len());
    }

    #[test]
    fn test_every_suite_contributes() {
        let scenarios = catalog(CatalogOptions::default());
        for suite in SUITES {
            assert!(
                scenarios.iter().any(|scenario| scenario.suite() == suite),
                "suite {suite} is empty"
            );
        }
    }

    #[test]
    fn test_probe_scenarios_follow_options() {
        let with = catalog(CatalogOptions { probe: true });
        let without = catalog(CatalogOptions { probe: false });
        assert!(with.iter().any(|scenario| scenario.name() == "probe-people-subtree"));
        assert!(!without.iter().any(|scenario| scenario.name().starts_with("probe-")));
    }

    #[test]
    fn test_matrices_match_the_default_roster() {
        let config = ConformConfig::default();
        let layout = config.validate().unwrap();
        let registry = PrincipalRegistry::from_config(&config, &layout).unwrap();
        let ids: Vec<&str> = registry.ids().collect();
        for scenario in catalog(CatalogOptions::default()) {
            scenario
                .matrix()
                .validate_complete(scenario.name(), ids.iter().copied())
                .unwrap();
        }
    }

    #[test]
    fn test_select_by_suite_and_name() {
        let picked = select(
            catalog(CatalogOptions::default()),
            &["search".to_string(), "update/update-own-password".to_string()],
        );
        assert!(picked.iter().all(|scenario| scenario.suite() == "search"
            || scenario.name() == "update-own-password"));
        assert!(picked.iter().any(|scenario| scenario.name() == "update-own-password"));
        assert_eq!(
            select(catalog(CatalogOptions::default()), &[]).len(),
            catalog(CatalogOptions::default()).len()
        );
    }
}
