//! Integration tests: the whole catalog against the reference directory.
//!
//! The reference directory implements the policy the catalog describes, so
//! a clean run is the baseline. Swapping in a deviating policy must produce
//! failures attributed to the right principals without cutting the run
//! short.

use std::sync::{Arc, Mutex};

use dirconform_core::config::{ConformConfig, DirectoryLayout};
use dirconform_core::directory::memory::{AccessPolicy, MemoryDirectory, Subject, WriteTarget};
use dirconform_core::directory::{
    Connection, Connector, Diagnostic, Modification, NewEntry, OpOutcome, SearchOutcome,
    SearchRequest, ServerInfo,
};
use dirconform_core::dn::{Dn, Rdn};
use dirconform_core::error::ConformError;
use dirconform_core::principal::PrincipalRegistry;
use dirconform_core::report::{CaseStatus, RunReport};
use secrecy::{ExposeSecret, SecretString};
use dirconform_core::runner::CaseRunner;
use dirconform_core::suite::{self, CatalogOptions};

/// Grants everything to everyone.
struct OpenPolicy;

impl AccessPolicy for OpenPolicy {
    fn can_read(&self, _: &DirectoryLayout, _: &Subject, _: &Dn) -> bool {
        true
    }

    fn can_write(&self, _: &DirectoryLayout, _: &Subject, _: &Dn, _: WriteTarget<'_>) -> bool {
        true
    }
}

/// A connector whose endpoint never answers.
struct Unreachable;

impl Connector for Unreachable {
    fn connect(&self) -> Result<Box<dyn Connection>, ConformError> {
        Err(ConformError::connection(self.endpoint(), "connection refused"))
    }

    fn endpoint(&self) -> &str {
        "ldap://127.0.0.1:1"
    }
}

/// Keeps accepting a password after its owner changed it away.
struct StalePasswords<'a> {
    inner: &'a MemoryDirectory,
    retired: Arc<Mutex<Vec<(Dn, String)>>>,
}

impl Connector for StalePasswords<'_> {
    fn connect(&self) -> Result<Box<dyn Connection>, ConformError> {
        Ok(Box::new(StaleConnection {
            inner: self.inner.connect()?,
            retired: Arc::clone(&self.retired),
        }))
    }

    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }
}

struct StaleConnection {
    inner: Box<dyn Connection>,
    retired: Arc<Mutex<Vec<(Dn, String)>>>,
}

impl Connection for StaleConnection {
    fn bind(&mut self, dn: &Dn, secret: &SecretString) -> Result<OpOutcome, ConformError> {
        let retired = self.retired.lock().unwrap();
        if retired
            .iter()
            .any(|(old_dn, old)| old_dn == dn && old == secret.expose_secret())
        {
            return Ok(Diagnostic::success().into());
        }
        drop(retired);
        self.inner.bind(dn, secret)
    }

    fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, ConformError> {
        self.inner.search(request)
    }

    fn add(&mut self, entry: &NewEntry) -> Result<OpOutcome, ConformError> {
        self.inner.add(entry)
    }

    fn delete(&mut self, dn: &Dn) -> Result<OpOutcome, ConformError> {
        self.inner.delete(dn)
    }

    fn modify(&mut self, dn: &Dn, changes: &[Modification]) -> Result<OpOutcome, ConformError> {
        self.inner.modify(dn, changes)
    }

    fn rename(&mut self, dn: &Dn, new_rdn: &Rdn) -> Result<OpOutcome, ConformError> {
        self.inner.rename(dn, new_rdn)
    }

    fn change_password(
        &mut self,
        user: &Dn,
        old: Option<&SecretString>,
        new: &SecretString,
    ) -> Result<OpOutcome, ConformError> {
        let outcome = self.inner.change_password(user, old, new)?;
        if let (true, Some(old)) = (outcome.success, old) {
            let retired = (user.clone(), old.expose_secret().to_string());
            self.retired.lock().unwrap().push(retired);
        }
        Ok(outcome)
    }

    fn root_dse(&mut self) -> Result<ServerInfo, ConformError> {
        self.inner.root_dse()
    }

    fn unbind(&mut self) -> Result<(), ConformError> {
        self.inner.unbind()
    }
}

fn registry(config: &ConformConfig) -> PrincipalRegistry {
    let layout = config.validate().unwrap();
    PrincipalRegistry::from_config(config, &layout).unwrap()
}

fn run(directory: &MemoryDirectory, selectors: &[&str], options: CatalogOptions) -> RunReport {
    let config = ConformConfig::default();
    let registry = registry(&config);
    let selectors: Vec<String> = selectors.iter().map(ToString::to_string).collect();
    let scenarios = suite::select(suite::catalog(options), &selectors);
    assert!(!scenarios.is_empty());
    let runner = CaseRunner::new(directory, &registry);
    let runner = if options.probe {
        runner.with_probe(directory)
    } else {
        runner
    };
    runner.run(&scenarios).unwrap()
}

#[test]
fn test_full_catalog_conforms() {
    let config = ConformConfig::default();
    let directory = MemoryDirectory::reference(&config).unwrap();
    let before = directory.len();

    let report = run(&directory, &[], CatalogOptions::default());

    assert!(report.is_success(), "{report}");
    assert_eq!(report.failed(), 0);
    assert!(report.passed() > 0);
    assert_eq!(report.scenarios().len(), suite::catalog(CatalogOptions::default()).len());
    for scenario in report.scenarios() {
        assert!(scenario.error().is_none(), "{}", scenario.scenario);
        assert_eq!(scenario.cases().len(), 10, "{}", scenario.scenario);
    }
    assert_eq!(directory.len(), before, "fixtures left behind");
}

#[test]
fn test_catalog_without_probe_conforms() {
    let config = ConformConfig::default();
    let directory = MemoryDirectory::reference(&config).unwrap();

    let report = run(&directory, &["connection"], CatalogOptions { probe: false });

    assert!(report.is_success(), "{report}");
    assert!(
        report
            .scenarios()
            .iter()
            .all(|scenario| !scenario.scenario.starts_with("probe-"))
    );
}

#[test]
fn test_open_policy_failures_are_attributed() {
    let config = ConformConfig::default();
    let directory = MemoryDirectory::reference_with_policy(&config, OpenPolicy).unwrap();

    let report = run(&directory, &["search-people"], CatalogOptions::default());

    assert!(!report.is_success());
    let scenario = &report.scenarios()[0];
    assert_eq!(scenario.cases().len(), 10);

    let failed: Vec<&str> = scenario
        .cases()
        .iter()
        .filter(|case| case.status == CaseStatus::Failed)
        .map(|case| case.principal.as_str())
        .collect();
    assert_eq!(failed, ["anonymous", "user", "user-apps-admin"]);

    let user = scenario
        .cases()
        .iter()
        .find(|case| case.principal == "user")
        .unwrap();
    let message = user.message.as_deref().unwrap();
    assert!(message.contains("principal `user`"), "{message}");
    assert!(message.contains("expected failure"), "{message}");
    assert!(message.contains("observed success"), "{message}");
    assert!(!message.contains("tuserPASS"), "{message}");

    let admin = scenario
        .cases()
        .iter()
        .find(|case| case.principal == "admin")
        .unwrap();
    assert_eq!(admin.status, CaseStatus::Passed);
}

#[test]
fn test_fixtures_removed_after_failing_cases() {
    let config = ConformConfig::default();
    let directory = MemoryDirectory::reference_with_policy(&config, OpenPolicy).unwrap();
    let before = directory.len();

    let report = run(&directory, &["create", "delete"], CatalogOptions::default());

    assert!(report.failed() > 0);
    assert_eq!(directory.len(), before, "fixtures left behind");
}

#[test]
fn test_unreachable_endpoint_aborts_run() {
    let config = ConformConfig::default();
    let registry = registry(&config);
    let scenarios = suite::catalog(CatalogOptions { probe: false });

    let err = CaseRunner::new(&Unreachable, &registry)
        .run(&scenarios)
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, ConformError::ConnectionFailure { .. }), "{err}");
    assert!(err.to_string().contains("ldap://127.0.0.1:1"));
}

#[test]
fn test_retired_password_that_still_binds_is_a_deviation() {
    let config = ConformConfig::default();
    let registry = registry(&config);
    let directory = MemoryDirectory::reference(&config).unwrap();
    let connector = StalePasswords {
        inner: &directory,
        retired: Arc::default(),
    };
    let scenarios = suite::select(
        suite::catalog(CatalogOptions { probe: false }),
        &["update-own-password".to_string()],
    );
    assert_eq!(scenarios.len(), 1);

    let report = CaseRunner::new(&connector, &registry).run(&scenarios).unwrap();

    let cases = report.scenarios()[0].cases();
    let failed: Vec<&str> = cases
        .iter()
        .filter(|case| case.status == CaseStatus::Failed)
        .map(|case| case.principal.as_str())
        .collect();
    assert_eq!(failed.len(), 6, "{report}");
    assert!(!failed.contains(&"anonymous"));
    for case in cases.iter().filter(|case| case.status == CaseStatus::Failed) {
        let message = case.message.as_deref().unwrap();
        assert!(message.contains("old password still binds"), "{message}");
    }
}

#[test]
fn test_anonymous_own_entry_search_returns_nothing() {
    let config = ConformConfig::default();
    let directory = MemoryDirectory::reference(&config).unwrap();

    let report = run(&directory, &["search-own-entry"], CatalogOptions::default());

    assert!(report.is_success(), "{report}");
    let anonymous = report.scenarios()[0]
        .cases()
        .iter()
        .find(|case| case.principal == "anonymous")
        .unwrap();
    assert_eq!(anonymous.status, CaseStatus::Passed);
    assert_eq!(anonymous.expected.to_string(), "failure");
}
