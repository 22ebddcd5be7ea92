//! Case execution.
//!
//! [`CaseRunner`] evaluates a [`Scenario`] once per registered principal:
//!
//! 1. no slot or a `Skip` slot: record a skip, open nothing;
//! 2. open a session as the principal and a privileged fixture manager;
//! 3. run the setup hook;
//! 4. run the operation and compare its outcome with the expectation;
//! 5. run the post hook;
//! 6. tear down fixtures and release the session, on every path.
//!
//! A failing case does not stop the matrix. A fatal error (the endpoint is
//! gone, preconditions cannot be met) stops the whole run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::DirectoryLayout;
use crate::directory::{Connector, OpOutcome};
use crate::dn::Dn;
use crate::error::{CaseError, CaseResult, ConformError};
use crate::fixture::EntryFixtureManager;
use crate::log::SecretRedactor;
use crate::matrix::{Expectation, ExpectationMatrix, Hook};
use crate::principal::{Credential, Principal, PrincipalRegistry};
use crate::probe::QueryProbe;
use crate::report::{CaseRecord, RunReport, ScenarioReport};
use crate::session::DirectorySession;

// =============================================================================
// Case data
// =============================================================================

/// Values hooks hand to each other within one case.
#[derive(Debug, Default)]
pub struct CaseData {
    dns: BTreeMap<String, Dn>,
    values: BTreeMap<String, Vec<String>>,
    secrets: BTreeMap<String, SecretString>,
}

impl CaseData {
    /// Records a DN.
    pub fn set_dn(&mut self, key: &str, dn: Dn) {
        self.dns.insert(key.to_string(), dn);
    }

    /// Recorded DN.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::MissingData`] when nothing was recorded.
    pub fn dn(&self, key: &str) -> CaseResult<&Dn> {
        self.dns
            .get(key)
            .ok_or_else(|| CaseError::MissingData(key.to_string()))
    }

    /// Records attribute values.
    pub fn set_values(&mut self, key: &str, values: Vec<String>) {
        self.values.insert(key.to_string(), values);
    }

    /// Recorded values.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::MissingData`] when nothing was recorded.
    pub fn values(&self, key: &str) -> CaseResult<&[String]> {
        self.values
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| CaseError::MissingData(key.to_string()))
    }

    /// Records a secret.
    pub fn set_secret(&mut self, key: &str, secret: SecretString) {
        self.secrets.insert(key.to_string(), secret);
    }

    /// Recorded secret.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::MissingData`] when nothing was recorded.
    pub fn secret(&self, key: &str) -> CaseResult<&SecretString> {
        self.secrets
            .get(key)
            .ok_or_else(|| CaseError::MissingData(key.to_string()))
    }
}

// =============================================================================
// Case context
// =============================================================================

/// Everything a hook or operation can reach during one case.
pub struct CaseContext<'a> {
    scenario: &'a str,
    principal: &'a Principal,
    registry: &'a PrincipalRegistry,
    connector: &'a dyn Connector,
    probe: Option<&'a dyn QueryProbe>,
    expectation: Expectation,
    session: DirectorySession,
    fixtures: EntryFixtureManager,
    data: CaseData,
    outcome: Option<OpOutcome>,
}

impl fmt::Debug for CaseContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseContext")
            .field("scenario", &self.scenario)
            .field("principal", &self.principal.id())
            .field("expectation", &self.expectation)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl<'a> CaseContext<'a> {
    /// Scenario name.
    #[must_use]
    pub const fn scenario(&self) -> &'a str {
        self.scenario
    }

    /// Principal under test.
    #[must_use]
    pub const fn principal(&self) -> &'a Principal {
        self.principal
    }

    /// The registry, for looking up other principals.
    #[must_use]
    pub const fn registry(&self) -> &'a PrincipalRegistry {
        self.registry
    }

    /// Resolved layout.
    #[must_use]
    pub fn layout(&self) -> &'a DirectoryLayout {
        self.registry.layout()
    }

    /// What this principal is expected to observe.
    #[must_use]
    pub const fn expectation(&self) -> Expectation {
        self.expectation
    }

    /// Session bound as the principal under test.
    pub fn session(&mut self) -> &mut DirectorySession {
        &mut self.session
    }

    /// Fixture manager.
    pub fn fixtures(&mut self) -> &mut EntryFixtureManager {
        &mut self.fixtures
    }

    /// Privileged session for re-reads and reverts.
    pub fn admin(&mut self) -> &mut DirectorySession {
        self.fixtures.session()
    }

    /// Case data.
    #[must_use]
    pub const fn data(&self) -> &CaseData {
        &self.data
    }

    /// Mutable case data.
    pub fn data_mut(&mut self) -> &mut CaseData {
        &mut self.data
    }

    /// Opens an extra session, for example to check a new password.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::ConnectionFailure`] on transport faults.
    pub fn open_session(&self, credential: &Credential) -> Result<DirectorySession, ConformError> {
        DirectorySession::open(self.connector, credential)
    }

    /// The out-of-band query tool.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::MissingData`] when no probe is configured.
    pub fn probe(&self) -> CaseResult<&'a dyn QueryProbe> {
        self.probe
            .ok_or_else(|| CaseError::MissingData("query probe".to_string()))
    }

    /// Outcome of the operation under test; available to post hooks.
    ///
    /// # Errors
    ///
    /// Returns [`CaseError::MissingData`] before the operation ran.
    pub fn outcome(&self) -> CaseResult<&OpOutcome> {
        self.outcome
            .as_ref()
            .ok_or_else(|| CaseError::MissingData("operation outcome".to_string()))
    }

    /// Returns `true` when the operation under test succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(|outcome| outcome.success)
    }

    /// Tears down fixtures and releases the session.
    fn finish(self) -> Result<(), ConformError> {
        let Self {
            session,
            mut fixtures,
            ..
        } = self;
        let teardown = fixtures.teardown();
        drop(fixtures);
        if let Err(err) = session.release() {
            warn!(error = %err, "session release failed");
        }
        teardown
    }
}

// =============================================================================
// Scenario
// =============================================================================

/// Kind of operation under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Simple bind.
    Bind,
    /// Search.
    Search,
    /// Add.
    Add,
    /// Delete.
    Delete,
    /// Modify.
    Modify,
    /// Rename.
    Rename,
    /// Password-modify extended operation.
    PasswordModify,
    /// Root DSE read.
    RootDse,
    /// Out-of-band query tool.
    Probe,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bind => "bind",
            Self::Search => "search",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Modify => "modify",
            Self::Rename => "rename",
            Self::PasswordModify => "password modify",
            Self::RootDse => "root DSE read",
            Self::Probe => "out-of-band search",
        })
    }
}

/// The operation under test.
pub type Action = Arc<dyn Fn(&mut CaseContext<'_>) -> CaseResult<OpOutcome> + Send + Sync>;

/// A named operation.
#[derive(Clone)]
pub struct Operation {
    kind: OperationKind,
    target: String,
    action: Action,
}

impl Operation {
    /// Creates an operation. `target` describes what it acts on, for
    /// failure messages.
    pub fn new<F>(kind: OperationKind, target: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut CaseContext<'_>) -> CaseResult<OpOutcome> + Send + Sync + 'static,
    {
        Self {
            kind,
            target: target.into(),
            action: Arc::new(action),
        }
    }

    /// Kind of operation.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// One behavioural check across every principal.
#[derive(Clone)]
pub struct Scenario {
    suite: &'static str,
    name: String,
    description: String,
    operation: Operation,
    matrix: ExpectationMatrix,
    setup: Option<Hook>,
    check: Option<Hook>,
}

impl Scenario {
    /// Creates a scenario.
    pub fn new(
        suite: &'static str,
        name: impl Into<String>,
        operation: Operation,
        matrix: ExpectationMatrix,
    ) -> Self {
        Self {
            suite,
            name: name.into(),
            description: String::new(),
            operation,
            matrix,
            setup: None,
            check: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the default setup hook.
    #[must_use]
    pub fn with_setup(mut self, setup: Hook) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Sets the default post hook.
    #[must_use]
    pub fn with_check(mut self, check: Hook) -> Self {
        self.check = Some(check);
        self
    }

    /// Suite name.
    #[must_use]
    pub const fn suite(&self) -> &'static str {
        self.suite
    }

    /// Scenario name, unique within the catalog.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Operation under test.
    #[must_use]
    pub const fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Expectation matrix.
    #[must_use]
    pub const fn matrix(&self) -> &ExpectationMatrix {
        &self.matrix
    }

    /// Returns `true` if the scenario matches a `suite` or `suite/name`
    /// selector.
    #[must_use]
    pub fn selected_by(&self, selector: &str) -> bool {
        match selector.split_once('/') {
            Some((suite, name)) => suite == self.suite && name == self.name,
            None => selector == self.suite || selector == self.name,
        }
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("suite", &self.suite)
            .field("name", &self.name)
            .field("operation", &self.operation)
            .field("matrix", &self.matrix)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Executes scenarios against one directory.
#[derive(Clone, Copy)]
pub struct CaseRunner<'a> {
    connector: &'a dyn Connector,
    registry: &'a PrincipalRegistry,
    probe: Option<&'a dyn QueryProbe>,
}

impl fmt::Debug for CaseRunner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseRunner")
            .field("endpoint", &self.connector.endpoint())
            .field("principals", &self.registry.len())
            .field("probe", &self.probe.map(QueryProbe::program))
            .finish()
    }
}

impl<'a> CaseRunner<'a> {
    /// Creates a runner without an out-of-band probe.
    #[must_use]
    pub fn new(connector: &'a dyn Connector, registry: &'a PrincipalRegistry) -> Self {
        Self {
            connector,
            registry,
            probe: None,
        }
    }

    /// Attaches the out-of-band query tool.
    #[must_use]
    pub fn with_probe(mut self, probe: &'a dyn QueryProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Establishes principal preconditions, then runs every scenario.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; the run stops there.
    #[instrument(skip_all, fields(endpoint = self.connector.endpoint(), scenarios = scenarios.len()))]
    pub fn run(&self, scenarios: &[Scenario]) -> Result<RunReport, ConformError> {
        self.registry.ensure_prepared(self.connector)?;
        let mut report = RunReport::start(self.connector.endpoint());
        for scenario in scenarios {
            report.push(self.run_scenario(scenario)?);
        }
        report.finish();
        info!(
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "run finished"
        );
        Ok(report)
    }

    /// Runs one scenario for every registered principal.
    ///
    /// # Errors
    ///
    /// Returns a fatal error; failing cases are recorded in the report.
    #[instrument(skip_all, fields(scenario = %scenario.name))]
    pub fn run_scenario(&self, scenario: &Scenario) -> Result<ScenarioReport, ConformError> {
        let mut report = ScenarioReport::new(scenario);
        if let Err(err) = scenario.matrix.validate(&scenario.name, self.registry.ids()) {
            warn!(error = %err, "invalid expectation matrix");
            report.set_error(err.to_string());
            return Ok(report);
        }
        for principal in self.registry.iter() {
            report.push(self.run_case(scenario, principal)?);
        }
        debug!(
            failed = report.failed(),
            cases = report.cases().len(),
            "scenario finished"
        );
        Ok(report)
    }

    fn run_case(&self, scenario: &Scenario, principal: &Principal) -> Result<CaseRecord, ConformError> {
        let case = scenario.matrix.get(principal.id());
        let expectation = case.map_or(Expectation::Skip, |case| case.expectation);
        let Some(expected) = expectation.expected() else {
            debug!(principal = principal.id(), "skipped");
            return Ok(CaseRecord::skipped(principal));
        };
        let started = Instant::now();

        let session = DirectorySession::open(self.connector, principal.credential())?;
        let fixtures =
            EntryFixtureManager::open(self.connector, self.registry.root(), self.registry.layout())?;
        let mut ctx = CaseContext {
            scenario: &scenario.name,
            principal,
            registry: self.registry,
            connector: self.connector,
            probe: self.probe,
            expectation,
            session,
            fixtures,
            data: CaseData::default(),
            outcome: None,
        };

        let setup = case
            .and_then(|case| case.setup.clone())
            .or_else(|| scenario.setup.clone());
        let check = case
            .and_then(|case| case.check.clone())
            .or_else(|| scenario.check.clone());
        let failures = execute(&mut ctx, scenario, expected, setup, check);
        let outcome = ctx.outcome.clone();
        let bind = (!ctx.session.bound()).then(|| ctx.session.bind_outcome().diagnostic.to_string());
        let teardown = ctx.finish();
        let failures = failures?;
        teardown?;

        let elapsed = started.elapsed();
        if failures.is_empty() {
            debug!(principal = principal.id(), "passed");
            return Ok(CaseRecord::passed(principal, expectation, outcome, elapsed));
        }
        let message = self.failure_message(scenario, principal, expectation, outcome.as_ref(), bind, &failures);
        warn!(principal = principal.id(), %message, "case deviates");
        Ok(CaseRecord::failed(principal, expectation, outcome, message, elapsed))
    }

    fn failure_message(
        &self,
        scenario: &Scenario,
        principal: &Principal,
        expectation: Expectation,
        outcome: Option<&OpOutcome>,
        bind: Option<String>,
        failures: &[String],
    ) -> String {
        let mut message = format!(
            "principal `{}` ({}) on {}: expected {}",
            principal.id(),
            principal.description(),
            scenario.operation,
            expectation,
        );
        if let Some(outcome) = outcome {
            let observed = if outcome.success { "success" } else { "failure" };
            message.push_str(&format!(", observed {observed} [{}]", outcome.diagnostic));
        }
        if let Some(bind) = bind {
            message.push_str(&format!("; session bind refused: {bind}"));
        }
        for failure in failures {
            message.push_str("; ");
            message.push_str(failure);
        }
        let mut redactor = SecretRedactor::new();
        if let Some(secret) = principal.credential().secret() {
            redactor = redactor.with_secret(secret);
        }
        if let Some(secret) = self.registry.root().secret() {
            redactor = redactor.with_secret(secret);
        }
        redactor.redact(&message).into_owned()
    }
}

/// Runs setup, operation and post hook. Returns the collected failure
/// messages, or a fatal error.
fn execute(
    ctx: &mut CaseContext<'_>,
    scenario: &Scenario,
    expected: bool,
    setup: Option<Hook>,
    check: Option<Hook>,
) -> Result<Vec<String>, ConformError> {
    let mut failures = Vec::new();
    if let Some(setup) = setup {
        if let Err(err) = setup(ctx) {
            failures.push(format!("setup failed: {}", fatal(err)?));
            return Ok(failures);
        }
    }
    match (scenario.operation.action)(ctx) {
        Ok(outcome) => {
            if outcome.success != expected {
                failures.push("outcome does not match the policy".to_string());
            }
            ctx.outcome = Some(outcome);
        },
        Err(err) => {
            failures.push(format!("operation failed: {}", fatal(err)?));
            return Ok(failures);
        },
    }
    if let Some(check) = check {
        if let Err(err) = check(ctx) {
            failures.push(format!("post-check failed: {}", fatal(err)?));
        }
    }
    Ok(failures)
}

/// Splits fatal errors off; everything else becomes a message.
fn fatal(err: CaseError) -> Result<String, ConformError> {
    match err {
        CaseError::Conform(err) if err.is_fatal() => Err(err),
        other => Ok(other.to_string()),
    }
}
