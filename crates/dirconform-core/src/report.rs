//! Run reports.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::directory::OpOutcome;
use crate::matrix::Expectation;
use crate::principal::Principal;
use crate::runner::Scenario;

/// Verdict for one principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Observed behaviour matches the expectation.
    Passed,
    /// Not applicable to the principal.
    Skipped,
    /// Observed behaviour deviates.
    Failed,
}

/// One principal's result in one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    /// Principal id.
    pub principal: String,
    /// Verdict.
    pub status: CaseStatus,
    /// What the matrix expected.
    pub expected: Expectation,
    /// What the directory answered, when the operation ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OpOutcome>,
    /// Full failure context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall time spent on the case.
    pub duration_ms: u64,
}

impl CaseRecord {
    /// A skipped case.
    #[must_use]
    pub fn skipped(principal: &Principal) -> Self {
        Self {
            principal: principal.id().to_string(),
            status: CaseStatus::Skipped,
            expected: Expectation::Skip,
            outcome: None,
            message: None,
            duration_ms: 0,
        }
    }

    /// A passing case.
    #[must_use]
    pub fn passed(
        principal: &Principal,
        expected: Expectation,
        outcome: Option<OpOutcome>,
        elapsed: Duration,
    ) -> Self {
        Self {
            principal: principal.id().to_string(),
            status: CaseStatus::Passed,
            expected,
            outcome,
            message: None,
            duration_ms: millis(elapsed),
        }
    }

    /// A deviating case.
    #[must_use]
    pub fn failed(
        principal: &Principal,
        expected: Expectation,
        outcome: Option<OpOutcome>,
        message: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            principal: principal.id().to_string(),
            status: CaseStatus::Failed,
            expected,
            outcome,
            message: Some(message),
            duration_ms: millis(elapsed),
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Results of one scenario across the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Suite name.
    pub suite: String,
    /// Scenario name.
    pub scenario: String,
    /// Scenario description.
    pub description: String,
    /// Operation under test.
    pub operation: String,
    /// Set when the scenario could not run at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    cases: Vec<CaseRecord>,
}

impl ScenarioReport {
    /// Empty report for `scenario`.
    #[must_use]
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            suite: scenario.suite().to_string(),
            scenario: scenario.name().to_string(),
            description: scenario.description().to_string(),
            operation: scenario.operation().to_string(),
            error: None,
            cases: Vec::new(),
        }
    }

    /// Appends a case.
    pub fn push(&mut self, record: CaseRecord) {
        self.cases.push(record);
    }

    /// Marks the scenario as broken.
    pub fn set_error(&mut self, error: String) {
        self.error = Some(error);
    }

    /// Scenario-level error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Case records in roster order.
    #[must_use]
    pub fn cases(&self) -> &[CaseRecord] {
        &self.cases
    }

    fn count(&self, status: CaseStatus) -> usize {
        self.cases.iter().filter(|case| case.status == status).count()
    }

    /// Passing cases.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(CaseStatus::Passed)
    }

    /// Skipped cases.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(CaseStatus::Skipped)
    }

    /// Deviating cases.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(CaseStatus::Failed)
    }

    /// Returns `true` when every case conforms.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed() == 0
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.is_success() { "ok" } else { "FAILED" };
        writeln!(
            f,
            "{}/{}: {verdict} ({} passed, {} failed, {} skipped)",
            self.suite,
            self.scenario,
            self.passed(),
            self.failed(),
            self.skipped(),
        )?;
        if let Some(error) = &self.error {
            writeln!(f, "    error: {error}")?;
        }
        for case in &self.cases {
            if let Some(message) = &case.message {
                writeln!(f, "    - {message}")?;
            }
        }
        Ok(())
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Endpoint that was checked.
    pub endpoint: String,
    /// Start of the run.
    pub started_at: DateTime<Utc>,
    /// End of the run; `None` while running.
    pub finished_at: Option<DateTime<Utc>>,
    scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    /// Starts a report now.
    #[must_use]
    pub fn start(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            started_at: Utc::now(),
            finished_at: None,
            scenarios: Vec::new(),
        }
    }

    /// Appends a scenario report.
    pub fn push(&mut self, report: ScenarioReport) {
        self.scenarios.push(report);
    }

    /// Stamps the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Scenario reports in run order.
    #[must_use]
    pub fn scenarios(&self) -> &[ScenarioReport] {
        &self.scenarios
    }

    /// Passing cases across the run.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.scenarios.iter().map(ScenarioReport::passed).sum()
    }

    /// Skipped cases across the run.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.scenarios.iter().map(ScenarioReport::skipped).sum()
    }

    /// Deviating cases across the run.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.scenarios.iter().map(ScenarioReport::failed).sum()
    }

    /// Returns `true` when every scenario conforms.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.scenarios.iter().all(ScenarioReport::is_success)
    }

    /// Pretty JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for scenario in &self.scenarios {
            write!(f, "{scenario}")?;
        }
        let verdict = if self.is_success() { "conforms" } else { "DEVIATES" };
        write!(
            f,
            "{}: {verdict}: {} scenarios, {} passed, {} failed, {} skipped",
            self.endpoint,
            self.scenarios.len(),
            self.passed(),
            self.failed(),
            self.skipped(),
        )?;
        if let Some(finished) = self.finished_at {
            let elapsed = finished.signed_duration_since(self.started_at);
            write!(f, " in {}ms", elapsed.num_milliseconds())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConformConfig;
    use crate::directory::Diagnostic;
    use crate::matrix::ExpectationMatrix;
    use crate::principal::PrincipalRegistry;
    use crate::runner::{Operation, OperationKind};

    fn scenario() -> Scenario {
        Scenario::new(
            "create",
            "create-person",
            Operation::new(OperationKind::Add, "person", |_| Ok(Diagnostic::success().into())),
            ExpectationMatrix::new(),
        )
        .describe("add a person under the people subtree")
    }

    fn registry() -> PrincipalRegistry {
        let config = ConformConfig::default();
        let layout = config.validate().unwrap();
        PrincipalRegistry::from_config(&config, &layout).unwrap()
    }

    #[test]
    fn test_counts_and_verdict() {
        let registry = registry();
        let mut report = ScenarioReport::new(&scenario());
        report.push(CaseRecord::skipped(registry.get("anonymous").unwrap()));
        report.push(CaseRecord::passed(
            registry.get("admin").unwrap(),
            Expectation::Succeed,
            Some(Diagnostic::success().into()),
            Duration::from_millis(3),
        ));
        assert!(report.is_success());
        report.push(CaseRecord::failed(
            registry.get("app").unwrap(),
            Expectation::Fail,
            Some(Diagnostic::success().into()),
            "principal `app` deviates".to_string(),
            Duration::from_millis(5),
        ));
        assert!(!report.is_success());
        assert_eq!((report.passed(), report.failed(), report.skipped()), (1, 1, 1));
        let text = report.to_string();
        assert!(text.starts_with("create/create-person: FAILED"));
        assert!(text.contains("principal `app` deviates"));
    }

    #[test]
    fn test_run_json_shape() {
        let registry = registry();
        let mut run = RunReport::start("memory://reference");
        let mut report = ScenarioReport::new(&scenario());
        report.push(CaseRecord::skipped(registry.get("anonymous").unwrap()));
        run.push(report);
        run.finish();
        let json: serde_json::Value = serde_json::from_str(&run.to_json().unwrap()).unwrap();
        assert_eq!(json["endpoint"], "memory://reference");
        assert_eq!(json["scenarios"][0]["operation"], "add person");
        assert_eq!(json["scenarios"][0]["cases"][0]["status"], "skipped");
        assert!(json["scenarios"][0]["cases"][0].get("message").is_none());
        assert!(json["finished_at"].is_string());
    }
}
