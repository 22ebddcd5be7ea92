//! `dirconform run` and `dirconform selftest`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use dirconform_core::config::ConformConfig;
use dirconform_core::directory::Connector;
use dirconform_core::directory::ldap::LdapConnector;
use dirconform_core::directory::memory::MemoryDirectory;
use dirconform_core::principal::PrincipalRegistry;
use dirconform_core::probe::{LdapSearchProbe, QueryProbe};
use dirconform_core::report::RunReport;
use dirconform_core::runner::{CaseRunner, Scenario};
use dirconform_core::suite::{self, CatalogOptions};
use tracing::info;

use super::{OutputFormat, environment_failure, exit_codes, load_config};

/// Runs the selected scenarios against the configured endpoint.
pub fn run_live(config_path: Option<&Path>, selectors: &[String], format: OutputFormat) -> u8 {
    let result = load_config(config_path).and_then(|config| {
        let connector = LdapConnector::new(config.directory.endpoint.clone(), config.timeout())
            .with_tls_verify(config.directory.tls_verify);
        let probe = LdapSearchProbe::new(
            config.probe.program.clone(),
            config.directory.endpoint.clone(),
        );
        let probe = config.probe.enabled.then_some(&probe as &dyn QueryProbe);
        execute(&config, &connector, probe, selectors)
    });
    finish(result, format)
}

/// Runs the selected scenarios against the reference directory.
pub fn run_selftest(config_path: Option<&Path>, selectors: &[String], format: OutputFormat) -> u8 {
    let result = load_config(config_path).and_then(|config| {
        let directory =
            MemoryDirectory::reference(&config).context("failed to seed the reference directory")?;
        execute(&config, &directory, Some(&directory as &dyn QueryProbe), selectors)
    });
    finish(result, format)
}

/// Scenarios matched by `selectors` for this configuration.
pub fn scenarios_for(config: &ConformConfig, selectors: &[String]) -> Result<Vec<Scenario>> {
    let options = CatalogOptions {
        probe: config.probe.enabled,
    };
    let scenarios = suite::select(suite::catalog(options), selectors);
    if scenarios.is_empty() {
        bail!("no scenario matches {selectors:?}");
    }
    Ok(scenarios)
}

fn execute(
    config: &ConformConfig,
    connector: &dyn Connector,
    probe: Option<&dyn QueryProbe>,
    selectors: &[String],
) -> Result<RunReport> {
    let layout = config.validate().context("invalid configuration")?;
    let registry =
        PrincipalRegistry::from_config(config, &layout).context("invalid principal roster")?;
    let scenarios = scenarios_for(config, selectors)?;
    info!(
        endpoint = connector.endpoint(),
        scenarios = scenarios.len(),
        "starting conformance run"
    );

    let mut runner = CaseRunner::new(connector, &registry);
    if let Some(probe) = probe {
        runner = runner.with_probe(probe);
    }
    let report = runner.run(&scenarios).context("conformance run aborted")?;
    Ok(report)
}

fn finish(result: Result<RunReport>, format: OutputFormat) -> u8 {
    let report = match result {
        Ok(report) => report,
        Err(err) => return environment_failure(&err),
    };
    match format {
        OutputFormat::Json => match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                return environment_failure(
                    &anyhow::Error::new(err).context("report serialization failed"),
                );
            },
        },
        OutputFormat::Text => println!("{report}"),
    }
    exit_code(&report)
}

/// Exit code for a completed run.
pub fn exit_code(report: &RunReport) -> u8 {
    if report.is_success() {
        exit_codes::SUCCESS
    } else {
        exit_codes::DEVIATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenarios_for_respects_probe_switch() {
        let mut config = ConformConfig::default();
        let with_probe = scenarios_for(&config, &[]).unwrap();
        config.probe.enabled = false;
        let without_probe = scenarios_for(&config, &[]).unwrap();
        assert!(with_probe.len() > without_probe.len());
        assert!(without_probe.iter().all(|s| !s.name().starts_with("probe-")));
    }

    #[test]
    fn test_scenarios_for_rejects_empty_selection() {
        let config = ConformConfig::default();
        let err = scenarios_for(&config, &["no-such-suite".to_string()]).unwrap_err();
        assert!(err.to_string().contains("no-such-suite"));
    }

    #[test]
    fn test_exit_code_of_empty_report() {
        let report = RunReport::start("memory://reference");
        assert_eq!(exit_code(&report), exit_codes::SUCCESS);
    }
}
