//! `dirconform list` and `dirconform show-config`.

use std::path::Path;

use anyhow::{Context, Result};
use dirconform_core::config::ConformConfig;
use dirconform_core::runner::Scenario;

use super::run::scenarios_for;
use super::{environment_failure, exit_codes, load_config};

/// Prints the selected scenarios, one per line.
pub fn run_list(config_path: Option<&Path>, selectors: &[String]) -> u8 {
    let result = load_config(config_path).and_then(|config| scenarios_for(&config, selectors));
    match result {
        Ok(scenarios) => {
            for scenario in &scenarios {
                println!("{}", list_line(scenario));
            }
            exit_codes::SUCCESS
        },
        Err(err) => environment_failure(&err),
    }
}

fn list_line(scenario: &Scenario) -> String {
    let succeeding: Vec<&str> = scenario.matrix().succeeding().collect();
    format!(
        "{}/{}: {} [succeeds: {}] {}",
        scenario.suite(),
        scenario.name(),
        scenario.operation(),
        if succeeding.is_empty() {
            "none".to_string()
        } else {
            succeeding.join(",")
        },
        scenario.description(),
    )
}

/// Prints the effective configuration as TOML, with the resolved layout.
pub fn run_show_config(config_path: Option<&Path>) -> u8 {
    match load_config(config_path).and_then(|config| render_config(&config)) {
        Ok(rendered) => {
            print!("{rendered}");
            exit_codes::SUCCESS
        },
        Err(err) => environment_failure(&err),
    }
}

fn render_config(config: &ConformConfig) -> Result<String> {
    let layout = config.validate().context("invalid configuration")?;
    let mut rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    rendered.push_str("\n# resolved layout\n");
    for (name, dn) in [
        ("base", &layout.base),
        ("root", &layout.root),
        ("people", &layout.people),
        ("groups", &layout.groups),
        ("applications", &layout.applications),
        ("policies", &layout.policies),
        ("config_database", &layout.config_database),
        ("people_admin_group", &layout.people_admin_group),
        ("apps_admin_group", &layout.apps_admin_group),
    ] {
        rendered.push_str(&format!("# {name} = {dn}\n"));
    }
    Ok(dirconform_core::log::redact(&rendered).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_config_resolves_layout() {
        let rendered = render_config(&ConformConfig::default()).unwrap();
        assert!(rendered.contains("[directory]"));
        assert!(rendered.contains("# people = ou=people,dc=ci,dc=example,dc=com"));
        assert!(rendered.contains("# root = cn=admin,dc=ci,dc=example,dc=com"));
    }

    #[test]
    fn test_list_line_names_suite_and_successes() {
        let selectors = ["create/create-policy".to_string()];
        let scenarios = scenarios_for(&ConformConfig::default(), &selectors).unwrap();
        let line = list_line(&scenarios[0]);
        assert!(line.starts_with("create/create-policy: add "));
        assert!(line.contains("[succeeds: admin]"));
    }
}
