//! Subcommand implementations.
//!
//! # Exit Codes
//!
//! - 0: every case conforms
//! - 1: at least one case deviates
//! - 2: the environment is unusable (configuration, connection, probe)

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use dirconform_core::config::ConformConfig;

pub mod list;
pub mod run;

/// Process exit codes.
pub mod exit_codes {
    /// Every case conforms.
    pub const SUCCESS: u8 = 0;
    /// At least one case deviates.
    pub const DEVIATION: u8 = 1;
    /// Configuration or connection failure.
    pub const ENVIRONMENT: u8 = 2;
}

/// Report rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Loads the configuration file, or the defaults when no path is given,
/// then applies the environment overlay.
pub fn load_config(path: Option<&Path>) -> Result<ConformConfig> {
    let mut config = match path {
        Some(path) => ConformConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ConformConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

/// Prints an environment failure and returns its exit code.
pub fn environment_failure(err: &anyhow::Error) -> u8 {
    eprintln!("Error: {}", dirconform_core::log::redact(&format!("{err:#}")));
    exit_codes::ENVIRONMENT
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_codes::SUCCESS, 0);
        assert_eq!(exit_codes::DEVIATION, 1);
        assert_eq!(exit_codes::ENVIRONMENT, 2);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[directory]\nbase_dn = \"dc=other,dc=org\"").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.directory.base_dn, "dc=other,dc=org");
        assert_eq!(config.principals.len(), 10);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/dirconform.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/dirconform.toml"));
    }
}
