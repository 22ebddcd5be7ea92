//! Out-of-band query tool.
//!
//! Some connection scenarios double-check visibility with an external
//! command-line search instead of the session abstraction. The contract is
//! the tool's exit code: zero means success, anything else means failure
//! or denial.

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use xshell::Shell;

use crate::dn::Dn;
use crate::error::ConformError;
use crate::filter::Filter;
use crate::log::SecretRedactor;

/// One out-of-band search.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// Bind identity; `None` searches anonymously.
    pub bind: Option<(Dn, SecretString)>,
    /// Search base.
    pub base: Dn,
    /// Filter.
    pub filter: Filter,
    /// Requested attributes.
    pub attributes: Vec<String>,
}

impl ProbeRequest {
    /// Anonymous subtree search.
    #[must_use]
    pub const fn new(base: Dn, filter: Filter) -> Self {
        Self {
            bind: None,
            base,
            filter,
            attributes: Vec::new(),
        }
    }

    /// Binds as `dn` before searching.
    #[must_use]
    pub fn bind_as(mut self, dn: Dn, secret: SecretString) -> Self {
        self.bind = Some((dn, secret));
        self
    }

    /// Restricts the returned attributes.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Exit code; `None` when the tool was killed by a signal.
    pub exit_code: Option<i32>,
    /// `true` only for exit code zero.
    pub success: bool,
    /// Redacted standard error, for failure messages.
    pub stderr: String,
}

impl ProbeOutcome {
    /// Outcome for a tool that exited with `code`.
    #[must_use]
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            success: code == 0,
            stderr: String::new(),
        }
    }
}

/// Runs out-of-band searches.
pub trait QueryProbe: Send + Sync {
    /// Runs one search.
    ///
    /// # Errors
    ///
    /// Returns [`ConformError::Probe`] only when the tool cannot be launched.
    /// A non-zero exit is an `Ok` outcome.
    fn query(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ConformError>;

    /// Name of the tool, for messages.
    fn program(&self) -> &str;
}

/// `ldapsearch`-compatible probe.
///
/// Runs `<program> -v -x -LLL -H <endpoint> [-D <dn> -w <secret>] -b <base>
/// <filter> [attrs..]`.
#[derive(Debug, Clone)]
pub struct LdapSearchProbe {
    program: String,
    endpoint: String,
}

impl LdapSearchProbe {
    /// Creates a probe for `endpoint`.
    #[must_use]
    pub fn new(program: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Arguments after the program name. Secrets are exposed here only.
    fn args(&self, request: &ProbeRequest) -> Vec<String> {
        let mut args = vec![
            "-v".to_string(),
            "-x".to_string(),
            "-LLL".to_string(),
            "-H".to_string(),
            self.endpoint.clone(),
        ];
        if let Some((dn, secret)) = &request.bind {
            args.extend([
                "-D".to_string(),
                dn.to_string(),
                "-w".to_string(),
                secret.expose_secret().to_string(),
            ]);
        }
        args.extend(["-b".to_string(), request.base.to_string()]);
        args.push(request.filter.to_string());
        args.extend(request.attributes.iter().cloned());
        args
    }
}

impl QueryProbe for LdapSearchProbe {
    fn query(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ConformError> {
        let sh = Shell::new().map_err(|err| ConformError::probe(&self.program, err.to_string()))?;
        let program = &self.program;
        let args = self.args(request);

        let mut redactor = SecretRedactor::new();
        if let Some((_, secret)) = &request.bind {
            redactor = redactor.with_secret(secret);
        }

        let output = sh
            .cmd(program)
            .args(args)
            .quiet()
            .ignore_status()
            .output()
            .map_err(|err| ConformError::probe(program, err.to_string()))?;

        let stderr = redactor
            .redact(String::from_utf8_lossy(&output.stderr).trim())
            .into_owned();
        let exit_code = output.status.code();
        debug!(
            program = %program,
            base = %request.base,
            exit_code = ?exit_code,
            "probe finished"
        );
        Ok(ProbeOutcome {
            exit_code,
            success: output.status.success(),
            stderr,
        })
    }

    fn program(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProbeRequest {
        ProbeRequest::new(
            Dn::parse("ou=people,dc=ci").unwrap(),
            Filter::object_class("inetOrgPerson"),
        )
        .with_attributes(["uid", "givenName"])
    }

    #[test]
    fn test_anonymous_args() {
        let probe = LdapSearchProbe::new("ldapsearch", "ldap://localhost");
        assert_eq!(
            probe.args(&request()),
            [
                "-v",
                "-x",
                "-LLL",
                "-H",
                "ldap://localhost",
                "-b",
                "ou=people,dc=ci",
                "(objectClass=inetOrgPerson)",
                "uid",
                "givenName",
            ]
        );
    }

    #[test]
    fn test_bound_args() {
        let probe = LdapSearchProbe::new("ldapsearch", "ldap://localhost");
        let request = request().bind_as(
            Dn::parse("uid=tuser,ou=people,dc=ci").unwrap(),
            SecretString::from("tuserPASS".to_string()),
        );
        let args = probe.args(&request);
        let d = args.iter().position(|arg| arg == "-D").unwrap();
        assert_eq!(args[d + 1], "uid=tuser,ou=people,dc=ci");
        assert_eq!(args[d + 3], "tuserPASS");
    }

    #[test]
    fn test_missing_program_is_probe_error() {
        let probe = LdapSearchProbe::new("dirconform-no-such-tool", "ldap://localhost");
        let err = probe.query(&request()).unwrap_err();
        assert!(matches!(err, ConformError::Probe { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_exit_code_contract() {
        assert!(ProbeOutcome::exited(0).success);
        assert!(!ProbeOutcome::exited(32).success);
    }
}
