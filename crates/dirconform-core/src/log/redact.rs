//! Secret redaction for diagnostics and log output.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

/// Stand-in written over every scrubbed value.
pub(crate) const REDACTED: &str = "[REDACTED]";

/// Patterns that match credentials in directory diagnostics and tool
/// command lines. The `keep` group survives; the rest of the match is
/// replaced.
static SECRET_PATTERNS: LazyLock<Vec<SecretPattern>> = LazyLock::new(|| {
    vec![
        // LDIF / attribute dumps
        SecretPattern::new(
            r#"(?i)(?P<keep>userPassword['"]?\s*(?::{1,2}|=)\s*\[?['"]?)[^\s'",\]]+"#,
        ),
        SecretPattern::new(
            r#"(?i)(?P<keep>olcRootPW['"]?\s*(?::{1,2}|=)\s*\[?['"]?)[^\s'",\]]+"#,
        ),
        // ldapsearch / ldapmodify simple-auth secret
        SecretPattern::new(r"(?P<keep>(?:^|\s)-w\s+)\S+"),
        // Password-modify payloads and generic key=value pairs
        SecretPattern::new(
            r#"(?i)(?P<keep>\b(?:secret|password|passwd|new_pass|old_pass)['"]?\s*[:=]\s*['"]?)[^\s'",}]+"#,
        ),
        // Hashed password values
        SecretPattern::new(
            r"(?P<keep>)\{(?:SSHA|SHA|SMD5|MD5|CRYPT|PBKDF2[^}]*|ARGON2)\}[A-Za-z0-9+/=$.]+",
        ),
    ]
});

/// One credential shape, compiled once.
struct SecretPattern {
    regex: Regex,
}

impl SecretPattern {
    #[allow(clippy::expect_used)]
    fn new(source: &str) -> Self {
        Self {
            regex: Regex::new(source).expect("built-in secret pattern compiles"),
        }
    }
}

/// Filters credentials out of strings.
///
/// Built-in patterns cover `userPassword`/`olcRootPW` dumps, `-w <secret>`
/// on tool command lines, `password=`-style pairs and hashed values.
/// Known secrets (the root secret, principal secrets) can be registered so
/// they are scrubbed wherever they appear.
///
/// # Example
///
/// ```
/// use dirconform_core::log::SecretRedactor;
///
/// let output = SecretRedactor::new().redact("ldapsearch -x -D cn=admin -w hunter2 -b dc=ci");
/// assert!(!output.contains("hunter2"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SecretRedactor {
    /// Literal secrets registered by the caller.
    literals: Vec<Regex>,
}

impl SecretRedactor {
    /// A redactor with only the built-in patterns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scrubs every occurrence of `secret`. Empty secrets are ignored.
    #[must_use]
    pub fn with_secret(mut self, secret: &SecretString) -> Self {
        let literal = secret.expose_secret();
        if !literal.is_empty() {
            if let Ok(regex) = Regex::new(&regex::escape(literal)) {
                self.literals.push(regex);
            }
        }
        self
    }

    /// Scrubs registered secrets, then the built-in patterns.
    #[must_use]
    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut text = Cow::Borrowed(input);
        for literal in &self.literals {
            if let Some(scrubbed) = substitute(literal, &text, REDACTED) {
                text = Cow::Owned(scrubbed);
            }
        }

        let replacement = format!("${{keep}}{REDACTED}");
        for SecretPattern { regex } in SECRET_PATTERNS.iter() {
            if let Some(scrubbed) = substitute(regex, &text, &replacement) {
                text = Cow::Owned(scrubbed);
            }
        }
        text
    }
}

/// New text when `regex` changed anything.
fn substitute(regex: &Regex, text: &str, replacement: &str) -> Option<String> {
    match regex.replace_all(text, replacement) {
        Cow::Owned(changed) => Some(changed),
        Cow::Borrowed(_) => None,
    }
}

/// Shorthand for [`SecretRedactor::new`] followed by [`SecretRedactor::redact`].
#[must_use]
pub fn redact(input: &str) -> Cow<'_, str> {
    SecretRedactor::new().redact(input)
}
