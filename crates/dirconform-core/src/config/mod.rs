//! Run configuration: endpoint, directory layout, principal roster.
//!
//! A run is described by a TOML file (every section optional) with an
//! environment overlay on top:
//!
//! | Variable | Field |
//! |---|---|
//! | `LDAP_HOST` | `directory.endpoint` |
//! | `ROOT_DC` | `directory.base_dn` |
//! | `ROOT_LDAP_DN` | `directory.root_dn` |
//! | `ORGANIZATION` | `directory.organization` |
//!
//! Secrets never live in the file for the root identity: the file names the
//! environment variable holding it (`directory.root_secret_env`).

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::dn::Dn;

/// Fallback root secret used when the configured variable is unset.
pub const DEFAULT_ROOT_SECRET: &str = "secret";

/// Top-level conformance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConformConfig {
    /// Directory endpoint and root identity.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Subtree layout.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Administrative groups.
    #[serde(default)]
    pub admin_groups: AdminGroupsConfig,

    /// Out-of-band query tool.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Principal roster, evaluated in order.
    #[serde(default = "default_principals")]
    pub principals: Vec<PrincipalConfig>,
}

impl Default for ConformConfig {
    fn default() -> Self {
        Self {
            directory: DirectoryConfig::default(),
            layout: LayoutConfig::default(),
            admin_groups: AdminGroupsConfig::default(),
            probe: ProbeConfig::default(),
            principals: default_principals(),
        }
    }
}

impl ConformConfig {
    /// Reads and parses the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when unreadable, [`ConfigError::Parse`] when malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses TOML text. An empty roster falls back to the built-in ten
    /// principals.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed text or unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        if config.principals.is_empty() {
            config.principals = default_principals();
        }
        Ok(config)
    }

    /// Renders the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] if a value has no TOML form.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies the process environment on top of the loaded values.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Applies an environment overlay read through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(endpoint) = get("LDAP_HOST") {
            self.directory.endpoint = endpoint;
        }
        if let Some(base) = get("ROOT_DC") {
            self.directory.base_dn = base;
        }
        if let Some(root) = get("ROOT_LDAP_DN") {
            self.directory.root_dn = root;
        }
        if let Some(organization) = get("ORGANIZATION") {
            self.directory.organization = organization;
        }
    }

    /// Reads the root secret from the process environment.
    #[must_use]
    pub fn root_secret(&self) -> SecretString {
        self.root_secret_with(|name| std::env::var(name).ok())
    }

    /// Reads the root secret through `lookup`, falling back to
    /// [`DEFAULT_ROOT_SECRET`].
    #[must_use]
    pub fn root_secret_with(&self, lookup: impl Fn(&str) -> Option<String>) -> SecretString {
        lookup(&self.directory.root_secret_env)
            .unwrap_or_else(|| DEFAULT_ROOT_SECRET.to_string())
            .into()
    }

    /// Validates the configuration and resolves every DN.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an empty endpoint, a timeout
    /// out of range, duplicate principal ids, or any DN that does not parse.
    pub fn validate(&self) -> Result<DirectoryLayout, ConfigError> {
        if self.directory.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "directory.endpoint must not be empty".to_string(),
            ));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.directory.timeout_secs) {
            return Err(ConfigError::Validation(format!(
                "directory.timeout_secs must be within {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}, got {}",
                self.directory.timeout_secs
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for principal in &self.principals {
            if principal.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "principal id must not be empty".to_string(),
                ));
            }
            if !seen.insert(principal.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate principal id: {}",
                    principal.id
                )));
            }
            if let Some(dn) = &principal.dn {
                parse_dn("principals.dn", dn)?;
            }
        }
        self.resolve_layout()
    }

    fn resolve_layout(&self) -> Result<DirectoryLayout, ConfigError> {
        let base = parse_dn("directory.base_dn", &self.directory.base_dn)?;
        if base.is_root() {
            return Err(ConfigError::Validation(
                "directory.base_dn must not be empty".to_string(),
            ));
        }
        let root = if self.directory.root_dn.trim_end().ends_with(',') {
            let prefix = self.directory.root_dn.trim_end().trim_end_matches(',');
            parse_dn("directory.root_dn", prefix)?.under(&base)
        } else {
            parse_dn("directory.root_dn", &self.directory.root_dn)?
        };
        let relative =
            |field: &str, value: &str| parse_dn(field, value).map(|dn| dn.under(&base));
        let groups = relative("layout.groups", &self.layout.groups)?;
        Ok(DirectoryLayout {
            people: relative("layout.people", &self.layout.people)?,
            applications: relative("layout.applications", &self.layout.applications)?,
            policies: relative("layout.policies", &self.layout.policies)?,
            config_database: parse_dn("layout.config_database", &self.layout.config_database)?,
            people_admin_group: parse_dn("admin_groups.people_admin", &self.admin_groups.people_admin)?
                .under(&groups),
            apps_admin_group: parse_dn("admin_groups.apps_admin", &self.admin_groups.apps_admin)?
                .under(&groups),
            groups,
            root,
            base,
            organization: self.directory.organization.clone(),
        })
    }

    /// Per-operation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.directory.timeout_secs)
    }
}

fn parse_dn(field: &str, value: &str) -> Result<Dn, ConfigError> {
    Dn::parse(value).map_err(|err| ConfigError::Validation(format!("{field}: {err}")))
}

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Directory endpoint and root identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Endpoint URL (`ldap://` or `ldaps://`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Naming context under test.
    #[serde(default = "default_base_dn")]
    pub base_dn: String,

    /// Root identity. A trailing comma means "prefix of `base_dn`".
    #[serde(default = "default_root_dn")]
    pub root_dn: String,

    /// Name of the environment variable holding the root secret.
    #[serde(default = "default_root_secret_env")]
    pub root_secret_env: String,

    /// Organization label written into generated people.
    #[serde(default = "default_organization")]
    pub organization: String,

    /// Connect and per-operation timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Verify the server certificate on `ldaps://` endpoints.
    #[serde(default = "default_true")]
    pub tls_verify: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            base_dn: default_base_dn(),
            root_dn: default_root_dn(),
            root_secret_env: default_root_secret_env(),
            organization: default_organization(),
            timeout_secs: default_timeout_secs(),
            tls_verify: true,
        }
    }
}

fn default_endpoint() -> String {
    "ldaps://ldap.ci.example.com".to_string()
}

fn default_base_dn() -> String {
    "dc=ci,dc=example,dc=com".to_string()
}

fn default_root_dn() -> String {
    "cn=admin,".to_string()
}

fn default_root_secret_env() -> String {
    "ROOT_LDAP_SECRET".to_string()
}

fn default_organization() -> String {
    "example corporate".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

/// Subtree RDNs, relative to the base DN.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// People subtree.
    #[serde(default = "default_people")]
    pub people: String,
    /// Groups subtree.
    #[serde(default = "default_groups")]
    pub groups: String,
    /// Application identities subtree.
    #[serde(default = "default_applications")]
    pub applications: String,
    /// Password policies subtree.
    #[serde(default = "default_policies")]
    pub policies: String,
    /// Configuration database (absolute).
    #[serde(default = "default_config_database")]
    pub config_database: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            people: default_people(),
            groups: default_groups(),
            applications: default_applications(),
            policies: default_policies(),
            config_database: default_config_database(),
        }
    }
}

fn default_people() -> String {
    "ou=people".to_string()
}

fn default_groups() -> String {
    "ou=groups".to_string()
}

fn default_applications() -> String {
    "ou=applications".to_string()
}

fn default_policies() -> String {
    "ou=policies".to_string()
}

fn default_config_database() -> String {
    "olcDatabase={1}mdb,cn=config".to_string()
}

/// Administrative group RDNs, relative to the groups subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminGroupsConfig {
    /// Group whose members administer people and groups.
    #[serde(default = "default_people_admin")]
    pub people_admin: String,
    /// Group whose members administer application identities.
    #[serde(default = "default_apps_admin")]
    pub apps_admin: String,
}

impl Default for AdminGroupsConfig {
    fn default() -> Self {
        Self {
            people_admin: default_people_admin(),
            apps_admin: default_apps_admin(),
        }
    }
}

fn default_people_admin() -> String {
    "cn=ldap_people_admin".to_string()
}

fn default_apps_admin() -> String {
    "cn=ldap_apps_admin".to_string()
}

/// Out-of-band query tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Program to invoke.
    #[serde(default = "default_probe_program")]
    pub program: String,
    /// Run the probe scenarios at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: default_probe_program(),
            enabled: true,
        }
    }
}

fn default_probe_program() -> String {
    "ldapsearch".to_string()
}

/// Administrative group a principal must belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminGroup {
    /// People and groups administration.
    PeopleAdmin,
    /// Application identity administration.
    AppsAdmin,
}

/// One roster entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalConfig {
    /// Unique id.
    pub id: String,

    /// Human-readable description used in failure messages.
    #[serde(default)]
    pub description: String,

    /// Identity relative to the base DN. Absent for anonymous.
    #[serde(default)]
    pub dn: Option<String>,

    /// Binds with the root identity instead of `dn`.
    #[serde(default)]
    pub root: bool,

    /// Test secret seeded in the directory for this identity.
    #[serde(default)]
    pub secret: Option<String>,

    /// Environment variable overriding `secret`.
    #[serde(default)]
    pub secret_env: Option<String>,

    /// Groups the registry must grant before the first case.
    #[serde(default)]
    pub grants: Vec<AdminGroup>,

    /// Grants already satisfied by the directory seed.
    #[serde(default)]
    pub preseeded: bool,
}

impl PrincipalConfig {
    fn entry(
        id: &str,
        description: &str,
        dn: &str,
        secret: &str,
        grants: &[AdminGroup],
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            dn: Some(dn.to_string()),
            root: false,
            secret: Some(secret.to_string()),
            secret_env: None,
            grants: grants.to_vec(),
            preseeded: false,
        }
    }
}

/// The ten-principal roster.
#[must_use]
pub fn default_principals() -> Vec<PrincipalConfig> {
    use AdminGroup::{AppsAdmin, PeopleAdmin};

    let mut user_admin = PrincipalConfig::entry(
        "user-admin",
        "user that is an administrator of people and applications",
        "uid=test_default_admin,ou=people",
        "test password",
        &[PeopleAdmin, AppsAdmin],
    );
    user_admin.preseeded = true;

    vec![
        PrincipalConfig {
            id: "anonymous".to_string(),
            description: "anonymous, unauthenticated connection".to_string(),
            dn: None,
            root: false,
            secret: None,
            secret_env: None,
            grants: Vec::new(),
            preseeded: false,
        },
        PrincipalConfig::entry(
            "user",
            "plain user without any administrative group",
            "uid=tuser,ou=people",
            "tuserPASS",
            &[],
        ),
        PrincipalConfig::entry(
            "user-people-admin",
            "user that is an administrator of people",
            "uid=tadmin-people,ou=people",
            "tadmin-peoplePASS",
            &[PeopleAdmin],
        ),
        PrincipalConfig::entry(
            "user-apps-admin",
            "user that is an administrator of applications",
            "uid=tadmin-apps,ou=people",
            "tadmin-appsPASS",
            &[AppsAdmin],
        ),
        user_admin,
        PrincipalConfig {
            id: "admin".to_string(),
            description: "directory root administrator".to_string(),
            dn: None,
            root: true,
            secret: None,
            secret_env: None,
            grants: Vec::new(),
            preseeded: false,
        },
        PrincipalConfig::entry(
            "app",
            "plain application identity",
            "uid=fakeapp2,ou=applications",
            "fakeapp2PASS",
            &[],
        ),
        PrincipalConfig::entry(
            "app-people-admin",
            "application that is an administrator of people",
            "uid=tapp-people-admin,ou=applications",
            "tapp-people-adminPASS",
            &[PeopleAdmin],
        ),
        PrincipalConfig::entry(
            "app-apps-admin",
            "application that is an administrator of applications",
            "uid=tapp-apps-admin,ou=applications",
            "tapp-apps-adminPASS",
            &[AppsAdmin],
        ),
        PrincipalConfig::entry(
            "app-admin",
            "application that is an administrator of people and applications",
            "uid=tapp-admin,ou=applications",
            "tapp-adminPASS",
            &[PeopleAdmin, AppsAdmin],
        ),
    ]
}

/// Fully resolved directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    /// Naming context under test.
    pub base: Dn,
    /// Root identity.
    pub root: Dn,
    /// People subtree.
    pub people: Dn,
    /// Groups subtree.
    pub groups: Dn,
    /// Application identities subtree.
    pub applications: Dn,
    /// Password policies subtree.
    pub policies: Dn,
    /// Configuration database entry.
    pub config_database: Dn,
    /// People administration group.
    pub people_admin_group: Dn,
    /// Application administration group.
    pub apps_admin_group: Dn,
    /// Organization label.
    pub organization: String,
}

impl DirectoryLayout {
    /// DN of the given administrative group.
    #[must_use]
    pub const fn admin_group(&self, group: AdminGroup) -> &Dn {
        match group {
            AdminGroup::PeopleAdmin => &self.people_admin_group,
            AdminGroup::AppsAdmin => &self.apps_admin_group,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Rendering back to TOML failed.
    #[error("cannot render config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parse but do not describe a usable run.
    #[error("invalid config: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConformConfig::from_toml("").unwrap();
        assert_eq!(config.directory.endpoint, "ldaps://ldap.ci.example.com");
        assert_eq!(config.directory.timeout_secs, 10);
        assert!(config.directory.tls_verify);
        assert_eq!(config.principals.len(), 10);
        assert_eq!(config.principals[0].id, "anonymous");

        let layout = config.validate().unwrap();
        assert_eq!(layout.root.to_string(), "cn=admin,dc=ci,dc=example,dc=com");
        assert_eq!(
            layout.people_admin_group.to_string(),
            "cn=ldap_people_admin,ou=groups,dc=ci,dc=example,dc=com"
        );
        assert_eq!(layout.config_database.to_string(), "olcDatabase={1}mdb,cn=config");
    }

    #[test]
    fn test_absolute_root_dn() {
        let config = ConformConfig::from_toml(
            r#"
            [directory]
            root_dn = "cn=manager,dc=other"
            "#,
        )
        .unwrap();
        let layout = config.validate().unwrap();
        assert_eq!(layout.root.to_string(), "cn=manager,dc=other");
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("LDAP_HOST", "ldap://localhost:3389"),
            ("ROOT_DC", "dc=test"),
            ("ORGANIZATION", ""),
            ("ROOT_LDAP_SECRET", "s3cret"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(ToString::to_string);

        let mut config = ConformConfig::default();
        config.apply_env_with(lookup);

        assert_eq!(config.directory.endpoint, "ldap://localhost:3389");
        assert_eq!(config.directory.base_dn, "dc=test");
        assert_eq!(config.directory.organization, "example corporate");
        assert_eq!(config.root_secret_with(lookup).expose_secret(), "s3cret");
        assert_eq!(config.root_secret_with(|_| None).expose_secret(), DEFAULT_ROOT_SECRET);
    }

    #[test]
    fn test_validation_rejects_bad_timeout() {
        let config = ConformConfig::from_toml("[directory]\ntimeout_secs = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(msg)) if msg.contains("timeout")));
    }

    #[test]
    fn test_validation_rejects_duplicate_principals() {
        let config = ConformConfig::from_toml(
            r#"
            [[principals]]
            id = "user"
            dn = "uid=a,ou=people"

            [[principals]]
            id = "user"
            dn = "uid=b,ou=people"
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_validation_rejects_bad_dn() {
        let config = ConformConfig::from_toml("[directory]\nbase_dn = \"dc=ci,,dc=com\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(msg)) if msg.contains("base_dn")));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(matches!(
            ConformConfig::from_toml("[directory]\npassword = \"x\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file_and_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[directory]\nendpoint = \"ldap://127.0.0.1:389\"\n\n[probe]\nenabled = false"
        )
        .unwrap();

        let config = ConformConfig::from_file(file.path()).unwrap();
        assert_eq!(config.directory.endpoint, "ldap://127.0.0.1:389");
        assert!(!config.probe.enabled);

        let reparsed = ConformConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(reparsed.principals.len(), config.principals.len());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConformConfig::from_file(&dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
