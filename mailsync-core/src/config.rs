//! Layered configuration: optional YAML file, overridden by environment.
//!
//! # Sources
//!
//! ```text
//! 1. <config file>          (optional, flat YAML mapping of key: value)
//! 2. MAILSYNC_<KEY> env     (overrides the file, key upper-cased)
//! ```
//!
//! # API pattern
//!
//! - [`SyncConfig::from_sources`] takes the file path and an explicit env
//!   iterator; used in tests.
//! - [`SyncConfig::load`] reads the process environment and delegates.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "MAILSYNC_";

pub const DEFAULT_USER_FILTER: &str =
    "(|(sophomorixRole=student)(sophomorixRole=teacher)(sophomorixRole=schooladministrator))";
pub const DEFAULT_SOGO_USER_FILTER: &str =
    "(sophomorixRole='student' OR sophomorixRole='teacher' OR sophomorixRole='schooladministrator')";
pub const DEFAULT_GROUP_FILTER: &str = "(|(sophomorixType=adminclass)(sophomorixType=project))";
pub const DEFAULT_API_URI: &str = "https://nginx-mailcow";
pub const DEFAULT_DOCKERAPI_URI: &str = "https://dockerapi-mailcow";
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OUTPUT_DIR: &str = "conf";

const REDACTED: &str = "********";

/// Every key accepted in the config file (and, upper-cased, in the env).
const KNOWN_KEYS: &[&str] = &[
    "ldap_uri",
    "ldap_base_dn",
    "ldap_bind_dn",
    "ldap_bind_password",
    "ldap_user_filter",
    "ldap_group_filter",
    "ldap_sogo_user_filter",
    "api_uri",
    "api_key",
    "dockerapi_uri",
    "verify_tls",
    "http_timeout",
    "sync_interval",
    "retry_interval",
    "domain_quota",
    "enable_gal",
    "list_delivery",
    "on_mutation_error",
    "template_dir",
    "config_output_dir",
    "log_format",
    "error_messages",
];

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a mailing-list group is represented on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListDelivery {
    /// A list mailbox whose prefilter redirects a copy to every member.
    #[default]
    Filter,
    /// A single alias fanning out to every member.
    Alias,
}

impl FromStr for ListDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" => Ok(Self::Filter),
            "alias" => Ok(Self::Alias),
            other => Err(format!("unknown list delivery '{other}'; expected: filter, alias")),
        }
    }
}

/// What the daemon does after a cycle failed while applying mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationErrorPolicy {
    /// Sleep the retry interval; the next cycle re-derives and converges.
    #[default]
    NextCycle,
    /// Re-run the whole cycle once straight away before falling back to
    /// the retry interval.
    ImmediateRetry,
}

impl FromStr for MutationErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next_cycle" => Ok(Self::NextCycle),
            "immediate_retry" => Ok(Self::ImmediateRetry),
            other => Err(format!(
                "unknown mutation error policy '{other}'; expected: next_cycle, immediate_retry"
            )),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'; expected: text, json")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Directory connection and query settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LdapSettings {
    pub uri: String,
    pub base_dn: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub user_filter: String,
    pub group_filter: String,
    /// Only used by the rendered SOGo config.
    pub sogo_user_filter: String,
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl LdapSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Backend REST and docker-api settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailcowSettings {
    pub api_uri: String,
    pub api_key: String,
    pub dockerapi_uri: String,
    pub verify_tls: bool,
    pub timeout_secs: u64,
    /// Server error code -> human-readable replacement.
    pub error_messages: BTreeMap<String, String>,
}

impl MailcowSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Cycle scheduling and desired-record shaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSettings {
    pub sync_interval_secs: u64,
    pub retry_interval_secs: u64,
    /// Per-domain and per-mailbox quota ceiling, in MiB.
    pub domain_quota: u64,
    pub enable_gal: bool,
    pub list_delivery: ListDelivery,
    pub on_mutation_error: MutationErrorPolicy,
}

impl CycleSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Where config templates come from and where rendered files go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSettings {
    pub template_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
}

/// The fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    pub ldap: LdapSettings,
    pub mailcow: MailcowSettings,
    pub cycle: CycleSettings,
    pub templates: TemplateSettings,
    pub log_format: LogFormat,
}

impl SyncConfig {
    /// Load from an optional YAML file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(file, std::env::vars())
    }

    /// Load from an optional YAML file and an explicit environment.
    pub fn from_sources<I>(file: Option<&Path>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layers = Layers::default();
        if let Some(path) = file {
            layers.read_file(path)?;
        }
        layers.apply_env(env);
        layers.resolve()
    }

    /// A copy with secrets masked, fit for logging or printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.ldap.bind_password = REDACTED.to_string();
        copy.mailcow.api_key = REDACTED.to_string();
        copy
    }
}

// ---------------------------------------------------------------------------
// Layering
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Layers {
    values: BTreeMap<String, String>,
    error_messages: Option<BTreeMap<String, String>>,
}

impl Layers {
    fn read_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        for (key, value) in raw {
            let key = key.to_ascii_lowercase();
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::Invalid {
                    key,
                    message: format!("unknown key in {}", path.display()),
                });
            }
            if key == "error_messages" {
                let table: BTreeMap<String, String> =
                    serde_yaml::from_value(value).map_err(|e| ConfigError::Invalid {
                        key: key.clone(),
                        message: format!("expected a mapping of error code to message: {e}"),
                    })?;
                self.error_messages = Some(table);
                continue;
            }
            match scalar_to_string(&value) {
                Some(text) => {
                    self.values.insert(key, text);
                }
                None if value.is_null() => {}
                None => {
                    return Err(ConfigError::Invalid {
                        key,
                        message: "expected a scalar value".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn apply_env<I>(&mut self, env: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in env {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            if KNOWN_KEYS.contains(&key.as_str()) && key != "error_messages" {
                self.values.insert(key, value);
            }
        }
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        match self.values.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value.clone()),
            _ => Err(ConfigError::Missing {
                key: key.to_string(),
                env: format!("{ENV_PREFIX}{}", key.to_ascii_uppercase()),
            }),
        }
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    }

    fn parsed<T>(&self, key: &str, value: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn required_u64(&self, key: &str) -> Result<u64, ConfigError> {
        let raw = self.required(key)?;
        self.parsed(key, &raw)
    }

    fn optional_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.optional(key) {
            Some(raw) => self.parsed(key, &raw),
            None => Ok(default),
        }
    }

    fn optional_parsed<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr + Default,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => self.parsed(key, &raw),
            None => Ok(T::default()),
        }
    }

    fn bool_value(&self, key: &str, raw: &str) -> Result<bool, ConfigError> {
        parse_bool(raw).ok_or_else(|| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("'{raw}' is not a boolean (use 1/0, true/false, yes/no)"),
        })
    }

    fn resolve(self) -> Result<SyncConfig, ConfigError> {
        let verify_tls = match self.optional("verify_tls") {
            Some(raw) => self.bool_value("verify_tls", &raw)?,
            None => false,
        };
        let timeout_secs = self.optional_u64("http_timeout", DEFAULT_TIMEOUT_SECS)?;

        let ldap = LdapSettings {
            uri: self.required("ldap_uri")?,
            base_dn: self.required("ldap_base_dn")?,
            bind_dn: self.required("ldap_bind_dn")?,
            bind_password: self.required("ldap_bind_password")?,
            user_filter: self
                .optional("ldap_user_filter")
                .unwrap_or_else(|| DEFAULT_USER_FILTER.to_string()),
            group_filter: self
                .optional("ldap_group_filter")
                .unwrap_or_else(|| DEFAULT_GROUP_FILTER.to_string()),
            sogo_user_filter: self
                .optional("ldap_sogo_user_filter")
                .unwrap_or_else(|| DEFAULT_SOGO_USER_FILTER.to_string()),
            verify_tls,
            timeout_secs,
        };

        let mut error_messages = default_error_messages();
        if let Some(overrides) = &self.error_messages {
            error_messages.extend(overrides.clone());
        }

        let mailcow = MailcowSettings {
            api_uri: trim_trailing_slash(
                self.optional("api_uri")
                    .unwrap_or_else(|| DEFAULT_API_URI.to_string()),
            ),
            api_key: self.required("api_key")?,
            dockerapi_uri: trim_trailing_slash(
                self.optional("dockerapi_uri")
                    .unwrap_or_else(|| DEFAULT_DOCKERAPI_URI.to_string()),
            ),
            verify_tls,
            timeout_secs,
            error_messages,
        };

        let sync_interval_secs = self.required_u64("sync_interval")?;
        if sync_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "sync_interval".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        let enable_gal_raw = self.required("enable_gal")?;
        let cycle = CycleSettings {
            sync_interval_secs,
            retry_interval_secs: self
                .optional_u64("retry_interval", DEFAULT_RETRY_INTERVAL_SECS)?,
            domain_quota: self.required_u64("domain_quota")?,
            enable_gal: self.bool_value("enable_gal", &enable_gal_raw)?,
            list_delivery: self.optional_parsed("list_delivery")?,
            on_mutation_error: self.optional_parsed("on_mutation_error")?,
        };

        let templates = TemplateSettings {
            template_dir: self.optional("template_dir").map(PathBuf::from),
            output_dir: PathBuf::from(
                self.optional("config_output_dir")
                    .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            ),
        };

        Ok(SyncConfig {
            ldap,
            mailcow,
            cycle,
            templates,
            log_format: self.optional_parsed("log_format")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn default_error_messages() -> BTreeMap<String, String> {
    let mut table = BTreeMap::new();
    table.insert(
        "mailbox_quota_left_exceeded".to_string(),
        "The quota of the domain was exceeded, please choose a higher value for domain_quota"
            .to_string(),
    );
    table
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn trim_trailing_slash(uri: String) -> String {
    uri.trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal_env() -> Vec<(String, String)> {
        env(&[
            ("MAILSYNC_LDAP_URI", "ldaps://dc.school.lan"),
            ("MAILSYNC_LDAP_BASE_DN", "DC=school,DC=lan"),
            ("MAILSYNC_LDAP_BIND_DN", "CN=mail,DC=school,DC=lan"),
            ("MAILSYNC_LDAP_BIND_PASSWORD", "secret"),
            ("MAILSYNC_API_KEY", "key-123"),
            ("MAILSYNC_SYNC_INTERVAL", "300"),
            ("MAILSYNC_DOMAIN_QUOTA", "10240"),
            ("MAILSYNC_ENABLE_GAL", "1"),
        ])
    }

    #[test]
    fn minimal_env_fills_defaults() {
        let config = SyncConfig::from_sources(None, minimal_env()).expect("config");
        assert_eq!(config.ldap.user_filter, DEFAULT_USER_FILTER);
        assert_eq!(config.mailcow.api_uri, DEFAULT_API_URI);
        assert_eq!(config.mailcow.dockerapi_uri, DEFAULT_DOCKERAPI_URI);
        assert_eq!(config.cycle.retry_interval_secs, DEFAULT_RETRY_INTERVAL_SECS);
        assert_eq!(config.cycle.sync_interval(), Duration::from_secs(300));
        assert!(config.cycle.enable_gal);
        assert!(!config.mailcow.verify_tls);
        assert_eq!(config.cycle.list_delivery, ListDelivery::Filter);
        assert_eq!(config.cycle.on_mutation_error, MutationErrorPolicy::NextCycle);
        assert_eq!(config.templates.output_dir, PathBuf::from("conf"));
        assert!(config
            .mailcow
            .error_messages
            .contains_key("mailbox_quota_left_exceeded"));
    }

    #[test]
    fn missing_required_key_is_reported() {
        let mut vars = minimal_env();
        vars.retain(|(k, _)| k != "MAILSYNC_API_KEY");
        let err = SyncConfig::from_sources(None, vars).unwrap_err();
        match err {
            ConfigError::Missing { key, env } => {
                assert_eq!(key, "api_key");
                assert_eq!(env, "MAILSYNC_API_KEY");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_bool_is_reported() {
        let mut vars = minimal_env();
        vars.push(("MAILSYNC_ENABLE_GAL".into(), "maybe".into()));
        let err = SyncConfig::from_sources(None, vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "enable_gal"));
    }

    #[rstest]
    #[case("1", Some(true))]
    #[case("TRUE", Some(true))]
    #[case(" yes ", Some(true))]
    #[case("0", Some(false))]
    #[case("off", Some(false))]
    #[case("2", None)]
    fn bool_spellings(#[case] raw: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_bool(raw), expected);
    }

    #[test]
    fn zero_sync_interval_is_rejected() {
        let mut vars = minimal_env();
        vars.push(("MAILSYNC_SYNC_INTERVAL".into(), "0".into()));
        assert!(SyncConfig::from_sources(None, vars).is_err());
    }

    #[test]
    fn env_overrides_file_and_file_supplies_error_messages() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("mailsync.yaml");
        std::fs::write(
            &path,
            "ldap_uri: ldap://from-file\n\
             sync_interval: 60\n\
             list_delivery: alias\n\
             api_uri: https://mail.example/\n\
             error_messages:\n  object_exists: \"already there\"\n",
        )
        .expect("write config");

        let config = SyncConfig::from_sources(Some(&path), minimal_env()).expect("config");
        assert_eq!(config.ldap.uri, "ldaps://dc.school.lan");
        assert_eq!(config.cycle.sync_interval_secs, 300);
        assert_eq!(config.cycle.list_delivery, ListDelivery::Alias);
        assert_eq!(config.mailcow.api_uri, "https://mail.example");
        assert_eq!(
            config.mailcow.error_messages.get("object_exists").map(String::as_str),
            Some("already there")
        );
        assert!(config
            .mailcow
            .error_messages
            .contains_key("mailbox_quota_left_exceeded"));
    }

    #[test]
    fn unknown_file_key_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("mailsync.yaml");
        std::fs::write(&path, "ldap_url: ldap://typo\n").expect("write config");
        let err = SyncConfig::from_sources(Some(&path), minimal_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ldap_url"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("mailsync.yaml");
        std::fs::write(&path, "ldap_uri: [unterminated\n").expect("write config");
        let err = SyncConfig::from_sources(Some(&path), minimal_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn redacted_masks_secrets() {
        let config = SyncConfig::from_sources(None, minimal_env()).expect("config");
        let redacted = config.redacted();
        assert_eq!(redacted.ldap.bind_password, REDACTED);
        assert_eq!(redacted.mailcow.api_key, REDACTED);
        assert_eq!(redacted.ldap.uri, config.ldap.uri);
    }
}
