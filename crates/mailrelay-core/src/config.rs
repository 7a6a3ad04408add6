//! Relay configuration.
//!
//! Loaded from a JSON file. The account password is never part of the file;
//! it comes from the environment variable named by `password_env`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Security/encryption mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// No encryption (local test servers only).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect (SMTP only).
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }
}

/// Mailbox (IMAP) endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImapConfig {
    /// Server hostname.
    pub host: String,
    /// Server port; defaults by security mode.
    #[serde(default)]
    pub port: Option<u16>,
    /// Security mode.
    #[serde(default)]
    pub security: Security,
    /// Folder to watch.
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

impl ImapConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None | Security::StartTls => 143,
            Security::Tls => 993,
        }
    }

    /// Effective port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| Self::default_port(self.security))
    }
}

/// Relay (SMTP) endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Server hostname.
    pub host: String,
    /// Server port; defaults by security mode.
    #[serde(default)]
    pub port: Option<u16>,
    /// Security mode.
    #[serde(default)]
    pub security: Security,
    /// Name announced in EHLO.
    #[serde(default = "default_helo_name")]
    pub helo_name: String,
}

impl SmtpConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None => 25,
            Security::StartTls => 587,
            Security::Tls => 465,
        }
    }

    /// Effective port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| Self::default_port(self.security))
    }
}

/// Full relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay account address; also the `From` of every outgoing message.
    pub email: String,
    /// Login name, when it differs from `email`.
    #[serde(default)]
    pub username: Option<String>,
    /// Administrator address.
    pub admin_email: String,
    /// Mailbox endpoint.
    pub imap: ImapConfig,
    /// Relay endpoint.
    pub smtp: SmtpConfig,
    /// Subscriber CSV file.
    pub roster_path: PathBuf,
    /// Subject marker that turns an administrator message into a broadcast.
    #[serde(default = "default_trigger_token")]
    pub trigger_token: String,
    /// Pause between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Pause while the roster is empty.
    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,
    /// Pause after a failed cycle.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Upper bound for every network operation.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    /// Environment variable holding the account password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

fn default_trigger_token() -> String {
    "samlingsbrev".to_string()
}

const fn default_poll_interval() -> u64 {
    10
}

const fn default_idle_interval() -> u64 {
    60
}

const fn default_retry_delay() -> u64 {
    60
}

const fn default_io_timeout() -> u64 {
    60
}

fn default_password_env() -> String {
    "PASSWORD".to_string()
}

impl RelayConfig {
    /// Default config location: `<config dir>/mailrelay/config.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailrelay").join("config.json"))
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or validation fails.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate().map_err(|errors| {
            let messages: Vec<&str> = errors.iter().map(ValidationError::message).collect();
            Error::Config(messages.join("; "))
        })?;
        Ok(config)
    }

    /// Checks required fields and value ranges.
    ///
    /// # Errors
    ///
    /// Returns every problem found.
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        if self.email.trim().is_empty() {
            errors.push(ValidationError::EmptyEmail);
        }
        if self.admin_email.trim().is_empty() {
            errors.push(ValidationError::EmptyAdminEmail);
        }

        if self.imap.host.trim().is_empty() {
            errors.push(ValidationError::EmptyImapHost);
        }
        if self.imap.port == Some(0) {
            errors.push(ValidationError::InvalidImapPort);
        }
        if self.imap.security == Security::StartTls {
            errors.push(ValidationError::UnsupportedImapStartTls);
        }
        if self.imap.mailbox.trim().is_empty() {
            errors.push(ValidationError::EmptyMailbox);
        }

        if self.smtp.host.trim().is_empty() {
            errors.push(ValidationError::EmptySmtpHost);
        }
        if self.smtp.port == Some(0) {
            errors.push(ValidationError::InvalidSmtpPort);
        }

        if self.roster_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyRosterPath);
        }
        if self.trigger_token.trim().is_empty() {
            errors.push(ValidationError::EmptyTriggerToken);
        }
        if self.password_env.trim().is_empty() {
            errors.push(ValidationError::EmptyPasswordEnv);
        }

        if [
            self.poll_interval_secs,
            self.idle_interval_secs,
            self.retry_delay_secs,
            self.io_timeout_secs,
        ]
        .contains(&0)
        {
            errors.push(ValidationError::ZeroInterval);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Login name (defaults to `email`).
    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.email)
    }

    /// Pause between poll cycles.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Pause while the roster is empty.
    #[must_use]
    pub const fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    /// Pause after a failed cycle.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Upper bound for every network operation.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Validation error for relay configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Relay address is empty.
    EmptyEmail,
    /// Administrator address is empty.
    EmptyAdminEmail,
    /// IMAP host is empty.
    EmptyImapHost,
    /// IMAP port is zero.
    InvalidImapPort,
    /// STARTTLS requested for IMAP.
    UnsupportedImapStartTls,
    /// IMAP folder is empty.
    EmptyMailbox,
    /// SMTP host is empty.
    EmptySmtpHost,
    /// SMTP port is zero.
    InvalidSmtpPort,
    /// Roster path is empty.
    EmptyRosterPath,
    /// Trigger token is empty.
    EmptyTriggerToken,
    /// Password variable name is empty.
    EmptyPasswordEnv,
    /// A poll, idle, retry or timeout interval is zero.
    ZeroInterval,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyEmail => "email is required",
            Self::EmptyAdminEmail => "admin_email is required",
            Self::EmptyImapHost => "imap.host is required",
            Self::InvalidImapPort => "imap.port must be 1-65535",
            Self::UnsupportedImapStartTls => "imap.security must be tls or none",
            Self::EmptyMailbox => "imap.mailbox is required",
            Self::EmptySmtpHost => "smtp.host is required",
            Self::InvalidSmtpPort => "smtp.port must be 1-65535",
            Self::EmptyRosterPath => "roster_path is required",
            Self::EmptyTriggerToken => "trigger_token is required",
            Self::EmptyPasswordEnv => "password_env is required",
            Self::ZeroInterval => "intervals and timeouts must be at least one second",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a configuration.
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Account credentials shared by both endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reads the password from the variable named by `password_env`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the variable is unset or empty.
    pub fn from_env(config: &RelayConfig) -> Result<Self> {
        match std::env::var(&config.password_env) {
            Ok(password) if !password.is_empty() => Ok(Self::new(config.username(), password)),
            _ => Err(Error::Config(format!(
                "environment variable {} is not set",
                config.password_env
            ))),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "email": "brev@x.org",
        "admin_email": "admin@x.org",
        "imap": { "host": "imap.x.org" },
        "smtp": { "host": "smtp.x.org" },
        "roster_path": "/srv/roster.csv"
    }"#;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.username(), "brev@x.org");
        assert_eq!(config.imap.security, Security::Tls);
        assert_eq!(config.imap.port(), 993);
        assert_eq!(config.imap.mailbox, "INBOX");
        assert_eq!(config.smtp.port(), 465);
        assert_eq!(config.smtp.helo_name, "localhost");
        assert_eq!(config.trigger_token, "samlingsbrev");
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.idle_interval(), Duration::from_secs(60));
        assert_eq!(config.retry_delay(), Duration::from_secs(60));
        assert_eq!(config.io_timeout(), Duration::from_secs(60));
        assert_eq!(config.password_env, "PASSWORD");
    }

    #[test]
    fn test_explicit_values() {
        let json = r#"{
            "email": "brev@x.org",
            "username": "brev",
            "admin_email": "admin@x.org",
            "imap": { "host": "127.0.0.1", "port": 1143, "security": "none", "mailbox": "Relay" },
            "smtp": { "host": "smtp.x.org", "security": "starttls", "helo_name": "relay.x.org" },
            "roster_path": "roster.csv",
            "trigger_token": "newsletter",
            "poll_interval_secs": 30,
            "password_env": "RELAY_PASSWORD"
        }"#;
        let config = RelayConfig::from_json(json).unwrap();
        assert_eq!(config.username(), "brev");
        assert_eq!(config.imap.port(), 1143);
        assert_eq!(config.imap.security, Security::None);
        assert_eq!(config.smtp.port(), 587);
        assert_eq!(config.smtp.security, Security::StartTls);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.password_env, "RELAY_PASSWORD");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = RelayConfig::from_json(MINIMAL).unwrap();
        config.admin_email = " ".to_string();
        config.imap.security = Security::StartTls;
        config.smtp.port = Some(0);
        config.retry_delay_secs = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::EmptyAdminEmail,
                ValidationError::UnsupportedImapStartTls,
                ValidationError::InvalidSmtpPort,
                ValidationError::ZeroInterval,
            ]
        );
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let json = MINIMAL.replace("imap.x.org", "");
        let err = RelayConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("imap.host")));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            RelayConfig::from_json("{ not json").unwrap_err(),
            Error::Serde(_)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.admin_email, "admin@x.org");

        let missing = RelayConfig::load(Path::new("/nonexistent/mailrelay.json"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("brev@x.org", "hunter2");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("brev@x.org"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_credentials_from_missing_env() {
        let mut config = RelayConfig::from_json(MINIMAL).unwrap();
        config.password_env = "MAILRELAY_TEST_SURELY_UNSET_VAR".to_string();
        assert!(matches!(
            Credentials::from_env(&config),
            Err(Error::Config(msg)) if msg.contains("MAILRELAY_TEST_SURELY_UNSET_VAR")
        ));
    }
}
