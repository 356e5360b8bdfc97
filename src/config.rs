//! Broker endpoint and naming configuration
//!
//! Configuration is read once at startup from a TOML file and then shared
//! read-only (usually behind an `Arc`) by every component of the crate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    #[serde(default)]
    pub amqp: AmqpSection,
    #[serde(default)]
    pub management: ManagementSection,
    #[serde(default)]
    pub queues: QueueSection,
}

/// AMQP endpoint section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmqpSection {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_amqp_port")]
    pub port: u16,
    /// Virtual host; `/` is the broker default
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_credential")]
    pub username: String,
    #[serde(default = "default_credential")]
    pub password: String,
    /// Environment variable overriding `password` at load time
    pub password_env: Option<String>,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub tls: TlsSection,
    /// Upper bound for one short-lived broker operation
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

/// TLS material for the AMQP connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    /// PEM files with additional trusted CA certificates
    #[serde(default)]
    pub ca: Vec<PathBuf>,
    /// PEM client certificate (requires `key`)
    pub cert: Option<PathBuf>,
    /// PEM PKCS#8 private key for `cert`
    pub key: Option<PathBuf>,
    /// PKCS#12 client bundle, alternative to `cert`/`key`
    pub pfx: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// When false, the broker certificate is NOT verified
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,
}

/// Management HTTP API section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagementSection {
    /// Defaults to `amqp.hostname` when unset
    pub hostname: Option<String>,
    #[serde(default = "default_management_port")]
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,
    #[serde(default = "default_management_timeout")]
    pub timeout_secs: u64,
}

/// Queue naming and declaration section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    /// Process-wide namespace prepended to every exchange, queue and routing key
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub queue_type: QueueType,
}

/// Broker-side queue type attached as `x-queue-type`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    #[default]
    Classic,
    Quorum,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Classic => "classic",
            QueueType::Quorum => "quorum",
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_amqp_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_credential() -> String {
    "guest".to_string()
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_management_port() -> u16 {
    15672
}

fn default_management_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for AmqpSection {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_amqp_port(),
            vhost: default_vhost(),
            username: default_credential(),
            password: default_credential(),
            password_env: None,
            use_ssl: false,
            tls: TlsSection::default(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            ca: Vec::new(),
            cert: None,
            key: None,
            pfx: None,
            passphrase: None,
            reject_unauthorized: true,
        }
    }
}

impl Default for ManagementSection {
    fn default() -> Self {
        Self {
            hostname: None,
            port: default_management_port(),
            use_ssl: false,
            reject_unauthorized: true,
            timeout_secs: default_management_timeout(),
        }
    }
}

impl AmqpSection {
    /// Path segment for the vhost: empty for the default vhost, `/<vhost>` otherwise
    pub fn vhost_path(&self) -> String {
        if self.vhost == "/" {
            String::new()
        } else {
            format!("/{}", self.vhost)
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid queue prefix: {0}")]
    InvalidPrefix(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BrokerConfig {
    /// Load configuration from TOML file with environment variable resolution
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, resolve and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: BrokerConfig = toml::from_str(content)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(password_env) = &self.amqp.password_env {
            self.amqp.password = std::env::var(password_env)
                .map_err(|_| ConfigError::EnvVarNotFound(password_env.clone()))?;
        }
        Ok(())
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.amqp.hostname.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "amqp.hostname must not be empty".to_string(),
            ));
        }
        if self.amqp.port == 0 || self.management.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "ports must be non-zero".to_string(),
            ));
        }
        if self.amqp.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "amqp.operation_timeout_secs must be at least 1".to_string(),
            ));
        }
        validate_prefix(&self.queues.prefix)?;

        let tls = &self.amqp.tls;
        if tls.pfx.is_some() && (tls.cert.is_some() || tls.key.is_some()) {
            return Err(ConfigError::InvalidConfig(
                "amqp.tls.pfx cannot be combined with amqp.tls.cert/key".to_string(),
            ));
        }
        if tls.cert.is_some() != tls.key.is_some() {
            return Err(ConfigError::InvalidConfig(
                "amqp.tls.cert and amqp.tls.key must be set together".to_string(),
            ));
        }

        Ok(())
    }

    /// Management API host, falling back to the AMQP host
    pub fn management_hostname(&self) -> &str {
        self.management
            .hostname
            .as_deref()
            .unwrap_or(&self.amqp.hostname)
    }

    /// Copy suitable for display, with secrets masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.amqp.password = "***".to_string();
        if config.amqp.tls.passphrase.is_some() {
            config.amqp.tls.passphrase = Some("***".to_string());
        }
        config
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[amqp]
hostname = "localhost"
port = 5672

[queues]
prefix = "test_"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidPrefix(format!(
            "'{prefix}' must not contain whitespace"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[amqp]
hostname = "rabbit.internal"
port = 5671
vhost = "octi"
username = "svc"
password = "hunter2"
use_ssl = true
operation_timeout_secs = 5

[amqp.tls]
ca = ["/etc/ssl/broker-ca.pem"]
pfx = "/etc/ssl/client.p12"
passphrase = "changeit"
reject_unauthorized = false

[management]
hostname = "rabbit-admin.internal"
port = 15671
use_ssl = true

[queues]
prefix = "prod_"
queue_type = "quorum"
"#;

        let config = BrokerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.amqp.hostname, "rabbit.internal");
        assert_eq!(config.amqp.port, 5671);
        assert_eq!(config.amqp.vhost_path(), "/octi");
        assert!(config.amqp.use_ssl);
        assert!(!config.amqp.tls.reject_unauthorized);
        assert_eq!(config.amqp.tls.ca.len(), 1);
        assert_eq!(config.amqp.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.management_hostname(), "rabbit-admin.internal");
        assert!(config.management.reject_unauthorized);
        assert_eq!(config.queues.prefix, "prod_");
        assert_eq!(config.queues.queue_type, QueueType::Quorum);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = BrokerConfig::from_toml_str("").unwrap();
        assert_eq!(config, BrokerConfig::default());
        assert_eq!(config.amqp.hostname, "localhost");
        assert_eq!(config.amqp.port, 5672);
        assert_eq!(config.amqp.vhost, "/");
        assert_eq!(config.amqp.vhost_path(), "");
        assert_eq!(config.amqp.username, "guest");
        assert_eq!(config.management.port, 15672);
        assert_eq!(config.management_hostname(), "localhost");
        assert_eq!(config.queues.queue_type.as_str(), "classic");
        assert!(config.amqp.tls.reject_unauthorized);
    }

    #[test]
    fn test_password_env_resolution() {
        std::env::set_var("CONNECTOR_AMQP_TEST_PASSWORD", "from-env");
        let toml_content = r#"
[amqp]
password = "inline"
password_env = "CONNECTOR_AMQP_TEST_PASSWORD"
"#;
        let config = BrokerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.amqp.password, "from-env");
    }

    #[test]
    fn test_missing_password_env() {
        let toml_content = r#"
[amqp]
password_env = "CONNECTOR_AMQP_TEST_UNSET_VARIABLE"
"#;
        let result = BrokerConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
    }

    #[test]
    fn test_pfx_and_pem_identity_conflict() {
        let toml_content = r#"
[amqp.tls]
pfx = "/client.p12"
cert = "/client.pem"
key = "/client.key"
"#;
        let result = BrokerConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_cert_without_key() {
        let toml_content = r#"
[amqp.tls]
cert = "/client.pem"
"#;
        let result = BrokerConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_prefix_with_whitespace_rejected() {
        let toml_content = r#"
[queues]
prefix = "bad prefix"
"#;
        let result = BrokerConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidPrefix(_))));
    }

    #[test]
    fn test_unknown_queue_type_rejected() {
        let toml_content = r#"
[queues]
queue_type = "stream"
"#;
        let result = BrokerConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_zero_port_rejected() {
        let toml_content = r#"
[amqp]
port = 0
"#;
        let result = BrokerConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = BrokerConfig::test_config();
        config.amqp.password = "s3cret".to_string();
        config.amqp.tls.passphrase = Some("pfx-pass".to_string());

        let redacted = config.redacted();
        assert_eq!(redacted.amqp.password, "***");
        assert_eq!(redacted.amqp.tls.passphrase.as_deref(), Some("***"));
        assert_eq!(redacted.amqp.hostname, config.amqp.hostname);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.toml");
        std::fs::write(&path, "[queues]\nprefix = \"file_\"\n").unwrap();

        let config = BrokerConfig::load_from_file(&path).unwrap();
        assert_eq!(config.queues.prefix, "file_");
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = BrokerConfig::load_from_file(Path::new("/nonexistent/broker.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }
}
