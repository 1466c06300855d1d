//! Configuration for the broker link
//!
//! Loaded from a TOML file. The auth token can be given inline or through an
//! environment variable; inline wins when both are present.

use crate::engine::EngineSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main link configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub broker: BrokerSection,
}

/// Device section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Source name stamped on every pin event this link emits
    #[serde(default = "default_device_name")]
    pub name: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: default_device_name(),
        }
    }
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Inline auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Environment variable containing the auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Liveness tick and heartbeat period in seconds (default: 10)
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Heartbeat/login ack timeout in seconds, shorter than the heartbeat (default: 5)
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_messages_per_sec")]
    pub max_messages_per_sec: u32,
    /// Ask the broker for every pin value right after login
    #[serde(default)]
    pub sync_on_connect: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: None,
            token_env: None,
            heartbeat_secs: default_heartbeat_secs(),
            response_timeout_secs: default_response_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_messages_per_sec: default_max_messages_per_sec(),
            sync_on_connect: false,
        }
    }
}

fn default_device_name() -> String {
    "blynk".to_string()
}

fn default_host() -> String {
    "blynk-cloud.com".to_string()
}

fn default_port() -> u16 {
    8442
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_response_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_messages_per_sec() -> u32 {
    20
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
    #[error("No broker token configured: set broker.token or broker.token_env")]
    MissingToken,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LinkConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges. The token is checked separately by
    /// [`LinkConfig::resolve_token`] since it may come from the environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let broker = &self.broker;
        if broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }
        if broker.heartbeat_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.heartbeat_secs must be greater than 0".to_string(),
            ));
        }
        if broker.response_timeout_secs == 0 || broker.response_timeout_secs >= broker.heartbeat_secs
        {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.response_timeout_secs ({}) must be between 1 and heartbeat_secs ({}) exclusive",
                broker.response_timeout_secs, broker.heartbeat_secs
            )));
        }
        if broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if broker.max_messages_per_sec == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.max_messages_per_sec must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the auth token: inline value first, then the named
    /// environment variable. Empty tokens are rejected.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        let token = match (&self.broker.token, &self.broker.token_env) {
            (Some(token), _) => token.clone(),
            (None, Some(env_name)) => std::env::var(env_name)
                .map_err(|_| ConfigError::EnvVarNotFound(env_name.clone()))?,
            (None, None) => return Err(ConfigError::MissingToken),
        };

        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(token)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.connect_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.broker.heartbeat_secs)
    }

    /// Engine tuning derived from the broker section
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            heartbeat: self.heartbeat(),
            response_timeout: Duration::from_secs(self.broker.response_timeout_secs),
            max_messages_per_sec: self.broker.max_messages_per_sec,
            sync_on_connect: self.broker.sync_on_connect,
            ..EngineSettings::default()
        }
    }

    /// Copy with the inline token masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.broker.token.is_some() {
            copy.broker.token = Some("***".to_string());
        }
        copy
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
name = "fermenter"

[broker]
host = "localhost"
port = 8442
token = "test-token"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[device]
name = "fermenter"

[broker]
host = "broker.local"
port = 9443
token_env = "BREWLINK_TEST_TOKEN"
heartbeat_secs = 30
response_timeout_secs = 10
connect_timeout_secs = 3
max_messages_per_sec = 5
sync_on_connect = true
"#;

        let config = LinkConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.device.name, "fermenter");
        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 9443);
        assert_eq!(config.broker.token_env.as_deref(), Some("BREWLINK_TEST_TOKEN"));
        assert_eq!(config.heartbeat(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));

        let settings = config.engine_settings();
        assert_eq!(settings.response_timeout, Duration::from_secs(10));
        assert_eq!(settings.max_messages_per_sec, 5);
        assert!(settings.sync_on_connect);
    }

    #[test]
    fn test_defaults() {
        let config = LinkConfig::from_toml_str("").unwrap();
        assert_eq!(config.device.name, "blynk");
        assert_eq!(config.broker.host, "blynk-cloud.com");
        assert_eq!(config.broker.port, 8442);
        assert_eq!(config.broker.heartbeat_secs, 10);
        assert_eq!(config.broker.response_timeout_secs, 5);
        assert_eq!(config.broker.max_messages_per_sec, 20);
        assert!(!config.broker.sync_on_connect);
    }

    #[test]
    fn test_response_timeout_must_be_shorter_than_heartbeat() {
        let result = LinkConfig::from_toml_str(
            r#"
[broker]
heartbeat_secs = 5
response_timeout_secs = 5
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_host_rejected() {
        let result = LinkConfig::from_toml_str("[broker]\nhost = \"  \"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_inline_token_wins() {
        let mut config = LinkConfig::test_config();
        config.broker.token_env = Some("BREWLINK_UNSET_TOKEN_VAR".to_string());
        assert_eq!(config.resolve_token().unwrap(), "test-token");
    }

    #[test]
    fn test_missing_token() {
        let mut config = LinkConfig::test_config();
        config.broker.token = None;
        assert!(matches!(
            config.resolve_token(),
            Err(ConfigError::MissingToken)
        ));

        config.broker.token = Some("   ".to_string());
        assert!(matches!(
            config.resolve_token(),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn test_missing_token_env_var() {
        let mut config = LinkConfig::test_config();
        config.broker.token = None;
        config.broker.token_env = Some("BREWLINK_DEFINITELY_UNSET_VAR".to_string());
        assert!(matches!(
            config.resolve_token(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_redacted_hides_token() {
        let config = LinkConfig::test_config().redacted();
        assert_eq!(config.broker.token.as_deref(), Some("***"));
        let shown = toml::to_string_pretty(&config).unwrap();
        assert!(!shown.contains("test-token"));
    }
}
