//! Configuration loading and validation tests
//!
//! Covers loading from disk, defaults, token resolution and the conversion
//! into session settings.

use brewlink::config::{ConfigError, LinkConfig};
use brewlink::session::SessionConfig;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[device]
name = "fermenter"

[broker]
host = "cloud.example.com"
port = 8080
token = "abcdef"
heartbeat_secs = 15
response_timeout_secs = 4
"#,
    );

    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.name, "fermenter");
    assert_eq!(config.broker.host, "cloud.example.com");
    assert_eq!(config.broker.port, 8080);
    assert_eq!(config.resolve_token().unwrap(), "abcdef");
    assert_eq!(config.heartbeat(), Duration::from_secs(15));
    assert_eq!(
        config.engine_settings().response_timeout,
        Duration::from_secs(4)
    );
}

#[test]
fn test_config_defaults_match_public_broker() {
    let temp_file = write_config("[broker]\ntoken = \"abc\"\n");
    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.host, "blynk-cloud.com");
    assert_eq!(config.broker.port, 8442);
    assert_eq!(config.heartbeat(), Duration::from_secs(10));
    assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    assert_eq!(config.engine_settings().max_messages_per_sec, 20);
}

#[test]
fn test_config_fails_on_missing_file() {
    let result = LinkConfig::load_from_file(std::path::Path::new("/nonexistent/brewlink.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_fails_on_invalid_toml() {
    let temp_file = write_config("[broker\nhost = ");
    let result = LinkConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_on_wrong_types() {
    let temp_file = write_config("[broker]\nport = \"eighty\"\n");
    let result = LinkConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_invalid_values() {
    let cases = [
        "[broker]\nport = 0\n",
        "[broker]\nhost = \"\"\n",
        "[broker]\nheartbeat_secs = 0\n",
        "[broker]\nresponse_timeout_secs = 0\n",
        "[broker]\nheartbeat_secs = 5\nresponse_timeout_secs = 8\n",
        "[broker]\nmax_messages_per_sec = 0\n",
        "[broker]\nconnect_timeout_secs = 0\n",
    ];

    for content in cases {
        let temp_file = write_config(content);
        let result = LinkConfig::load_from_file(temp_file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "Expected rejection for: {content}"
        );
    }
}

#[test]
fn test_token_from_environment() {
    let var = "BREWLINK_CONFIG_TEST_TOKEN";
    std::env::set_var(var, "from-env");

    let temp_file = write_config(&format!("[broker]\ntoken_env = \"{var}\"\n"));
    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.resolve_token().unwrap(), "from-env");

    let session = SessionConfig::from_link_config(&config).unwrap();
    assert_eq!(session.token, "from-env");

    std::env::remove_var(var);
}

#[test]
fn test_session_config_requires_token() {
    let temp_file = write_config("[device]\nname = \"fermenter\"\n");
    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

    let result = SessionConfig::from_link_config(&config);
    assert!(matches!(result, Err(ConfigError::MissingToken)));
}

#[test]
fn test_redacted_config_round_trips_without_token() {
    let temp_file = write_config("[broker]\ntoken = \"very-secret\"\n");
    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

    let shown = toml::to_string_pretty(&config.redacted()).unwrap();
    assert!(!shown.contains("very-secret"));

    let reparsed: LinkConfig = toml::from_str(&shown).unwrap();
    assert_eq!(reparsed.broker.port, config.broker.port);
}
