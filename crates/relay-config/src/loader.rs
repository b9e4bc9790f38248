// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders
//! 3. Parse into [`RelayConfig`]
//! 4. Apply `RELAY_*` environment overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! RELAY_SERVER_HOST=10.0.0.5
//! RELAY_SERVER_PORT=4840
//! RELAY_AUTO_CONNECT=true
//! RELAY_LOG_LEVEL=debug
//! RELAY_LOG_FORMAT=json
//! RELAY_BROADCAST_CAPACITY=4096
//! RELAY_SINK_TIMEOUT=2s
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{LogFormat, LogLevel, RelayConfig};
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "RELAY";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader for the relay.
///
/// # Examples
///
/// ```no_run
/// use relay_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("relay.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve placeholders and apply overrides.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file.
    ///
    /// The file format is determined by the file extension:
    /// - `.yaml` or `.yml` - YAML format
    /// - `.toml` - TOML format
    /// - `.json` - JSON format
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<RelayConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let format = ConfigFormat::from_path(path)?;
        let content = self.read_file(path)?;

        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(&content)
        } else {
            content
        };

        let config = self
            .parse_str::<RelayConfig>(&content, format)
            .map_err(|e| match e {
                ConfigError::Serialization { message } => ConfigError::parse(path, message),
                other => other,
            })?;

        let config = self.finish(config)?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<RelayConfig> {
        let config = if self.resolve_env_vars {
            self.parse_str(&self.resolve_env_placeholders(content), format)?
        } else {
            self.parse_str(content, format)?
        };
        self.finish(config)
    }

    fn finish(&self, mut config: RelayConfig) -> ConfigResult<RelayConfig> {
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;

        debug!(
            relay = %config.relay.name,
            monitored = config.monitor.len(),
            simulated = config.simulation.nodes.len(),
            "Configuration validated"
        );
        Ok(config)
    }

    /// Reads file content.
    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    /// Parses a string based on format.
    fn parse_str<T: DeserializeOwned>(&self, content: &str, format: ConfigFormat) -> ConfigResult<T> {
        match format {
            ConfigFormat::Yaml => parse_yaml(content),
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
            }
        }
    }

    /// Resolves environment variable placeholders in content.
    ///
    /// Supports `${VAR_NAME}` and `${VAR_NAME:default}`. Unset variables
    /// without a default are left in place.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' || chars.peek() != Some(&'{') {
                result.push(c);
                continue;
            }
            chars.next();

            let mut var_content = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                var_content.push(c);
            }

            if !found_close {
                result.push_str("${");
                result.push_str(&var_content);
                continue;
            }

            let (var_name, default_value) = match var_content.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (var_content.as_str(), None),
            };

            match (env::var(var_name), default_value) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    warn!("Environment variable '{}' not found", var_name);
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        }

        result
    }

    fn env_var(&self, suffix: &str) -> Option<(String, String)> {
        let name = format!("{}_{}", self.env_prefix, suffix);
        env::var(&name).ok().map(|value| (name, value))
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&self, config: &mut RelayConfig) -> ConfigResult<()> {
        if let Some((_, value)) = self.env_var("SERVER_HOST") {
            config.server.host = Some(value);
        }
        if let Some((name, value)) = self.env_var("SERVER_PORT") {
            config.server.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(name, "expected valid port number"))?;
        }
        if let Some((_, value)) = self.env_var("AUTO_CONNECT") {
            config.server.auto_connect = parse_bool(&value);
        }

        if let Some((name, value)) = self.env_var("LOG_LEVEL") {
            config.logging.level = LogLevel::parse(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected a log level"))?;
        }
        if let Some((name, value)) = self.env_var("LOG_FORMAT") {
            config.logging.format = LogFormat::parse(&value).ok_or_else(|| {
                ConfigError::invalid_env_var(name, "expected text, compact or json")
            })?;
        }

        if let Some((name, value)) = self.env_var("BROADCAST_CAPACITY") {
            config.broadcast.capacity = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(name, "expected valid number"))?;
        }
        if let Some((name, value)) = self.env_var("SINK_TIMEOUT") {
            config.fanout.sink_timeout = humantime::parse_duration(value.trim())
                .map_err(|e| ConfigError::invalid_env_var(name, e.to_string()))?;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parses a string to bool.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

/// YAML parsing through the config crate.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
///
/// ```no_run
/// use relay_config::loader::load_config;
///
/// let config = load_config("relay.yaml").unwrap();
/// ```
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<RelayConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<RelayConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use relay_opcua::NodeId;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const TEST_YAML: &str = r#"
relay:
  name: line-1

server:
  host: 10.0.0.5
  port: 4840
  auto_connect: true

client:
  request_timeout: 3s
  strategy:
    max_retry: 0
    initial_delay: 100ms
    max_delay: 200ms

fanout:
  sink_timeout: 2s

broadcast:
  capacity: 256

monitor:
  - node_id: "ns=2;i=5"
    slot: 0
  - node_id: "ns=2;i=6"

logging:
  level: debug
  format: json
"#;

    const TEST_TOML: &str = r#"
[server]
host = "10.0.0.5"

[[monitor]]
node_id = "ns=2;i=5"
slot = 0

[simulation]
tick_interval = "250ms"
nodes = [{ node_id = "ns=2;i=5", name = "Temperature1", initial = 21.0 }]
"#;

    fn isolated() -> ConfigLoader {
        ConfigLoader::new().with_env_prefix("RELAY_LOADER_TEST_UNUSED")
    }

    fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = write_temp(TEST_YAML, ".yaml");
        let config = isolated().load(file.path()).unwrap();

        assert_eq!(config.relay.name, "line-1");
        assert_eq!(config.server.host.as_deref(), Some("10.0.0.5"));
        assert!(config.server.auto_connect);
        assert_eq!(config.client.request_timeout, Duration::from_secs(3));
        assert_eq!(config.client.strategy.max_retry, 0);
        assert_eq!(config.fanout.sink_timeout, Duration::from_secs(2));
        assert_eq!(config.broadcast.capacity, 256);
        assert_eq!(config.monitor.len(), 2);
        assert_eq!(config.monitor[0].slot, Some(0));
        assert_eq!(config.monitor[1].slot, None);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_toml() {
        let file = write_temp(TEST_TOML, ".toml");
        let config = isolated().load(file.path()).unwrap();

        assert_eq!(config.server.port, 4840);
        assert_eq!(config.simulation.tick_interval, Duration::from_millis(250));
        assert_eq!(config.simulation.nodes.len(), 1);
        assert_eq!(
            config.monitor[0].validate(0).unwrap(),
            NodeId::numeric(2, 5)
        );
    }

    #[test]
    fn test_load_json() {
        let json = r#"{"server": {"host": "plc.local", "port": 4841}, "persistence": {"max_records": 50}}"#;
        let file = write_temp(json, ".json");
        let config = isolated().load(file.path()).unwrap();

        assert_eq!(config.server.port, 4841);
        assert_eq!(config.persistence.max_records, 50);
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let file = write_temp("server:\n  hots: 10.0.0.5\n", ".yaml");
        let result = isolated().load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_slot_is_validation_error() {
        let yaml = "monitor:\n  - node_id: \"ns=2;i=5\"\n    slot: 9\n";
        let result = isolated().load_from_str(yaml, ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("relay.yaml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("relay.yml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("relay.toml")).unwrap(),
            ConfigFormat::Toml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("relay.json")).unwrap(),
            ConfigFormat::Json
        );
        assert!(ConfigFormat::from_path(Path::new("relay.txt")).is_err());
        assert!(ConfigFormat::from_path(Path::new("relay")).is_err());
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let loader = ConfigLoader::new();
        let result =
            loader.resolve_env_placeholders("host: ${RELAY_LOADER_TEST_NONEXISTENT:10.0.0.9}");
        assert_eq!(result, "host: 10.0.0.9");
    }

    #[test]
    fn test_env_placeholder_without_default_is_kept() {
        let loader = ConfigLoader::new();
        let result = loader.resolve_env_placeholders("host: ${RELAY_LOADER_TEST_NONEXISTENT}");
        assert_eq!(result, "host: ${RELAY_LOADER_TEST_NONEXISTENT}");

        let result = loader.resolve_env_placeholders("broken: ${UNCLOSED");
        assert_eq!(result, "broken: ${UNCLOSED");
    }

    #[test]
    fn test_env_placeholder_resolution() {
        env::set_var("RELAY_LOADER_TEST_HOST", "192.168.1.20");
        let yaml = "server:\n  host: ${RELAY_LOADER_TEST_HOST}\n";
        let config = isolated().load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.server.host.as_deref(), Some("192.168.1.20"));
    }

    #[test]
    fn test_env_overrides() {
        let prefix = "RELAY_LOADER_TEST_OVERRIDE";
        env::set_var(format!("{prefix}_SERVER_HOST"), "10.1.1.1");
        env::set_var(format!("{prefix}_SERVER_PORT"), "4850");
        env::set_var(format!("{prefix}_AUTO_CONNECT"), "yes");
        env::set_var(format!("{prefix}_LOG_LEVEL"), "warn");
        env::set_var(format!("{prefix}_LOG_FORMAT"), "compact");
        env::set_var(format!("{prefix}_BROADCAST_CAPACITY"), "99");
        env::set_var(format!("{prefix}_SINK_TIMEOUT"), "750ms");

        let config = ConfigLoader::new()
            .with_env_prefix(prefix)
            .load_from_str("{}", ConfigFormat::Json)
            .unwrap();

        assert_eq!(config.server.host.as_deref(), Some("10.1.1.1"));
        assert_eq!(config.server.port, 4850);
        assert!(config.server.auto_connect);
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.broadcast.capacity, 99);
        assert_eq!(config.fanout.sink_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_invalid_env_override() {
        let prefix = "RELAY_LOADER_TEST_BAD_PORT";
        env::set_var(format!("{prefix}_SERVER_PORT"), "not-a-port");

        let result = ConfigLoader::new()
            .with_env_prefix(prefix)
            .load_from_str("{}", ConfigFormat::Json);
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_env_vars_disabled() {
        let prefix = "RELAY_LOADER_TEST_DISABLED";
        env::set_var(format!("{prefix}_SERVER_PORT"), "1");

        let config = ConfigLoader::new()
            .with_env_prefix(prefix)
            .with_env_vars(false)
            .load_from_str("{}", ConfigFormat::Json)
            .unwrap();
        assert_eq!(config.server.port, 4840);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn test_file_not_found() {
        let result = isolated().load("/nonexistent/path/relay.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }
}
