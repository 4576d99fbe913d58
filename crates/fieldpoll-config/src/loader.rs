// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file; the extension picks the format
//! 2. Substitute `${VAR}` / `${VAR:default}` placeholders
//! 3. Deserialize into [`GatewayConfig`]
//! 4. Apply environment overrides
//! 5. Validate
//!
//! # Environment Overrides
//!
//! ```text
//! FIELDPOLL_LOG_LEVEL=debug
//! FIELDPOLL_LOG_FORMAT=json
//! ```

use std::env;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{LoadError, LoadResult};
use crate::schema::GatewayConfig;

/// Default prefix of override variables.
pub const DEFAULT_ENV_PREFIX: &str = "FIELDPOLL";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads gateway configuration files.
///
/// # Examples
///
/// ```no_run
/// use fieldpoll_config::ConfigLoader;
///
/// let config = ConfigLoader::new().load("gateway.yaml").unwrap();
/// println!("{} devices", config.devices.len());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the default prefix and placeholder substitution on.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the override variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholder substitution and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads and validates a configuration file.
    pub fn load(&self, path: impl AsRef<Path>) -> LoadResult<GatewayConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(LoadError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        let format = ConfigFormat::from_path(path)?;

        let config = self.load_from_str(&content, format).map_err(|e| match e {
            LoadError::Serialization { message } => LoadError::parse(path, message),
            other => other,
        })?;

        debug!(
            devices = config.devices.len(),
            variables = config.variable_count(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads and validates configuration content.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> LoadResult<GatewayConfig> {
        let mut config = if self.resolve_env_vars {
            parse_str(&resolve_env_placeholders(content), format)?
        } else {
            parse_str(content, format)?
        };

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut GatewayConfig) -> LoadResult<()> {
        let name = format!("{}_LOG_LEVEL", self.env_prefix);
        if let Ok(value) = env::var(&name) {
            config.logging.level = value
                .parse()
                .map_err(|message: String| LoadError::invalid_env_var(&name, message))?;
        }

        let name = format!("{}_LOG_FORMAT", self.env_prefix);
        if let Ok(value) = env::var(&name) {
            config.logging.format = value
                .parse()
                .map_err(|message: String| LoadError::invalid_env_var(&name, message))?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_str(content: &str, format: ConfigFormat) -> LoadResult<GatewayConfig> {
    match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| LoadError::serialization(e.to_string()))
        }
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| LoadError::serialization(e.to_string())),
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| LoadError::serialization(e.to_string()))
        }
    }
}

/// Substitutes `${VAR}` and `${VAR:default}` placeholders.
///
/// An unset variable without a default is left in place.
pub fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();

        let mut inner = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            inner.push(c);
        }

        if !closed {
            result.push_str("${");
            result.push_str(&inner);
            continue;
        }

        let (name, default) = match inner.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (inner.as_str(), None),
        };

        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!(variable = name, "Environment variable not set");
                result.push_str(&format!("${{{}}}", name));
            }
        }
    }

    result
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
    pub fn from_path(path: &Path) -> LoadResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(LoadError::UnsupportedFormat(other.to_string())),
            None => Err(LoadError::UnsupportedFormat("(no extension)".to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogFormat, LogLevel};
    use fieldpoll_core::{MemoryLayout, ProtocolModel, TransportAddress};
    use std::io::Write;
    use std::time::Duration;

    const YAML: &str = r#"
logging:
  level: debug
devices:
  - id: press-1
    model: modbus-tcp
    transport: { type: tcp, host: "${FIELDPOLL_TEST_HOST:10.0.0.5}", port: 502 }
    poll_interval: 250ms
    memory_layout: word_swap
    protocol: { unit_id: 3 }
    variables:
      - { name: pressure, data_type: float32, address: "hr:100", scale: 0.1 }
      - { name: running, data_type: bool, address: "coil:0", default_value: false }
"#;

    fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = write_file(".yaml", YAML);
        let config = ConfigLoader::new().with_env_prefix("FIELDPOLL_T1").load(file.path()).unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        let device = &config.devices[0];
        assert_eq!(device.model, ProtocolModel::ModbusTcp);
        assert_eq!(device.transport, TransportAddress::tcp("10.0.0.5", 502));
        assert_eq!(device.poll_interval, Duration::from_millis(250));
        assert_eq!(device.memory_layout, MemoryLayout::Cdab);
        assert_eq!(device.protocol.unit_id, 3);
        assert_eq!(device.variables.len(), 2);
        assert_eq!(device.variables[0].scale, Some(0.1));
    }

    #[test]
    fn test_load_toml() {
        let content = r#"
[[devices]]
id = "plc"
model = "s7"
timeout = "2s"

[devices.transport]
type = "tcp"
host = "192.168.0.10"
port = 102

[devices.protocol]
rack = 0
slot = 2

[[devices.variables]]
name = "speed"
data_type = "int16"
address = "DB1.DBW0"
"#;
        let file = write_file(".toml", content);
        let config = ConfigLoader::new().with_env_prefix("FIELDPOLL_T2").load(file.path()).unwrap();
        let device = &config.devices[0];
        assert_eq!(device.model, ProtocolModel::S7);
        assert_eq!(device.timeout, Duration::from_secs(2));
        assert_eq!(device.protocol.slot, 2);
    }

    #[test]
    fn test_load_json_serial() {
        let content = r#"{
  "devices": [{
    "id": "meter",
    "model": "modbus-rtu",
    "transport": { "type": "serial", "path": "/dev/ttyUSB0", "baud_rate": 19200, "parity": "even" },
    "variables": [{ "name": "v", "data_type": "uint16", "address": "ir:0" }]
  }]
}"#;
        let file = write_file(".json", content);
        let config = ConfigLoader::new().with_env_prefix("FIELDPOLL_T3").load(file.path()).unwrap();
        match &config.devices[0].transport {
            TransportAddress::Serial(settings) => {
                assert_eq!(settings.baud_rate, 19200);
                assert_eq!(settings.parity, fieldpoll_core::Parity::Even);
            }
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_unknown_model_fails_parse() {
        let file = write_file(".yaml", &YAML.replace("modbus-tcp", "bacnet"));
        assert!(matches!(
            ConfigLoader::new().load(file.path()),
            Err(LoadError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_and_unsupported() {
        assert!(matches!(
            ConfigLoader::new().load("/nonexistent/gateway.yaml"),
            Err(LoadError::FileNotFound { .. })
        ));
        let file = write_file(".ini", "x=1");
        assert!(matches!(
            ConfigLoader::new().load(file.path()),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_placeholders() {
        env::set_var("FIELDPOLL_TEST_PLACEHOLDER", "plc.local");
        assert_eq!(
            resolve_env_placeholders("host: ${FIELDPOLL_TEST_PLACEHOLDER}"),
            "host: plc.local"
        );
        assert_eq!(
            resolve_env_placeholders("port: ${FIELDPOLL_TEST_UNSET_PORT:502}"),
            "port: 502"
        );
        assert_eq!(
            resolve_env_placeholders("x: ${FIELDPOLL_TEST_UNSET_X}"),
            "x: ${FIELDPOLL_TEST_UNSET_X}"
        );
        assert_eq!(resolve_env_placeholders("cost: $5 ${open"), "cost: $5 ${open");
    }

    #[test]
    fn test_log_overrides() {
        env::set_var("FIELDPOLL_T4_LOG_LEVEL", "warn");
        env::set_var("FIELDPOLL_T4_LOG_FORMAT", "json");
        let config = ConfigLoader::new()
            .with_env_prefix("FIELDPOLL_T4")
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Json);

        env::set_var("FIELDPOLL_T5_LOG_FORMAT", "xml");
        assert!(matches!(
            ConfigLoader::new()
                .with_env_prefix("FIELDPOLL_T5")
                .load_from_str(YAML, ConfigFormat::Yaml),
            Err(LoadError::InvalidEnvVar { .. })
        ));
    }

    #[test]
    fn test_duplicate_variables_rejected() {
        let content = YAML.replace("name: running", "name: pressure");
        assert!(matches!(
            ConfigLoader::new().load_from_str(&content, ConfigFormat::Yaml),
            Err(LoadError::Device { .. })
        ));
    }
}
