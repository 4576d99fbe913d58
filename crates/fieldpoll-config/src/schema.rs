// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway configuration schema.
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: json
//! devices:
//!   - id: press-1
//!     model: modbus-tcp
//!     transport: { type: tcp, host: 10.0.0.5, port: 502 }
//!     poll_interval: 500ms
//!     variables:
//!       - { name: pressure, data_type: float32, address: "hr:100" }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use fieldpoll_core::DeviceConfig;

use crate::error::{LoadError, LoadResult};

// =============================================================================
// GatewayConfig
// =============================================================================

/// Root of a gateway configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Polled devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl GatewayConfig {
    /// Checks device id uniqueness and validates every device.
    pub fn validate(&self) -> LoadResult<()> {
        let mut ids = HashSet::with_capacity(self.devices.len());
        for device in &self.devices {
            if !ids.insert(device.id.as_str()) {
                return Err(LoadError::DuplicateDeviceId {
                    device_id: device.id.to_string(),
                });
            }
            device.validate().map_err(|source| LoadError::Device {
                device_id: device.id.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Finds a device by id.
    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id.as_str() == id)
    }

    /// Total number of variables across devices.
    pub fn variable_count(&self) -> usize {
        self.devices.iter().map(|d| d.variables.len()).sum()
    }
}

// =============================================================================
// LoggingConfig
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, one event per line.
    #[default]
    Text,
    /// Newline-delimited JSON.
    Json,
    /// Abbreviated text.
    Compact,
}

impl LogFormat {
    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" | "full" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpoll_core::{DataType, ProtocolModel, TransportAddress, Variable};

    fn device(id: &str) -> DeviceConfig {
        DeviceConfig::new(id, ProtocolModel::ModbusTcp, TransportAddress::tcp("127.0.0.1", 502))
            .with_variable(Variable::new("v", DataType::UInt16, "hr:0"))
    }

    #[test]
    fn test_duplicate_device_ids() {
        let config = GatewayConfig {
            devices: vec![device("a"), device("b"), device("a")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LoadError::DuplicateDeviceId { device_id }) if device_id == "a"
        ));
    }

    #[test]
    fn test_device_validation_is_wrapped() {
        let mut bad = device("a");
        bad.max_sessions = 0;
        let config = GatewayConfig {
            devices: vec![bad],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LoadError::Device { .. })));
    }

    #[test]
    fn test_lookup_and_counts() {
        let config = GatewayConfig {
            devices: vec![device("a"), device("b").with_variable(Variable::new("w", DataType::Int16, "hr:1"))],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.device("b").map(|d| d.variables.len()), Some(2));
        assert_eq!(config.variable_count(), 3);
    }

    #[test]
    fn test_log_settings_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LoggingConfig::default().format, LogFormat::Text);
    }
}
