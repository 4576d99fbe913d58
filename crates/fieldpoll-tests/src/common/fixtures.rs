// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Device configurations pointed at the mock servers, plus configuration
//! file samples.

use std::time::Duration;

use fieldpoll_core::{
    DataType, DeviceConfig, MemoryLayout, ProtocolModel, RetryConfig, TransportAddress, Variable,
};

/// Poll interval used by fixture devices.
pub const FAST_POLL: Duration = Duration::from_millis(50);

/// Read deadline used by fixture devices.
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(300);

// =============================================================================
// Device Fixtures
// =============================================================================

/// Fixture providing device configurations.
pub struct DeviceFixtures;

impl DeviceFixtures {
    /// A Modbus TCP press on `127.0.0.1:port`.
    ///
    /// | Variable | Type | Address |
    /// |----------|------|---------|
    /// | `pressure` | float32, word swapped | `hr:0` |
    /// | `speed` | int16, scale 0.1 | `hr:2` |
    /// | `alarm` | bool | `hr:3.4` |
    /// | `running` | bool | `coil:5` |
    /// | `temperature` | uint16 | `ir:10` |
    pub fn modbus_press(port: u16) -> DeviceConfig {
        DeviceConfig::new("press-1", ProtocolModel::ModbusTcp, TransportAddress::tcp("127.0.0.1", port))
            .with_memory_layout(MemoryLayout::Cdab)
            .with_poll_interval(FAST_POLL)
            .with_timeout(SHORT_TIMEOUT)
            .with_variable(Variable::new("pressure", DataType::Float32, "hr:0"))
            .with_variable(Variable::new("speed", DataType::Int16, "hr:2").with_scale(0.1))
            .with_variable(Variable::new("alarm", DataType::Bool, "hr:3.4"))
            .with_variable(Variable::new("running", DataType::Bool, "coil:5"))
            .with_variable(Variable::new("temperature", DataType::UInt16, "ir:10"))
    }

    /// An S7 PLC on `127.0.0.1:port`.
    ///
    /// | Variable | Type | Address |
    /// |----------|------|---------|
    /// | `counter` | int32 | `DB1.DBD0` |
    /// | `level` | float32 | `DB1.DBD4` |
    /// | `valve` | bool | `DB1.DBX8.2` |
    /// | `recipe` | string(8) | `DB2.DBS0` |
    /// | `marker` | uint16 | `MW10` |
    pub fn s7_plc(port: u16) -> DeviceConfig {
        DeviceConfig::new("plc-2", ProtocolModel::S7, TransportAddress::tcp("127.0.0.1", port))
            .with_poll_interval(FAST_POLL)
            .with_timeout(SHORT_TIMEOUT)
            .with_variable(Variable::new("counter", DataType::Int32, "DB1.DBD0"))
            .with_variable(Variable::new("level", DataType::Float32, "DB1.DBD4"))
            .with_variable(Variable::new("valve", DataType::Bool, "DB1.DBX8.2"))
            .with_variable(Variable::new("recipe", DataType::String, "DB2.DBS0").with_length(8))
            .with_variable(Variable::new("marker", DataType::UInt16, "MW10"))
    }

    /// Disables retries so each failure shows up in the next cycle result.
    pub fn without_retry(mut device: DeviceConfig) -> DeviceConfig {
        device.retry = RetryConfig::no_retry();
        device
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Fixture providing configuration file contents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A YAML gateway file with one device of each register protocol.
    pub fn gateway_yaml(modbus_port: u16, s7_port: u16) -> String {
        format!(
            r#"
logging:
  level: debug
  format: compact
devices:
  - id: press-1
    model: modbus-tcp
    transport: {{ type: tcp, host: 127.0.0.1, port: {modbus_port} }}
    poll_interval: 50ms
    timeout: 300ms
    memory_layout: word_swap
    variables:
      - {{ name: pressure, data_type: float32, address: "hr:0" }}
      - {{ name: running, data_type: bool, address: "coil:5", default_value: false }}
  - id: plc-2
    model: s7
    transport: {{ type: tcp, host: 127.0.0.1, port: {s7_port} }}
    poll_interval: 50ms
    timeout: 300ms
    protocol: {{ rack: 0, slot: 1 }}
    variables:
      - {{ name: counter, data_type: int32, address: "DB1.DBD0" }}
"#
        )
    }

    /// A TOML gateway file for an OPC-UA server that is never contacted.
    pub fn opcua_toml() -> &'static str {
        r#"
[logging]
level = "warn"
format = "json"

[[devices]]
id = "ua-3"
model = "opcua"
timeout = "2s"

[devices.transport]
type = "url"
url = "opc.tcp://127.0.0.1:4840"

[devices.protocol]
max_nodes_per_read = 2

[[devices.variables]]
name = "temp"
data_type = "float64"
address = "ns=2;s=Line1.Temp"

[[devices.variables]]
name = "count"
data_type = "int32"
address = "ns=2;i=1002"

[[devices.variables]]
name = "state"
data_type = "string"
address = "ns=2;s=Line1.State"
"#
    }
}
