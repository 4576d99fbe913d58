// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value model and device configuration.
//!
//! This module holds the protocol-agnostic types the rest of the engine is
//! built on: variable definitions, decoded values, memory layouts and the
//! device configuration snapshot handed to an engine at construction.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryConfig;

// =============================================================================
// Identifiers
// =============================================================================

/// A unique identifier for a device.
///
/// Device IDs should be stable across restarts and unique within a gateway instance.
///
/// # Examples
///
/// ```
/// use fieldpoll_core::types::DeviceId;
///
/// let id = DeviceId::new("plc-001");
/// assert_eq!(id.as_str(), "plc-001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a new device ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// DataType
// =============================================================================

/// Declared type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Single bit.
    Bool,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 16-bit integer.
    #[serde(rename = "uint16")]
    UInt16,
    /// IEEE 754 single precision.
    Float32,
    /// IEEE 754 double precision.
    Float64,
    /// Fixed-length byte string.
    String,
    /// Generic numeric: one unsigned 16-bit word on register protocols,
    /// any numeric node on OPC-UA. Always reported as `float64`.
    Number,
}

impl DataType {
    /// Returns the wire size in bytes, or `None` for strings whose size
    /// comes from the variable's `length`.
    ///
    /// `Bool` reports one byte; protocols that back booleans with a whole
    /// word widen it themselves.
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::Int16 | Self::UInt16 | Self::Number => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::String => None,
        }
    }

    /// Returns true for types that accept a scale factor.
    pub const fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool | Self::String)
    }

    /// Returns the canonical lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt16 => "uint16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Number => "number",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bool" | "boolean" | "bit" => Ok(Self::Bool),
            "int16" | "i16" | "short" => Ok(Self::Int16),
            "int32" | "i32" | "dint" => Ok(Self::Int32),
            "int64" | "i64" | "lint" => Ok(Self::Int64),
            "uint16" | "u16" | "word" => Ok(Self::UInt16),
            "float32" | "f32" | "float" | "real" => Ok(Self::Float32),
            "float64" | "f64" | "double" | "lreal" => Ok(Self::Float64),
            "string" | "str" => Ok(Self::String),
            "number" => Ok(Self::Number),
            _ => Err(ConfigError::invalid_value(
                "data_type",
                format!("unknown data type '{}'", s),
            )),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A decoded, typed value.
///
/// Serializes as the bare JSON value so result batches read naturally.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Single precision float.
    Float32(f32),
    /// Double precision float.
    Float64(f64),
    /// String value.
    String(String),
}

impl Value {
    /// Returns the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::UInt16(_) => "uint16",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::String(_) => "string",
        }
    }

    /// Returns the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `f64` if numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int16(v) => Some(*v as f64),
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt16(v) => Some(*v as f64),
            Self::Float32(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            Self::Bool(_) | Self::String(_) => None,
        }
    }

    /// Returns the value as `i64` if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(*v as i64),
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            Self::UInt16(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Converts to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int16(v) => serde_json::Value::from(*v),
            Self::Int32(v) => serde_json::Value::from(*v),
            Self::Int64(v) => serde_json::Value::from(*v),
            Self::UInt16(v) => serde_json::Value::from(*v),
            Self::Float32(v) => serde_json::Value::from(*v as f64),
            Self::Float64(v) => serde_json::Value::from(*v),
            Self::String(v) => serde_json::Value::String(v.clone()),
        }
    }

    /// Converts a dynamic JSON value into `target`.
    ///
    /// Conversion is explicit per target type: integers must be integral and
    /// in range, floats accept any finite number, booleans accept `0`/`1`
    /// and the usual words, strings only accept strings.
    pub fn from_json(target: DataType, raw: &serde_json::Value) -> Result<Self, String> {
        use serde_json::Value as J;

        match target {
            DataType::Bool => match raw {
                J::Bool(b) => Ok(Self::Bool(*b)),
                J::Number(n) => match n.as_u64() {
                    Some(0) => Ok(Self::Bool(false)),
                    Some(1) => Ok(Self::Bool(true)),
                    _ => Err("expected 0 or 1".to_string()),
                },
                J::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "on" | "1" => Ok(Self::Bool(true)),
                    "false" | "off" | "0" => Ok(Self::Bool(false)),
                    _ => Err("expected true/false".to_string()),
                },
                _ => Err(format!("expected bool, got {}", json_kind(raw))),
            },
            DataType::Int16 => integral(raw).and_then(|v| {
                i16::try_from(v)
                    .map(Self::Int16)
                    .map_err(|_| "out of range for int16".to_string())
            }),
            DataType::Int32 => integral(raw).and_then(|v| {
                i32::try_from(v)
                    .map(Self::Int32)
                    .map_err(|_| "out of range for int32".to_string())
            }),
            DataType::Int64 => integral(raw).and_then(|v| {
                i64::try_from(v)
                    .map(Self::Int64)
                    .map_err(|_| "out of range for int64".to_string())
            }),
            DataType::UInt16 => integral(raw).and_then(|v| {
                u16::try_from(v)
                    .map(Self::UInt16)
                    .map_err(|_| "out of range for uint16".to_string())
            }),
            DataType::Float32 => floating(raw).and_then(|v| {
                if v.abs() > f32::MAX as f64 {
                    Err("out of range for float32".to_string())
                } else {
                    Ok(Self::Float32(v as f32))
                }
            }),
            DataType::Float64 | DataType::Number => floating(raw).map(Self::Float64),
            DataType::String => match raw {
                J::String(s) => Ok(Self::String(s.clone())),
                _ => Err(format!("expected string, got {}", json_kind(raw))),
            },
        }
    }
}

fn json_kind(raw: &serde_json::Value) -> &'static str {
    match raw {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn integral(raw: &serde_json::Value) -> Result<i128, String> {
    match raw {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(v as i128)
            } else if let Some(v) = n.as_u64() {
                Ok(v as i128)
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i128),
                    _ => Err("expected an integer".to_string()),
                }
            }
        }
        serde_json::Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("expected integer, got {}", json_kind(other))),
    }
}

fn floating(raw: &serde_json::Value) -> Result<f64, String> {
    let value = match raw {
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| "expected a number".to_string())?,
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s))?,
        other => return Err(format!("expected number, got {}", json_kind(other))),
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err("number is not finite".to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Float32(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "\"{}\"", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::UInt16(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

// =============================================================================
// Variable
// =============================================================================

/// One polled point of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Name, unique within the device.
    pub name: String,

    /// Declared type.
    pub data_type: DataType,

    /// Protocol-specific address (register offset, node id, `DB1.DBX0.1`, ...).
    pub address: String,

    /// Multiplier applied on read and divided out on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    /// Byte length of `string` variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,

    /// Value reported before the first successful decode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,

    /// Last decoded value.
    #[serde(skip)]
    pub value: Option<Value>,
}

impl Variable {
    /// Creates a variable without scale or default.
    pub fn new(name: impl Into<String>, data_type: DataType, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            address: address.into(),
            scale: None,
            length: None,
            default_value: None,
            value: None,
        }
    }

    /// Sets the scale factor.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Sets the string byte length.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets the default value.
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Returns the scale factor when it changes values.
    ///
    /// Zero and one are treated as "no scaling".
    pub fn effective_scale(&self) -> Option<f64> {
        match self.scale {
            Some(s) if self.data_type.is_numeric() && s != 0.0 && s != 1.0 && s.is_finite() => {
                Some(s)
            }
            _ => None,
        }
    }

    /// Returns the type of decoded values.
    ///
    /// Scaled numerics and `number` decode to `float64`.
    pub fn value_type(&self) -> DataType {
        if self.data_type == DataType::Number || self.effective_scale().is_some() {
            DataType::Float64
        } else {
            self.data_type
        }
    }

    /// Returns the wire size in bytes, if known.
    pub fn byte_len(&self) -> Option<usize> {
        match self.data_type {
            DataType::String => self.length.filter(|l| *l > 0),
            other => other.fixed_size(),
        }
    }

    /// Converts the configured default into a typed value.
    pub fn default_typed(&self) -> Option<Value> {
        self.default_value
            .as_ref()
            .and_then(|raw| Value::from_json(self.value_type(), raw).ok())
    }
}

/// A decoded variable as delivered in a cycle result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableValue {
    /// Variable name.
    pub name: String,
    /// Decoded value.
    pub value: Value,
}

impl VariableValue {
    /// Creates a decoded variable.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

// =============================================================================
// MemoryLayout
// =============================================================================

/// Byte arrangement of multi-byte values on the wire.
///
/// Letters name the wire position of each byte of the big-endian value
/// `A B C D`; 64-bit values extend the same rule word by word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MemoryLayout {
    /// Big-endian, most significant byte first.
    #[default]
    #[serde(rename = "ABCD", alias = "big_endian", alias = "abcd")]
    Abcd,
    /// Little-endian, every byte reversed.
    #[serde(rename = "DCBA", alias = "little_endian", alias = "dcba")]
    Dcba,
    /// Big-endian words with bytes swapped inside each word.
    #[serde(rename = "BADC", alias = "byte_swap", alias = "badc")]
    Badc,
    /// Little-endian word order with big-endian words.
    #[serde(rename = "CDAB", alias = "word_swap", alias = "cdab")]
    Cdab,
}

impl MemoryLayout {
    /// Returns common vendor-specific aliases for this layout.
    pub const fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Abcd => &["ABCD", "big_endian", "big", "network"],
            Self::Dcba => &["DCBA", "little_endian", "little", "intel"],
            Self::Badc => &["BADC", "byte_swap", "mid_little"],
            Self::Cdab => &["CDAB", "word_swap", "mid_big", "modicon"],
        }
    }

    /// Returns true if bytes inside each 16-bit word are swapped.
    pub const fn swaps_bytes(&self) -> bool {
        matches!(self, Self::Dcba | Self::Badc)
    }

    /// Returns true if the 16-bit words are in reverse order.
    pub const fn swaps_words(&self) -> bool {
        matches!(self, Self::Dcba | Self::Cdab)
    }
}

impl fmt::Display for MemoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Abcd => "ABCD",
            Self::Dcba => "DCBA",
            Self::Badc => "BADC",
            Self::Cdab => "CDAB",
        };
        f.write_str(s)
    }
}

impl FromStr for MemoryLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "abcd" | "bigendian" | "big" | "be" | "network" => Ok(Self::Abcd),
            "dcba" | "littleendian" | "little" | "le" | "intel" => Ok(Self::Dcba),
            "badc" | "byteswap" | "midlittle" | "midlittleendian" => Ok(Self::Badc),
            "cdab" | "wordswap" | "midbig" | "midbigendian" | "modicon" => Ok(Self::Cdab),
            _ => Err(ConfigError::invalid_value(
                "memory_layout",
                format!("'{}' is not one of ABCD, DCBA, BADC, CDAB", s),
            )),
        }
    }
}

// =============================================================================
// ProtocolModel
// =============================================================================

/// The closed set of supported protocol models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolModel {
    /// Modbus over TCP with MBAP framing.
    #[serde(rename = "modbus-tcp")]
    ModbusTcp,
    /// Modbus RTU over a serial line.
    #[serde(rename = "modbus-rtu")]
    ModbusRtu,
    /// Modbus RTU frames carried over a TCP stream.
    #[serde(rename = "modbus-rtu-over-tcp")]
    ModbusRtuOverTcp,
    /// Siemens S7 over ISO-on-TCP.
    #[serde(rename = "s7")]
    S7,
    /// OPC-UA binary.
    #[serde(rename = "opcua", alias = "opc-ua")]
    OpcUa,
}

impl ProtocolModel {
    /// Every supported model.
    pub const ALL: [ProtocolModel; 5] = [
        Self::ModbusTcp,
        Self::ModbusRtu,
        Self::ModbusRtuOverTcp,
        Self::S7,
        Self::OpcUa,
    ];

    /// Returns the configuration key of this model.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "modbus-tcp",
            Self::ModbusRtu => "modbus-rtu",
            Self::ModbusRtuOverTcp => "modbus-rtu-over-tcp",
            Self::S7 => "s7",
            Self::OpcUa => "opcua",
        }
    }

    /// Returns true for the Modbus family.
    pub const fn is_modbus(&self) -> bool {
        matches!(
            self,
            Self::ModbusTcp | Self::ModbusRtu | Self::ModbusRtuOverTcp
        )
    }
}

impl fmt::Display for ProtocolModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "modbus-tcp" | "modbustcp" => Ok(Self::ModbusTcp),
            "modbus-rtu" | "modbusrtu" => Ok(Self::ModbusRtu),
            "modbus-rtu-over-tcp" | "modbus-rtu-tcp" => Ok(Self::ModbusRtuOverTcp),
            "s7" | "siemens-s7" => Ok(Self::S7),
            "opcua" | "opc-ua" => Ok(Self::OpcUa),
            _ => Err(ConfigError::UnknownModel(s.to_string())),
        }
    }
}

// =============================================================================
// Serial Port Settings
// =============================================================================

/// Data bits configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits (default).
    #[default]
    Eight,
}

impl DataBits {
    /// Returns the number of bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

/// Parity configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity (default).
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Parity {
    /// Returns the number of parity bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Odd | Self::Even => 1,
        }
    }
}

/// Stop bits configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// 1 stop bit (default).
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

impl StopBits {
    /// Returns the number of stop bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path (`/dev/ttyUSB0`, `COM3`).
    pub path: String,

    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits.
    #[serde(default)]
    pub data_bits: DataBits,

    /// Parity.
    #[serde(default)]
    pub parity: Parity,

    /// Stop bits.
    #[serde(default)]
    pub stop_bits: StopBits,
}

fn default_baud_rate() -> u32 {
    9600
}

impl SerialSettings {
    /// Creates 8N1 settings at the given baud rate.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
        }
    }

    /// Returns the silent interval that separates RTU frames.
    ///
    /// 3.5 character times, at least one millisecond.
    pub fn inter_frame_delay(&self) -> Duration {
        let bits_per_char =
            1 + self.data_bits.bits() + self.parity.bits() + self.stop_bits.bits();
        let baud = self.baud_rate.max(1) as f64;
        let delay_us = (3.5 * bits_per_char as f64 / baud * 1_000_000.0) as u64;
        Duration::from_micros(delay_us.max(1000))
    }
}

// =============================================================================
// TransportAddress
// =============================================================================

/// Where a device is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportAddress {
    /// TCP endpoint.
    Tcp {
        /// Host name or IP.
        host: String,
        /// Port.
        port: u16,
    },
    /// Local serial port.
    Serial(SerialSettings),
    /// Endpoint URL (OPC-UA).
    Url {
        /// Endpoint URL.
        url: String,
    },
}

impl TransportAddress {
    /// Creates a TCP address.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Creates a URL address.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Self::Serial(s) => write!(f, "{}@{}", s.path, s.baud_rate),
            Self::Url { url } => f.write_str(url),
        }
    }
}

// =============================================================================
// ProtocolOptions
// =============================================================================

/// Per-protocol knobs. Fields irrelevant to a model are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolOptions {
    /// Modbus unit (slave) id.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// S7 rack.
    #[serde(default)]
    pub rack: u16,

    /// S7 slot.
    #[serde(default = "default_slot")]
    pub slot: u16,

    /// S7 connection type (1 = PG, 2 = OP, 3 = S7 basic).
    #[serde(default = "default_connection_type")]
    pub connection_type: u16,

    /// S7 PDU size assumed when planning frames.
    #[serde(default = "default_pdu_size")]
    pub pdu_size: u16,

    /// Optional cap on the per-request span, below the protocol maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_span: Option<u32>,

    /// OPC-UA nodes per read request.
    #[serde(default = "default_max_nodes_per_read")]
    pub max_nodes_per_read: usize,
}

fn default_unit_id() -> u8 {
    1
}

fn default_slot() -> u16 {
    1
}

fn default_connection_type() -> u16 {
    1
}

fn default_pdu_size() -> u16 {
    240
}

fn default_max_nodes_per_read() -> usize {
    100
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            rack: 0,
            slot: default_slot(),
            connection_type: default_connection_type(),
            pdu_size: default_pdu_size(),
            max_span: None,
            max_nodes_per_read: default_max_nodes_per_read(),
        }
    }
}

impl ProtocolOptions {
    /// Caps a protocol maximum span by the configured `max_span`.
    pub fn span_limit(&self, protocol_max: u32) -> u32 {
        match self.max_span {
            Some(cap) if cap > 0 => cap.min(protocol_max),
            _ => protocol_max,
        }
    }
}

// =============================================================================
// DeviceConfig
// =============================================================================

/// Immutable configuration snapshot of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identity.
    pub id: DeviceId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Protocol model.
    pub model: ProtocolModel,

    /// Transport address.
    pub transport: TransportAddress,

    /// Poll interval.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Per-call read deadline.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Byte arrangement of multi-byte values.
    #[serde(default)]
    pub memory_layout: MemoryLayout,

    /// Subtracted from numeric address offsets.
    #[serde(default)]
    pub address_base: u32,

    /// Connection pool size.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Protocol-specific options.
    #[serde(default)]
    pub protocol: ProtocolOptions,

    /// Per-frame retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Polled variables.
    #[serde(default)]
    pub variables: Vec<Variable>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_sessions() -> usize {
    1
}

impl DeviceConfig {
    /// Creates a device configuration with defaults and no variables.
    pub fn new(id: impl Into<DeviceId>, model: ProtocolModel, transport: TransportAddress) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            model,
            transport,
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
            memory_layout: MemoryLayout::default(),
            address_base: 0,
            max_sessions: default_max_sessions(),
            protocol: ProtocolOptions::default(),
            retry: RetryConfig::default(),
            variables: Vec::new(),
        }
    }

    /// Adds a variable.
    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the memory layout.
    pub fn with_memory_layout(mut self, layout: MemoryLayout) -> Self {
        self.memory_layout = layout;
        self
    }

    /// Sets the pool size.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Deadline for waiting on a pooled session.
    ///
    /// Long enough for another frame to finish every attempt.
    pub fn acquire_timeout(&self) -> Duration {
        self.timeout
            .saturating_mul(self.retry.max_attempts.max(1).saturating_add(1))
    }

    /// Looks up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigError::invalid_value("id", "device id must not be empty"));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::invalid_value(
                "max_sessions",
                "pool needs at least one session",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "poll_interval",
                "must be greater than zero",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid_value("timeout", "must be greater than zero"));
        }
        self.retry.validate()?;

        if self.variables.is_empty() {
            return Err(ConfigError::NoVariables {
                device: self.id.to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(self.variables.len());
        for variable in &self.variables {
            if variable.name.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    "variables.name",
                    "variable name must not be empty",
                ));
            }
            if !seen.insert(variable.name.as_str()) {
                return Err(ConfigError::DuplicateVariable {
                    name: variable.name.clone(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceConfig {
        DeviceConfig::new(
            "plc-1",
            ProtocolModel::ModbusTcp,
            TransportAddress::tcp("127.0.0.1", 502),
        )
        .with_variable(Variable::new("temp", DataType::Float32, "hr:0"))
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!("REAL".parse::<DataType>().unwrap(), DataType::Float32);
        assert_eq!("uint16".parse::<DataType>().unwrap(), DataType::UInt16);
        assert!("decimal".parse::<DataType>().is_err());
    }

    #[test]
    fn test_memory_layout_parse_and_serde() {
        assert_eq!("word_swap".parse::<MemoryLayout>().unwrap(), MemoryLayout::Cdab);
        assert_eq!("BADC".parse::<MemoryLayout>().unwrap(), MemoryLayout::Badc);
        let layout: MemoryLayout = serde_json::from_str("\"little_endian\"").unwrap();
        assert_eq!(layout, MemoryLayout::Dcba);
        assert_eq!(serde_json::to_string(&MemoryLayout::Cdab).unwrap(), "\"CDAB\"");
    }

    #[test]
    fn test_protocol_model_rejects_unknown() {
        assert_eq!("MODBUS_TCP".parse::<ProtocolModel>().unwrap(), ProtocolModel::ModbusTcp);
        assert!(matches!(
            "bacnet".parse::<ProtocolModel>(),
            Err(ConfigError::UnknownModel(m)) if m == "bacnet"
        ));
        let parsed: Result<ProtocolModel, _> = serde_json::from_str("\"profinet\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_value_from_json() {
        use serde_json::json;

        assert_eq!(Value::from_json(DataType::Bool, &json!(true)), Ok(Value::Bool(true)));
        assert_eq!(Value::from_json(DataType::Bool, &json!(1)), Ok(Value::Bool(true)));
        assert!(Value::from_json(DataType::Bool, &json!(2)).is_err());
        assert_eq!(Value::from_json(DataType::Int16, &json!(-5)), Ok(Value::Int16(-5)));
        assert!(Value::from_json(DataType::Int16, &json!(40000)).is_err());
        assert!(Value::from_json(DataType::UInt16, &json!(-1)).is_err());
        assert_eq!(Value::from_json(DataType::UInt16, &json!("12")), Ok(Value::UInt16(12)));
        assert!(Value::from_json(DataType::Int32, &json!(1.5)).is_err());
        assert_eq!(Value::from_json(DataType::Int32, &json!(2.0)), Ok(Value::Int32(2)));
        assert_eq!(
            Value::from_json(DataType::Float64, &json!(21.5)),
            Ok(Value::Float64(21.5))
        );
        assert!(Value::from_json(DataType::String, &json!(3)).is_err());
        assert!(Value::from_json(DataType::Float32, &json!({"x": 1})).is_err());
    }

    #[test]
    fn test_value_serializes_bare() {
        let v = VariableValue::new("temp", Value::Float64(21.5));
        assert_eq!(
            serde_json::to_string(&v).unwrap(),
            r#"{"name":"temp","value":21.5}"#
        );
    }

    #[test]
    fn test_variable_scale_and_value_type() {
        let plain = Variable::new("a", DataType::Int16, "0");
        assert_eq!(plain.value_type(), DataType::Int16);

        let unit = Variable::new("b", DataType::Int16, "0").with_scale(1.0);
        assert!(unit.effective_scale().is_none());

        let zero = Variable::new("c", DataType::Int16, "0").with_scale(0.0);
        assert!(zero.effective_scale().is_none());

        let scaled = Variable::new("d", DataType::Int16, "0").with_scale(0.1);
        assert_eq!(scaled.effective_scale(), Some(0.1));
        assert_eq!(scaled.value_type(), DataType::Float64);

        let number = Variable::new("e", DataType::Number, "0");
        assert_eq!(number.value_type(), DataType::Float64);
    }

    #[test]
    fn test_device_validate() {
        assert!(device().validate().is_ok());

        let dup = device().with_variable(Variable::new("temp", DataType::Int16, "hr:4"));
        assert!(matches!(
            dup.validate(),
            Err(ConfigError::DuplicateVariable { name }) if name == "temp"
        ));

        let mut empty = device();
        empty.variables.clear();
        assert!(matches!(empty.validate(), Err(ConfigError::NoVariables { .. })));

        // byte-addressed planners decide whether a string needs a length
        let string = device().with_variable(Variable::new("label", DataType::String, "hr:10"));
        assert!(string.validate().is_ok());

        assert!(device().with_max_sessions(0).validate().is_err());
    }

    #[test]
    fn test_opcua_string_without_length_validates() {
        let device = DeviceConfig::new(
            "ua",
            ProtocolModel::OpcUa,
            TransportAddress::url("opc.tcp://127.0.0.1:4840"),
        )
        .with_variable(Variable::new("state", DataType::String, "ns=2;s=Line1.State"));
        assert!(device.validate().is_ok());
        assert!(device.variables[0].byte_len().is_none());
    }

    #[test]
    fn test_device_config_deserialize() {
        let yaml = r#"
id: meter-7
model: modbus-rtu
transport:
  type: serial
  path: /dev/ttyUSB0
  baud_rate: 19200
  parity: even
poll_interval: 500ms
memory_layout: CDAB
protocol:
  unit_id: 7
variables:
  - name: voltage
    data_type: float32
    address: "ir:0"
    scale: 0.1
"#;
        let config: DeviceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.model, ProtocolModel::ModbusRtu);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.memory_layout, MemoryLayout::Cdab);
        assert_eq!(config.protocol.unit_id, 7);
        assert_eq!(config.max_sessions, 1);
        match &config.transport {
            TransportAddress::Serial(s) => {
                assert_eq!(s.baud_rate, 19200);
                assert_eq!(s.parity, Parity::Even);
                assert_eq!(s.stop_bits, StopBits::One);
            }
            other => panic!("unexpected transport {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inter_frame_delay() {
        let fast = SerialSettings::new("/dev/ttyS0", 115_200);
        assert_eq!(fast.inter_frame_delay(), Duration::from_millis(1));

        let slow = SerialSettings::new("/dev/ttyS0", 9600);
        // 3.5 * 10 bits / 9600 baud
        assert_eq!(slow.inter_frame_delay(), Duration::from_micros(3645));
    }

    #[test]
    fn test_span_limit() {
        let mut options = ProtocolOptions::default();
        assert_eq!(options.span_limit(125), 125);
        options.max_span = Some(40);
        assert_eq!(options.span_limit(125), 40);
        options.max_span = Some(500);
        assert_eq!(options.span_limit(125), 125);
    }
}
