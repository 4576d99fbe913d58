// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error taxonomy for the polling engine.
//!
//! Errors are split by the layer that produces them, because the engine
//! reacts differently to each class:
//!
//! ```text
//! Error
//! ├── ConfigError      fatal at construction, the engine never starts
//! ├── FetchError       one frame in one cycle
//! │   ├── TransportError   session discarded, fresh session acquired
//! │   ├── ProtocolError    session reused, bounded by the same attempt count
//! │   ├── DecodeError      surfaced, never retried
//! │   └── PoolError        pool closed or no session within the deadline
//! └── ActionError      aggregated write-path failures
//!     └── ValidationError  rejected before any wire traffic
//! ```
//!
//! Per-frame errors never cross the cycle boundary: they are collected into
//! the cycle result next to the variables that did decode.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryAction;
use crate::types::DataType;

// =============================================================================
// Result Aliases
// =============================================================================

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Result type for a single frame exchange.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

// =============================================================================
// Error (top level)
// =============================================================================

/// Top-level error for everything the engine can report.
#[derive(Debug, Error)]
pub enum Error {
    /// Device configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A frame exchange failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A write request failed in whole or in part.
    #[error(transparent)]
    Action(#[from] ActionError),
}

impl Error {
    /// Returns a short category string suitable for a log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Fetch(e) => e.category(),
            Self::Action(_) => "action",
        }
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Configuration errors. Reported once, at engine construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The protocol model is not registered.
    #[error("Unknown protocol model: {0}")]
    UnknownModel(String),

    /// The device has no variables.
    #[error("Device '{device}' has no variables")]
    NoVariables {
        /// Device identifier.
        device: String,
    },

    /// Planning produced zero frames.
    #[error("Device '{device}' cannot be polled: {reason}")]
    NotPollable {
        /// Device identifier.
        device: String,
        /// Why no frame could be planned.
        reason: String,
    },

    /// Two variables share a name.
    #[error("Duplicate variable name: {name}")]
    DuplicateVariable {
        /// The repeated name.
        name: String,
    },

    /// A variable address could not be parsed for the protocol.
    #[error("Invalid address '{address}' for variable '{variable}': {reason}")]
    InvalidAddress {
        /// Variable name.
        variable: String,
        /// The address as configured.
        address: String,
        /// Parse failure detail.
        reason: String,
    },

    /// A single variable is wider than one request may cover.
    #[error("Variable '{variable}' spans {units} units, exceeding the per-request limit of {max}")]
    SpanTooLarge {
        /// Variable name.
        variable: String,
        /// Units the variable occupies.
        units: u32,
        /// Protocol limit.
        max: u32,
    },

    /// The data type cannot live at the configured address.
    #[error("Data type {data_type} is not supported for variable '{variable}': {reason}")]
    UnsupportedType {
        /// Variable name.
        variable: String,
        /// Declared data type.
        data_type: DataType,
        /// Why the combination is rejected.
        reason: String,
    },

    /// The transport address does not suit the protocol model.
    #[error("Invalid transport: {0}")]
    InvalidTransport(String),

    /// A scalar setting is out of range.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Setting name.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid address error.
    pub fn invalid_address(
        variable: impl Into<String>,
        address: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAddress {
            variable: variable.into(),
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unsupported data type error.
    pub fn unsupported_type(
        variable: impl Into<String>,
        data_type: DataType,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsupportedType {
            variable: variable.into(),
            data_type,
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Transport-class failures. The session that produced one is always
/// discarded.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("Connection to {target} failed: {source}")]
    Connect {
        /// Host/port or device path.
        target: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// Opening the connection exceeded the deadline.
    #[error("Connection to {target} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Host/port or device path.
        target: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// No complete response arrived within the read deadline.
    #[error("No response within {timeout:?}")]
    ReadTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Read or write on an open connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    Closed,

    /// Protocol session setup was refused or malformed.
    #[error("Session setup failed: {0}")]
    Handshake(String),
}

impl TransportError {
    /// Creates a connect error.
    pub fn connect(target: impl Into<String>, source: io::Error) -> Self {
        Self::Connect {
            target: target.into(),
            source,
        }
    }

    /// Creates a handshake error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake(reason.into())
    }
}

// =============================================================================
// ProtocolError
// =============================================================================

/// A response arrived but failed validation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame checksum did not match.
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Checksum {
        /// Checksum computed over the received bytes.
        expected: u16,
        /// Checksum carried by the frame.
        actual: u16,
    },

    /// The response belongs to a different request.
    #[error("Transaction id mismatch: expected {expected}, got {actual}")]
    TransactionMismatch {
        /// Id that was sent.
        expected: u16,
        /// Id that came back.
        actual: u16,
    },

    /// The response came from a different unit/slave.
    #[error("Unit id mismatch: expected {expected}, got {actual}")]
    UnitMismatch {
        /// Addressed unit.
        expected: u8,
        /// Responding unit.
        actual: u8,
    },

    /// The response answers a different function.
    #[error("Function code mismatch: expected {expected:#04x}, got {actual:#04x}")]
    FunctionMismatch {
        /// Function that was sent.
        expected: u8,
        /// Function in the response.
        actual: u8,
    },

    /// The device answered with an exception.
    #[error("Device exception {code:#04x}: {description}")]
    Exception {
        /// Raw exception code.
        code: u8,
        /// Human-readable meaning.
        description: &'static str,
    },

    /// Fewer bytes than the frame requires.
    #[error("Response too short: expected {expected} bytes, got {actual}")]
    ShortResponse {
        /// Bytes required.
        expected: usize,
        /// Bytes received.
        actual: usize,
    },

    /// The response structure is invalid.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The device reported a non-success status for the request.
    #[error("Device status {code:#x}: {description}")]
    Status {
        /// Raw status code.
        code: u32,
        /// Human-readable meaning.
        description: String,
    },
}

impl ProtocolError {
    /// Creates a malformed response error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// Returns true if the device deliberately rejected the request.
    ///
    /// Repeating such a request yields the same answer.
    pub fn is_device_rejection(&self) -> bool {
        matches!(self, Self::Exception { .. } | Self::Status { .. })
    }
}

// =============================================================================
// CodecError / DecodeError
// =============================================================================

/// Failures of the pure byte codec.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// The slot lies outside the buffer.
    #[error("need {needed} bytes at offset {offset}, buffer holds {available}")]
    OutOfRange {
        /// Slot start.
        offset: usize,
        /// Slot length.
        needed: usize,
        /// Buffer length.
        available: usize,
    },

    /// A bit index beyond the slot width.
    #[error("bit {bit} is outside a {width}-bit field")]
    BitOutOfRange {
        /// Requested bit.
        bit: u8,
        /// Field width in bits.
        width: usize,
    },

    /// String payload is not UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// The value does not fit the wire type.
    #[error("value {value} does not fit {data_type}")]
    Overflow {
        /// Rendered value.
        value: String,
        /// Target wire type.
        data_type: DataType,
    },

    /// The value variant cannot be written as the wire type.
    #[error("cannot encode {value_type} as {data_type}")]
    TypeMismatch {
        /// Value variant name.
        value_type: &'static str,
        /// Target wire type.
        data_type: DataType,
    },

    /// A string longer than its field.
    #[error("string of {len} bytes exceeds the {capacity}-byte field")]
    StringTooLong {
        /// Encoded length.
        len: usize,
        /// Field capacity.
        capacity: usize,
    },
}

/// A variable in an otherwise valid response could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The codec rejected the slot.
    #[error("Failed to decode '{variable}': {source}")]
    Codec {
        /// Variable name.
        variable: String,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// The device flagged the individual item as bad.
    #[error("Variable '{variable}' has bad status: {status}")]
    BadStatus {
        /// Variable name.
        variable: String,
        /// Status as reported.
        status: String,
    },
}

impl DecodeError {
    /// Wraps a codec error with the variable it concerns.
    pub fn codec(variable: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            variable: variable.into(),
            source,
        }
    }

    /// Returns the variable the error concerns.
    pub fn variable(&self) -> &str {
        match self {
            Self::Codec { variable, .. } | Self::BadStatus { variable, .. } => variable,
        }
    }
}

// =============================================================================
// PoolError
// =============================================================================

/// Connection pool failures.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been destroyed.
    #[error("Connection pool is closed")]
    Closed,

    /// No session became available before the deadline.
    #[error("No session available within {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// Creating a new session failed.
    #[error("Failed to open session: {0}")]
    Connect(#[from] TransportError),
}

// =============================================================================
// FetchError
// =============================================================================

/// The error recorded for one frame in one cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-class failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response validation failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Decode failure.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Session acquisition failure.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The frame task ended without reporting an outcome.
    #[error("Fetch aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Returns true for the transport class, where the session must go.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Pool(PoolError::Connect(_)))
    }

    /// Decides how the engine reacts to this error within the attempt bound.
    pub fn retry_action(&self) -> RetryAction {
        match self {
            Self::Transport(_) => RetryAction::Reconnect,
            Self::Pool(PoolError::Closed) => RetryAction::Stop,
            Self::Pool(_) => RetryAction::Reconnect,
            Self::Protocol(e) if e.is_device_rejection() => RetryAction::Stop,
            Self::Protocol(_) => RetryAction::Reuse,
            Self::Decode(_) | Self::Aborted(_) => RetryAction::Stop,
        }
    }

    /// Returns a short category string suitable for a log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Decode(_) => "decode",
            Self::Pool(_) => "pool",
            Self::Aborted(_) => "aborted",
        }
    }
}

// =============================================================================
// ValidationError / ActionError
// =============================================================================

/// Write-path validation failures. Raised before any wire traffic.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No variable with this name on the device.
    #[error("Unknown variable: {name}")]
    UnknownVariable {
        /// Requested name.
        name: String,
    },

    /// The same name appears more than once in one request.
    #[error("Variable '{name}' appears more than once in the request")]
    DuplicateVariable {
        /// Repeated name.
        name: String,
    },

    /// Nothing in the request survived validation.
    #[error("Write request contains no valid entries")]
    NoValidEntries,

    /// The supplied value cannot become the variable's type.
    #[error("Cannot convert {value} to {data_type} for '{name}': {reason}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Target type.
        data_type: DataType,
        /// Supplied value, rendered.
        value: String,
        /// Conversion failure.
        reason: String,
    },

    /// The variable's storage cannot be written.
    #[error("Variable '{name}' is read-only")]
    ReadOnly {
        /// Variable name.
        name: String,
    },

    /// The converted value does not fit the wire encoding.
    #[error("Cannot encode '{name}': {source}")]
    Encode {
        /// Variable name.
        name: String,
        /// Codec failure.
        #[source]
        source: CodecError,
    },
}

impl ValidationError {
    /// Creates an invalid value error.
    pub fn invalid_value(
        name: impl Into<String>,
        data_type: DataType,
        value: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            name: name.into(),
            data_type,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// One failed entry of a write request.
#[derive(Debug, Error)]
pub enum ActionFailure {
    /// Rejected before reaching the wire.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The write frame itself failed.
    #[error("Write of '{variable}' failed: {source}")]
    Write {
        /// Variable name.
        variable: String,
        /// Frame failure.
        #[source]
        source: FetchError,
    },
}

/// Aggregated failures of one `apply_action` call.
#[derive(Debug)]
pub struct ActionError {
    failures: Vec<ActionFailure>,
}

impl ActionError {
    /// Creates an action error from collected failures.
    pub fn new(failures: Vec<ActionFailure>) -> Self {
        Self { failures }
    }

    /// Returns the individual failures in request order.
    pub fn failures(&self) -> &[ActionFailure] {
        &self.failures
    }

    /// Consumes the error and returns the individual failures.
    pub fn into_failures(self) -> Vec<ActionFailure> {
        self.failures
    }

    /// Returns the number of failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if no failures were collected.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns true if every failure happened during validation.
    pub fn is_validation_only(&self) -> bool {
        self.failures
            .iter()
            .all(|f| matches!(f, ActionFailure::Validation(_)))
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} write error(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for ActionError {}

impl From<ValidationError> for ActionError {
    fn from(error: ValidationError) -> Self {
        Self::new(vec![ActionFailure::Validation(error)])
    }
}

// =============================================================================
// Tests
// =============================================================================
