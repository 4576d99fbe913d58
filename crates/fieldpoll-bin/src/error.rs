// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the fieldpoll binary.

use thiserror::Error;

use fieldpoll_config::LoadError;
use fieldpoll_core::{ActionError, ConfigError};

/// Result type alias for fieldpoll-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the fieldpoll binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// The configuration file could not be loaded or validated.
    #[error("Configuration error: {0}")]
    Load(#[from] LoadError),

    /// A device could not be turned into an engine.
    #[error("Device '{device}' rejected: {source}")]
    Device {
        /// Device id.
        device: String,
        /// Why the engine could not be built.
        #[source]
        source: ConfigError,
    },

    /// A write request failed.
    #[error("Write failed: {0}")]
    Action(#[from] ActionError),

    /// Logging could not be initialized.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No device with this id in the configuration.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// A write assignment is not `name=value`.
    #[error("Invalid assignment '{0}': expected name=value")]
    InvalidAssignment(String),
}

impl BinError {
    /// Creates a device error.
    pub fn device(device: impl Into<String>, source: ConfigError) -> Self {
        Self::Device {
            device: device.into(),
            source,
        }
    }

    /// Creates an initialization error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Load(_) | Self::Device { .. } | Self::UnknownDevice(_) | Self::InvalidAssignment(_) => 1,
            Self::Initialization(_) => 2,
            Self::Action(_) => 3,
            Self::Io(_) => 4,
        }
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain on stderr.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpoll_core::ValidationError;

    #[test]
    fn test_error_display() {
        let err = BinError::InvalidAssignment("setpoint".to_string());
        assert_eq!(err.to_string(), "Invalid assignment 'setpoint': expected name=value");

        let err = BinError::device("press-1", ConfigError::UnknownModel("bacnet".to_string()));
        assert!(err.to_string().starts_with("Device 'press-1' rejected: "));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BinError::UnknownDevice("x".to_string()).exit_code(), 1);
        assert_eq!(BinError::init("x").exit_code(), 2);
        let action = ActionError::from(ValidationError::UnknownVariable {
            name: "x".to_string(),
        });
        assert_eq!(BinError::from(action).exit_code(), 3);
        assert_eq!(BinError::from(std::io::Error::other("x")).exit_code(), 4);
    }
}
