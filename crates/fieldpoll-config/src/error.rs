// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading errors.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for configuration loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Why a gateway configuration could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file does not exist.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// The file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The extension names no supported format.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// The file content did not deserialize.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// Path to the file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// In-memory content did not deserialize.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Parser message.
        message: String,
    },

    /// An override variable holds an unusable value.
    #[error("Invalid environment variable value for '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// What was wrong.
        message: String,
    },

    /// Two devices share an id.
    #[error("Duplicate device ID: {device_id}")]
    DuplicateDeviceId {
        /// The repeated id.
        device_id: String,
    },

    /// A device failed validation.
    #[error("Device '{device_id}' is invalid: {source}")]
    Device {
        /// Offending device.
        device_id: String,
        /// Validation failure.
        #[source]
        source: fieldpoll_core::ConfigError,
    },
}

impl LoadError {
    /// Creates a file-not-found error.
    pub fn file_not_found(path: impl AsRef<Path>) -> Self {
        Self::FileNotFound {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a parse error for a file.
    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an invalid override error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}
