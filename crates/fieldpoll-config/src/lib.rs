// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # fieldpoll-config
//!
//! Gateway configuration loading for fieldpoll.
//!
//! ## Features
//!
//! - **Multiple Formats**: YAML, TOML and JSON, chosen by file extension
//! - **Environment Placeholders**: `${VAR}` and `${VAR:default}` in any value
//! - **Overrides**: `FIELDPOLL_LOG_LEVEL` / `FIELDPOLL_LOG_FORMAT`
//! - **Validation**: unique device ids and per-device checks
//!
//! ## Example
//!
//! ```rust,ignore
//! use fieldpoll_config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load("gateway.yaml")?;
//! for device in &config.devices {
//!     println!("{} ({})", device.id, device.model);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{LoadError, LoadResult};
pub use loader::{resolve_env_placeholders, ConfigFormat, ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{GatewayConfig, LogFormat, LogLevel, LoggingConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
