// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # fieldpoll-bin
//!
//! The `fieldpoll` executable.
//!
//! ```text
//!   fieldpoll.yaml ──► ConfigLoader ──► GatewayConfig
//!                                          │
//!                                          ▼
//!                      EngineRegistry ──► one engine per device
//!                                          │ ResultStream
//!                                          ▼
//!                      Supervisor ──► JSON lines on stdout
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Poll every configured device until SIGINT/SIGTERM |
//! | `validate` | Load and validate a configuration file |
//! | `version` | Print version information |
//! | `write` | Write `name=value` pairs to one device and exit |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod shutdown;
pub mod supervisor;

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use supervisor::{default_registry, ResultLine, Supervisor};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
