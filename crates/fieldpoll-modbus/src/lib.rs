// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # fieldpoll-modbus
//!
//! Modbus binding for the fieldpoll engine.
//!
//! ## Features
//!
//! - **Modbus TCP**: MBAP framing with per-request transaction ids
//! - **Modbus RTU**: serial lines with CRC-16 and inter-frame gaps
//! - **RTU over TCP**: RTU frames through a TCP gateway
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ ModbusFactory │ ──► │ ModbusDriver │ ──► │ ModbusSession  │
//! └───────────────┘     └──────────────┘     └────────────────┘
//!                        plan / fetch /        TCP or serial
//!                        encode_write          stream + framing
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod driver;
pub mod factory;
pub mod frame;
pub mod planner;
pub mod session;
pub mod types;

pub use driver::{ModbusDriver, ModbusWrite};
pub use factory::ModbusFactory;
pub use frame::Framing;
pub use planner::ReadFrame;
pub use session::{Endpoint, ModbusConnector, ModbusSession};
pub use types::{AddressError, ModbusAddress, RegisterType};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
