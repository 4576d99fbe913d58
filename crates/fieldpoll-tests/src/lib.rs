// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # fieldpoll Integration Tests
//!
//! Shared fixtures and mock field devices, plus cross-crate integration
//! tests under `tests/`.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p fieldpoll-tests
//! cargo test -p fieldpoll-tests --test integration_modbus
//! cargo test -p fieldpoll-tests --test integration_s7
//! cargo test -p fieldpoll-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! | Suite | Covers |
//! |-------|--------|
//! | `integration_modbus` | polling, scaling, layouts, writes, retries and reconnects against a mock slave |
//! | `integration_s7` | handshake, area reads, bit and string writes, return codes against a mock PLC |
//! | `integration_config` | configuration files through the registry into engines |
//!
//! ## Using the Mocks
//!
//! ```rust,ignore
//! use fieldpoll_tests::prelude::*;
//!
//! let server = MockModbusServer::start().await;
//! server.set_holding(0, &[0x0000, 0x4120]);
//! let device = DeviceFixtures::modbus_press(server.port());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{config_file, init_test_logging, next_cycle, registry, wait_for_cycle};
}
