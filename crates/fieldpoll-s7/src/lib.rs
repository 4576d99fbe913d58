// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # fieldpoll-s7
//!
//! Siemens S7 binding for the fieldpoll engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌──────────┐     ┌───────────┐
//! │ S7Factory │ ──► │ S7Driver │ ──► │ S7Session │
//! └───────────┘     └──────────┘     └───────────┘
//!                    addresses,        TPKT / COTP / S7
//!                    byte frames       PDU negotiation
//! ```
//!
//! Addresses follow the usual STEP 7 notation (`DB1.DBW4`, `M10.3`,
//! `IW0`); see [`address`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod address;
pub mod driver;
pub mod factory;
pub mod planner;
pub mod protocol;
pub mod session;

pub use address::{Access, Area, S7Address, S7AddressError};
pub use driver::{S7Driver, S7Write};
pub use factory::S7Factory;
pub use planner::S7Frame;
pub use protocol::WriteTarget;
pub use session::{S7Connector, S7Session};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
