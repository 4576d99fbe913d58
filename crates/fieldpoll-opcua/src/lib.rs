// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # fieldpoll-opcua
//!
//! OPC-UA binding for the fieldpoll engine.
//!
//! Sessions are anonymous and use security policy `None`. Node addresses
//! use the standard `ns=<n>;i=<id>` / `ns=<n>;s=<name>` notation.
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │ OpcUaFactory │ ──► │ OpcUaDriver │ ──► │ OpcUaSession │
//! └──────────────┘     └─────────────┘     └──────────────┘
//!                       node batches,        blocking client
//!                       variant conversion   on spawn_blocking
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod convert;
pub mod driver;
pub mod factory;
pub mod node;
pub mod session;

pub use driver::{NodeBatch, OpcUaDriver, OpcUaWrite};
pub use factory::OpcUaFactory;
pub use node::{NodeAddress, NodeAddressError, NodeIdentifier};
pub use session::{OpcUaConnector, OpcUaSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
