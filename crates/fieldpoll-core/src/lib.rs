// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # fieldpoll-core
//!
//! Protocol-independent core of the fieldpoll device polling engine.
//!
//! This crate provides:
//!
//! - **Types**: the value model, device configuration and memory layouts
//! - **Codec**: byte-level decode/encode under a memory layout and scale
//! - **Plan**: greedy contiguity packing of variables into request spans
//! - **Pool**: bounded session pool with FIFO waiters
//! - **Session**: connector trait and a deadline-enforcing stream transport
//! - **Engine**: the per-device poll loop and write path
//! - **Registry**: typed factories keyed by protocol model
//!
//! Wire protocols live in their own crates and plug in through
//! [`engine::ProtocolDriver`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use fieldpoll_core::{EngineRegistry, DeviceConfig};
//!
//! let (engine, mut results) = registry.new_engine(device)?;
//! engine.start();
//! while let Some(cycle) = results.recv().await {
//!     for variable in &cycle.variables {
//!         println!("{} = {}", variable.name, variable.value);
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod retry;
pub mod types;

// =============================================================================
// Codec & Planning
// =============================================================================

pub mod codec;
pub mod plan;

// =============================================================================
// Sessions & Engine
// =============================================================================

pub mod engine;
pub mod pool;
pub mod registry;
pub mod session;
pub mod stats;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use error::{
    ActionError, ActionFailure, CodecError, ConfigError, DecodeError, Error, FetchError,
    PoolError, ProtocolError, TransportError, ValidationError,
};
pub use types::*;

pub use codec::{FieldFormat, Slot};
pub use engine::{
    CycleResult, EngineState, FrameFailure, FrameReading, PollEngine, ProtocolDriver,
    ResultStream, SessionOf, WriteRequest,
};
pub use plan::{PlanItem, Span, SpanMember};
pub use pool::{Pool, PoolStatus, Pooled};
pub use registry::{boxed_engine, DeviceEngine, EngineFactory, EngineRegistry};
pub use retry::{RetryAction, RetryConfig};
pub use session::{connect_tcp, ByteStream, Connector, FrameTransport, StreamTransport};
pub use stats::{EngineStats, EngineStatsSnapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
