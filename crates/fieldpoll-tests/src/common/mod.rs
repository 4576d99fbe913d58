// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Common Test Utilities
//!
//! - `fixtures`: device and configuration fixtures
//! - `mocks`: mock Modbus TCP and S7 servers

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

use std::io::Write;
use std::sync::{Arc, Once};
use std::time::Duration;

use fieldpoll_core::{CycleResult, EngineRegistry, ResultStream};
use fieldpoll_modbus::ModbusFactory;
use fieldpoll_opcua::OpcUaFactory;
use fieldpoll_s7::S7Factory;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize test logging. Call this at the start of each test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,fieldpoll=debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// A registry with every protocol factory.
pub fn registry() -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    for factory in ModbusFactory::all() {
        registry.register(factory);
    }
    registry.register(Arc::new(S7Factory::new()));
    registry.register(Arc::new(OpcUaFactory::new()));
    registry
}

/// Receives the next cycle result, failing the test after `timeout`.
pub async fn next_cycle(results: &mut ResultStream, timeout: Duration) -> CycleResult {
    tokio::time::timeout(timeout, results.recv())
        .await
        .expect("no cycle result in time")
        .expect("result stream closed")
}

/// Receives cycle results until one satisfies `accept`.
pub async fn wait_for_cycle<F>(results: &mut ResultStream, timeout: Duration, mut accept: F) -> CycleResult
where
    F: FnMut(&CycleResult) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let result = next_cycle(results, remaining).await;
        if accept(&result) {
            return result;
        }
    }
}

/// Writes `content` to a temporary file with the given extension.
pub fn config_file(extension: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{}", extension))
        .tempfile()
        .expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}
