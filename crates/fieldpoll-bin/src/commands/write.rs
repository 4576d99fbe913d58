// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `write` command.

use fieldpoll_core::WriteRequest;
use tracing::info;

use crate::cli::{Cli, WriteArgs};
use crate::error::{BinError, BinResult};
use crate::supervisor::default_registry;

use super::{load_config, setup_logging};

/// Parses `name=value` assignments.
///
/// Values are read as JSON (`42`, `1.5`, `true`, `"text"`); anything that
/// is not valid JSON is taken as a plain string.
pub fn parse_assignments(items: &[String]) -> BinResult<WriteRequest> {
    let mut request = WriteRequest::new();
    for item in items {
        let (name, raw) = item
            .split_once('=')
            .ok_or_else(|| BinError::InvalidAssignment(item.clone()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(BinError::InvalidAssignment(item.clone()));
        }
        let value = serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        request = request.set(name, value);
    }
    Ok(request)
}

/// Writes the assignments to one device and exits.
///
/// The engine is built but never started: the write runs on its own
/// pooled session.
pub async fn write(cli: &Cli, args: WriteArgs) -> BinResult<()> {
    let config = load_config(cli)?;
    setup_logging(cli, &config)?;

    let device = config
        .device(&args.device)
        .cloned()
        .ok_or_else(|| BinError::UnknownDevice(args.device.clone()))?;
    let request = parse_assignments(&args.assignments)?;

    let (engine, _results) = default_registry()
        .new_engine(device)
        .map_err(|source| BinError::device(&args.device, source))?;
    let outcome = engine.apply_action(request).await;
    engine.destroy().await;

    let written = outcome?;
    info!(device = %args.device, written, "Write complete");
    println!("{} value(s) written to {}", written, args.device);
    Ok(())
}
