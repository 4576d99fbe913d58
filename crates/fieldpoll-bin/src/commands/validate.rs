// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use crate::cli::{Cli, ValidateArgs};
use crate::error::{BinError, BinResult};
use crate::supervisor::default_registry;

use super::load_config;

/// Loads the configuration and builds, without starting, every engine.
///
/// Building an engine parses every address and plans every frame, so a
/// configuration that passes here will not fail at `run` startup.
pub async fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config = load_config(cli)?;
    let registry = default_registry();

    for device in &config.devices {
        let (engine, _results) = registry
            .new_engine(device.clone())
            .map_err(|source| BinError::device(device.id.as_str(), source))?;
        engine.destroy().await;
    }

    println!("✓ Configuration is valid: {}", cli.config.display());
    println!();
    println!("Summary:");
    println!("  Devices:   {}", config.devices.len());
    println!("  Variables: {}", config.variable_count());
    for device in &config.devices {
        println!(
            "  - {} ({}, {}): {} variable(s) every {:?}",
            device.id,
            device.model,
            device.transport,
            device.variables.len(),
            device.poll_interval
        );
    }

    if args.show_config {
        println!();
        println!("Parsed configuration:");
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("(serialization error: {})", e),
        }
    }

    Ok(())
}
