// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `run`: poll every configured device
//! - `validate`: validate the configuration file
//! - `version`: show version information
//! - `write`: one-shot write to a device

mod run;
mod validate;
mod version;
mod write;

pub use run::run;
pub use validate::validate;
pub use version::version;
pub use write::{parse_assignments, write};

use fieldpoll_config::{ConfigLoader, GatewayConfig};

use crate::cli::{Cli, Commands};
use crate::error::BinResult;
use crate::logging::init_logging;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Run => run::run(&cli).await,
        Commands::Validate(args) => validate::validate(&cli, args).await,
        Commands::Version => version::version(&cli),
        Commands::Write(args) => write::write(&cli, args).await,
    }
}

/// Loads and validates the configuration named on the command line.
fn load_config(cli: &Cli) -> BinResult<GatewayConfig> {
    Ok(ConfigLoader::new().load(&cli.config)?)
}

/// Installs logging; command-line flags win over the file.
fn setup_logging(cli: &Cli, config: &GatewayConfig) -> BinResult<()> {
    init_logging(
        cli.log_level.unwrap_or(config.logging.level),
        cli.log_format.unwrap_or(config.logging.format),
    )
}
