// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-line interface definitions.
//!
//! ```bash
//! fieldpoll                                  # same as `fieldpoll run`
//! fieldpoll -c /etc/fieldpoll/gateway.yaml run
//! fieldpoll validate --show-config
//! fieldpoll write press-1 setpoint=42.5 enable=true
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use fieldpoll_config::{LogFormat, LogLevel};

// =============================================================================
// Cli
// =============================================================================

/// fieldpoll - field device polling gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "fieldpoll", author, version, about, propagate_version = true)]
pub struct Cli {
    /// Path to the gateway configuration file (yaml, toml or json)
    #[arg(
        short,
        long,
        global = true,
        env = "FIELDPOLL_CONFIG",
        default_value = "fieldpoll.yaml"
    )]
    pub config: PathBuf,

    /// Log level, overriding the configuration file
    #[arg(short, long, global = true, env = "FIELDPOLL_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Log format (text, json, compact), overriding the configuration file
    #[arg(long, global = true, env = "FIELDPOLL_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Poll every configured device until interrupted
    Run,

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Show version information
    Version,

    /// Write values to one device and exit
    Write(WriteArgs),
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Print the parsed configuration as JSON
    #[arg(long)]
    pub show_config: bool,
}

/// Arguments for the `write` command.
#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Device id
    pub device: String,

    /// Assignments as `name=value`; values are parsed as JSON, falling back to a string
    #[arg(required = true)]
    pub assignments: Vec<String>,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["fieldpoll"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run));
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["fieldpoll", "-c", "/etc/fieldpoll/gateway.toml", "validate"]);
        assert_eq!(cli.config, PathBuf::from("/etc/fieldpoll/gateway.toml"));
        assert!(matches!(cli.command, Some(Commands::Validate(_))));
    }

    #[test]
    fn test_log_overrides() {
        let cli = Cli::parse_from(["fieldpoll", "--log-level", "debug", "--log-format", "json"]);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(Cli::try_parse_from(["fieldpoll", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_write_command() {
        let cli = Cli::parse_from(["fieldpoll", "write", "press-1", "setpoint=42.5", "mode=auto"]);
        match cli.command {
            Some(Commands::Write(args)) => {
                assert_eq!(args.device, "press-1");
                assert_eq!(args.assignments, vec!["setpoint=42.5", "mode=auto"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_write_needs_assignments() {
        assert!(Cli::try_parse_from(["fieldpoll", "write", "press-1"]).is_err());
    }
}
