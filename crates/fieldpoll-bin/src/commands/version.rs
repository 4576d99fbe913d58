// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use fieldpoll_core::ProtocolModel;

use crate::cli::Cli;
use crate::error::BinResult;

/// Prints version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("fieldpoll - field device polling gateway");
    println!();
    println!("Version Information:");
    println!("  fieldpoll-bin:    {}", crate::VERSION);
    println!("  fieldpoll-core:   {}", fieldpoll_core::VERSION);
    println!("  fieldpoll-config: {}", fieldpoll_config::VERSION);
    println!("  fieldpoll-modbus: {}", fieldpoll_modbus::VERSION);
    println!("  fieldpoll-s7:     {}", fieldpoll_s7::VERSION);
    println!("  fieldpoll-opcua:  {}", fieldpoll_opcua::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    let models: Vec<_> = ProtocolModel::ALL.iter().map(|m| m.as_str()).collect();
    println!("Protocols: {}", models.join(", "));
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
