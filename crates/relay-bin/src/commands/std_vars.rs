// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `std-vars` command.

use crate::cli::{Cli, OutputFormat, StdVarsArgs};
use crate::error::BinResult;

/// Prints the standard variable table.
pub fn std_vars(_cli: &Cli, args: StdVarsArgs) -> BinResult<()> {
    println!("{}", render(args.format)?);
    Ok(())
}

fn render(format: OutputFormat) -> BinResult<String> {
    let table = relay_opcua::stdvars::all();
    Ok(match format {
        OutputFormat::Text => {
            let mut out = String::from("slot  name");
            for var in table {
                out.push_str(&format!("\n{:<4}  {}", var.slot, var.name));
            }
            out
        }
        OutputFormat::Json => serde_json::to_string_pretty(table)?,
    })
}
