// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use relay_config::RelayConfig;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(BinError::Configuration(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = relay_config::load_config(config_path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;
    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Relay: {}", config.relay.name);
            println!(
                "  Server: {}",
                config
                    .endpoint()
                    .ok()
                    .flatten()
                    .map(|endpoint| endpoint.url())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  Auto connect: {}",
                if config.server.auto_connect { "enabled" } else { "disabled" }
            );
            println!("  Monitored items: {}", config.monitor.len());
            println!(
                "  Simulation: {} node(s), {}",
                config.simulation.nodes.len(),
                if config.simulation.enabled { "enabled" } else { "disabled" }
            );

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "relay": config.relay.name,
                    "server_host": config.server.host,
                    "server_port": config.server.port,
                    "auto_connect": config.server.auto_connect,
                    "monitored_items": config.monitor.len(),
                    "simulated_nodes": config.simulation.nodes.len(),
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if args.strict && !warnings.is_empty() {
        return Err(BinError::Configuration(format!(
            "Strict mode: {} warning(s) found",
            warnings.len()
        )));
    }

    Ok(())
}

/// Issues that do not make the configuration invalid.
fn collect_warnings(config: &RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.server.host.is_none() {
        warnings.push("No server host configured; connect must come from the router".to_string());
    }
    if config.monitor.is_empty() {
        warnings.push("No monitored items configured".to_string());
    }
    if !config.monitor.is_empty() && !config.server.auto_connect {
        warnings.push("Monitored items are ignored while auto_connect is disabled".to_string());
    }
    if config.monitor.iter().all(|item| item.slot.is_none()) && !config.monitor.is_empty() {
        warnings.push("No monitored item is mapped to a standard variable".to_string());
    }

    let simulated: Vec<&str> = config
        .simulation
        .nodes
        .iter()
        .map(|node| node.node_id.as_str())
        .collect();
    for item in &config.monitor {
        if !simulated.contains(&item.node_id.as_str()) {
            warnings.push(format!(
                "Monitored node '{}' is not in the simulated address space",
                item.node_id
            ));
        }
    }

    warnings
}
