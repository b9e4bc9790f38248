// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Start the relay (default)
//! - `validate`: Validate configuration file
//! - `version`: Show version information
//! - `std-vars`: Print the standard variable table

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Configuration path used when `-c` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "relay.yaml";

// =============================================================================
// Main CLI Structure
// =============================================================================

/// ua-relay - OPC UA client relay
///
/// Connects to one OPC UA server, monitors configured nodes and fans every
/// value change out to persistence and broadcast sinks.
#[derive(Parser, Debug)]
#[command(
    name = "ua-relay",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "OPC UA client relay",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = DEFAULT_CONFIG_PATH,
        env = "RELAY_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, env = "RELAY_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "RELAY_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the relay
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration file without starting the relay.
    Validate(ValidateArgs),

    /// Show detailed version information
    Version,

    /// Print the standard variable table
    #[command(name = "std-vars")]
    StdVars(StdVarsArgs),
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Do not connect on startup even if the config asks for it
    #[arg(long)]
    pub skip_connect: bool,

    /// Server host; overrides `server.host`
    #[arg(long)]
    pub host: Option<String>,

    /// Server port; overrides `server.port`
    #[arg(long)]
    pub port: Option<u16>,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Strict mode: treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for the `std-vars` command.
#[derive(Args, Debug, Clone, Default)]
pub struct StdVarsArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<relay_config::LogFormat> for LogFormat {
    fn from(format: relay_config::LogFormat) -> Self {
        match format {
            relay_config::LogFormat::Text => LogFormat::Text,
            relay_config::LogFormat::Json => LogFormat::Json,
            relay_config::LogFormat::Compact => LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
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
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Check if verbose logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Returns `true` when `-c` still points at the default path.
    pub fn uses_default_config(&self) -> bool {
        self.config == PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Get the effective log level; flags beat `-l`, which beats `fallback`.
    pub fn effective_log_level<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or(fallback)
        }
    }

    /// Get the effective log format.
    pub fn effective_log_format(&self, fallback: relay_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| fallback.into())
    }
}

// =============================================================================
// Tests
// =============================================================================
