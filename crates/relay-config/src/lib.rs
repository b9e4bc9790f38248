// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # relay-config
//!
//! Configuration management for the OPC UA relay.
//!
//! ## Features
//!
//! - **Schema Definition**: relay configuration with validation
//! - **Multi-Format Support**: YAML, TOML, and JSON configuration files
//! - **Environment Overrides**: `RELAY_*` variables override file values
//! - **Placeholders**: `${VAR}` and `${VAR:default}` inside files
//!
//! ## Quick Start
//!
//! ```no_run
//! use relay_config::loader::load_config;
//!
//! let config = load_config("relay.yaml").unwrap();
//!
//! println!("Relay: {}", config.relay.name);
//! println!("Monitored items: {}", config.monitor.len());
//! ```
//!
//! ## Configuration Schema
//!
//! - `relay` - Instance name
//! - `server` - Upstream server host, port and auto connect
//! - `client` - Handshake, timeouts, subscription and monitoring defaults
//! - `fanout` - Sink timeout and failure channel capacity
//! - `broadcast` - Event bus capacity
//! - `persistence` - In-memory store size
//! - `monitor` - Items monitored after connecting
//! - `simulation` - Built-in simulator
//! - `logging` - Log level and format
//!
//! ```yaml
//! server:
//!   host: "${OPCUA_HOST:10.0.0.5}"
//!   port: 4840
//!   auto_connect: true
//!
//! monitor:
//!   - node_id: "ns=2;i=5"
//!     slot: 0
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    BroadcastConfig, LogFormat, LogLevel, LoggingConfig, MonitorItemConfig, PersistenceConfig,
    RelayConfig, RelaySection, ServerConfig, SimulatedNodeConfig, SimulationConfig,
    DEFAULT_BROADCAST_CAPACITY, DEFAULT_MAX_RECORDS, DEFAULT_SERVER_PORT,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
