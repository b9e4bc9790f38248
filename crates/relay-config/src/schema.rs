// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for the relay.
//!
//! # Schema Structure
//!
//! ```text
//! RelayConfig
//! ├── relay: RelaySection
//! ├── server: ServerConfig
//! ├── client: ClientSettings        (relay-opcua)
//! ├── fanout: FanoutSettings        (relay-opcua)
//! ├── broadcast: BroadcastConfig
//! ├── persistence: PersistenceConfig
//! ├── monitor: Vec<MonitorItemConfig>
//! ├── simulation: SimulationConfig
//! └── logging: LoggingConfig
//! ```

use crate::error::{ConfigError, ConfigResult};
use relay_opcua::types::humantime_serde;
use relay_opcua::{stdvars, ClientSettings, Endpoint, FanoutSettings, NodeId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default OPC UA server port.
pub const DEFAULT_SERVER_PORT: u16 = 4840;

/// Default event bus capacity.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Default number of records kept by the in-memory store.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Default simulator tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration structure for the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Instance metadata.
    #[serde(default)]
    pub relay: RelaySection,

    /// Upstream OPC UA server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client and handshake settings.
    #[serde(default)]
    pub client: ClientSettings,

    /// Fan-out settings.
    #[serde(default)]
    pub fanout: FanoutSettings,

    /// In-process broadcast bus.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// In-memory persistence store.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Items monitored after an automatic connect.
    #[serde(default)]
    pub monitor: Vec<MonitorItemConfig>,

    /// Built-in server simulator.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.relay.validate()?;
        self.server.validate()?;

        self.client
            .validate()
            .map_err(|e| ConfigError::validation("client", e.to_string()))?;
        self.fanout
            .validate()
            .map_err(|e| ConfigError::validation("fanout", e.to_string()))?;

        self.broadcast.validate()?;
        self.persistence.validate()?;

        let mut seen = std::collections::HashSet::new();
        for (index, item) in self.monitor.iter().enumerate() {
            let node_id = item.validate(index)?;
            if !seen.insert(node_id) {
                return Err(ConfigError::validation(
                    format!("monitor[{index}].node_id"),
                    format!("'{}' is listed twice", item.node_id),
                ));
            }
        }

        self.simulation.validate()?;
        self.logging.validate()?;

        Ok(())
    }

    /// Endpoint of the configured server, if a host is set.
    pub fn endpoint(&self) -> ConfigResult<Option<Endpoint>> {
        self.server.endpoint()
    }
}

// =============================================================================
// Relay Section
// =============================================================================

/// Instance identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Instance name, used in logs.
    #[serde(default = "default_relay_name")]
    pub name: String,
}

fn default_relay_name() -> String {
    "ua-relay".to_string()
}

impl RelaySection {
    /// Validates the relay section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("relay.name", "cannot be empty"));
        }
        if self.name.len() > 64 {
            return Err(ConfigError::validation(
                "relay.name",
                "cannot exceed 64 characters",
            ));
        }
        Ok(())
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            name: default_relay_name(),
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Upstream server location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host name or address.
    #[serde(default)]
    pub host: Option<String>,

    /// TCP port.
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Connect on startup.
    #[serde(default)]
    pub auto_connect: bool,
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

impl ServerConfig {
    /// Validates the server configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(ConfigError::validation("server.port", "must be non-zero"));
        }
        if self.auto_connect && self.host.is_none() {
            return Err(ConfigError::missing_field("server.host"));
        }
        self.endpoint()?;
        Ok(())
    }

    /// Builds the endpoint when a host is configured.
    pub fn endpoint(&self) -> ConfigResult<Option<Endpoint>> {
        self.host
            .as_deref()
            .map(|host| {
                Endpoint::new(host, self.port)
                    .map_err(|e| ConfigError::validation("server.host", e.to_string()))
            })
            .transpose()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_SERVER_PORT,
            auto_connect: false,
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Broadcast event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastConfig {
    /// Per-subscriber buffer size.
    #[serde(default = "default_broadcast_capacity")]
    pub capacity: usize,
}

fn default_broadcast_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}

impl BroadcastConfig {
    /// Validates the broadcast configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::validation(
                "broadcast.capacity",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

/// In-memory persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Records retained before the oldest is evicted.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_max_records() -> usize {
    DEFAULT_MAX_RECORDS
}

impl PersistenceConfig {
    /// Validates the persistence configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_records == 0 {
            return Err(ConfigError::validation(
                "persistence.max_records",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

// =============================================================================
// Monitored Items
// =============================================================================

/// A node to monitor after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorItemConfig {
    /// Node ID string or folder alias.
    pub node_id: String,

    /// Standard variable slot; unmapped items are broadcast only.
    #[serde(default)]
    pub slot: Option<usize>,
}

impl MonitorItemConfig {
    /// Validates the item and returns its parsed node ID.
    pub fn validate(&self, index: usize) -> ConfigResult<NodeId> {
        let node_id = NodeId::resolve(&self.node_id).map_err(|e| {
            ConfigError::validation(format!("monitor[{index}].node_id"), e.to_string())
        })?;
        if let Some(slot) = self.slot {
            stdvars::lookup(slot).map_err(|e| {
                ConfigError::validation(format!("monitor[{index}].slot"), e.to_string())
            })?;
        }
        Ok(node_id)
    }
}

// =============================================================================
// Simulation
// =============================================================================

/// Built-in simulator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Drive value changes.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between value changes.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Variables exposed by the simulator.
    #[serde(default = "default_simulated_nodes")]
    pub nodes: Vec<SimulatedNodeConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_tick_interval() -> Duration {
    DEFAULT_TICK_INTERVAL
}

fn default_simulated_nodes() -> Vec<SimulatedNodeConfig> {
    [
        ("ns=2;i=5", "Temperature1", 21.0, 0.3),
        ("ns=2;i=6", "Temperature2", 19.5, 0.3),
        ("ns=2;i=7", "Flow1", 3.2, 0.1),
        ("ns=2;i=8", "Flow2", 2.8, 0.1),
    ]
    .into_iter()
    .map(|(node_id, name, initial, amplitude)| SimulatedNodeConfig {
        node_id: node_id.to_string(),
        name: name.to_string(),
        initial,
        amplitude,
    })
    .collect()
}

impl SimulationConfig {
    /// Validates the simulation configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::validation(
                "simulation.tick_interval",
                "must be greater than 0",
            ));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            node.validate(index)?;
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: DEFAULT_TICK_INTERVAL,
            nodes: default_simulated_nodes(),
        }
    }
}

/// A variable in the simulated address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatedNodeConfig {
    /// Node ID string.
    pub node_id: String,

    /// Browse and display name.
    pub name: String,

    /// Starting value.
    #[serde(default)]
    pub initial: f64,

    /// Peak deviation from `initial` per cycle.
    #[serde(default)]
    pub amplitude: f64,
}

impl SimulatedNodeConfig {
    /// Validates the node and returns its parsed node ID.
    pub fn validate(&self, index: usize) -> ConfigResult<NodeId> {
        let field = |name: &str| format!("simulation.nodes[{index}].{name}");
        let node_id = NodeId::resolve(&self.node_id)
            .map_err(|e| ConfigError::validation(field("node_id"), e.to_string()))?;
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation(field("name"), "cannot be empty"));
        }
        if !self.initial.is_finite() || !self.amplitude.is_finite() {
            return Err(ConfigError::validation(field("initial"), "must be finite"));
        }
        Ok(node_id)
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name, accepting `warning` for `warn`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Compact single-line text.
    Compact,
    /// JSON lines.
    Json,
}

impl LogFormat {
    /// Returns the format name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }

    /// Parses a format name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}
