// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Relay runtime orchestration.
//!
//! - Builds the simulator, the in-memory store, the event bus and the gateway
//! - Optionally connects and monitors the configured items
//! - Prints every broadcast as a JSON line on stdout
//! - Drives simulated value changes
//! - Disconnects on shutdown

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use relay_config::{load_config, ConfigError, RelayConfig, SimulatedNodeConfig};
use relay_opcua::client::SimulatedTransport;
use relay_opcua::{
    ConnectResponse, DataFanout, EventBus, MemoryPersistence, NodeId, RelayGateway,
};

use crate::error::{BinError, BinResult};
use crate::shutdown::{ShutdownCoordinator, ShutdownToken};

// =============================================================================
// RelayComponents
// =============================================================================

/// Everything the relay wires together.
pub struct RelayComponents {
    /// In-memory OPC UA server.
    pub simulator: Arc<SimulatedTransport>,
    /// Persistence sink.
    pub store: Arc<MemoryPersistence>,
    /// Broadcast sink.
    pub bus: Arc<EventBus>,
    /// Fan-out shared by the sinks.
    pub fanout: Arc<DataFanout>,
    /// Router-facing gateway.
    pub gateway: Arc<RelayGateway>,
}

impl RelayComponents {
    /// Builds the components described by `config`.
    pub fn build(config: &RelayConfig) -> BinResult<Self> {
        let simulator = Arc::new(SimulatedTransport::new());
        for (index, node) in config.simulation.nodes.iter().enumerate() {
            let node_id = node.validate(index)?;
            simulator.add_variable(node_id, &node.name, node.initial);
        }

        let store = Arc::new(MemoryPersistence::new(config.persistence.max_records));
        let bus = Arc::new(EventBus::new(config.broadcast.capacity));
        let fanout = Arc::new(DataFanout::with_settings(
            store.clone(),
            bus.clone(),
            config.fanout.clone(),
        ));
        let gateway = Arc::new(RelayGateway::new(
            simulator.clone(),
            config.client.clone(),
            fanout.clone(),
        ));

        Ok(Self {
            simulator,
            store,
            bus,
            fanout,
            gateway,
        })
    }

    /// Connects to the configured server and monitors the configured items.
    pub async fn connect_and_monitor(&self, config: &RelayConfig) -> BinResult<ConnectResponse> {
        let host = config
            .server
            .host
            .as_deref()
            .ok_or_else(|| ConfigError::missing_field("server.host"))?;

        let response = self
            .gateway
            .connect(host, &config.server.port.to_string())
            .await?;
        info!(
            token = %response.token,
            session_id = %response.session_id,
            root_folders = response.data.len(),
            "Connected"
        );

        for item in &config.monitor {
            let slot = item.slot.map(|slot| slot.to_string());
            self.gateway
                .monitor_variable(&item.node_id, slot.as_deref())
                .await
                .map_err(|e| BinError::from(e).with_context(format!("monitor {}", item.node_id)))?;
            debug!(node_id = %item.node_id, slot = ?item.slot, "Monitoring");
        }

        Ok(response)
    }
}

// =============================================================================
// RelayRuntime
// =============================================================================

/// The relay runtime.
pub struct RelayRuntime {
    config: Arc<RelayConfig>,
    shutdown: ShutdownCoordinator,
    skip_connect: bool,
}

impl RelayRuntime {
    /// Creates a new runtime.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: ShutdownCoordinator::new(),
            skip_connect: false,
        }
    }

    /// Skips the automatic connect.
    pub fn with_skip_connect(mut self, skip: bool) -> Self {
        self.skip_connect = skip;
        self
    }

    /// The shutdown coordinator driving this runtime.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// The effective configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Runs the relay until shutdown is signaled.
    pub async fn run(self) -> BinResult<()> {
        info!(
            relay = %self.config.relay.name,
            version = relay_opcua::VERSION,
            "Starting OPC UA relay"
        );

        let components = RelayComponents::build(&self.config)?;
        let mut tasks = vec![spawn_printer(components.bus.clone(), self.shutdown.token())];

        if self.config.simulation.enabled {
            tasks.push(spawn_simulation(
                components.simulator.clone(),
                self.config.simulation.nodes.clone(),
                self.config.simulation.tick_interval,
                self.shutdown.token(),
            ));
        }

        if self.config.server.auto_connect && !self.skip_connect {
            if let Err(e) = components.connect_and_monitor(&self.config).await {
                error!(error = %e, "Automatic connect failed");
            }
        } else {
            info!("Automatic connect skipped");
        }

        info!("Relay is ready");
        self.shutdown.wait_for_shutdown().await;
        self.shutdown.initiate_shutdown();

        info!("Shutdown initiated, cleaning up...");
        if let Err(e) = components.gateway.disconnect().await {
            warn!(error = %e, "Disconnect reported an error");
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let stats = components.fanout.stats();
        info!(
            notifications = stats.notifications,
            persisted = stats.persisted,
            broadcasts = stats.broadcasts,
            persistence_failures = stats.persistence_failures,
            broadcast_failures = stats.broadcast_failures,
            "Relay shutdown complete"
        );
        Ok(())
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Prints every broadcast message as one JSON line.
fn spawn_printer(bus: Arc<EventBus>, mut shutdown: ShutdownToken) -> JoinHandle<()> {
    let mut subscriber = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = subscriber.recv() => match message {
                    Ok(message) => match serde_json::to_string(&message) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "Failed to serialize event"),
                    },
                    Err(e) => {
                        debug!(error = %e, "Event bus closed");
                        break;
                    }
                },
            }
        }
    })
}

/// Pushes a new value for every simulated node each `interval`.
fn spawn_simulation(
    simulator: Arc<SimulatedTransport>,
    nodes: Vec<SimulatedNodeConfig>,
    interval: Duration,
    mut shutdown: ShutdownToken,
) -> JoinHandle<()> {
    let nodes: Vec<(NodeId, SimulatedNodeConfig)> = nodes
        .into_iter()
        .filter_map(|node| NodeId::resolve(&node.node_id).ok().map(|id| (id, node)))
        .collect();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tick += 1;
                    for (index, (node_id, node)) in nodes.iter().enumerate() {
                        simulator.set_value(node_id, simulated_value(node, index, tick));
                    }
                }
            }
        }
    })
}

/// Deterministic wave around `initial`, phase-shifted per node.
pub fn simulated_value(node: &SimulatedNodeConfig, index: usize, tick: u64) -> f64 {
    let phase = tick as f64 * 0.5 + index as f64;
    let value = node.initial + node.amplitude * phase.sin();
    (value * 100.0).round() / 100.0
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the relay runtime.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<RelayConfig>,
    allow_missing_config: bool,
    skip_connect: bool,
    host: Option<String>,
    port: Option<u16>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Falls back to defaults when the config file does not exist.
    pub fn allow_missing_config(mut self, allow: bool) -> Self {
        self.allow_missing_config = allow;
        self
    }

    /// Skips the automatic connect.
    pub fn skip_connect(mut self, skip: bool) -> Self {
        self.skip_connect = skip;
        self
    }

    /// Overrides `server.host`.
    pub fn host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    /// Overrides `server.port`.
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<RelayRuntime> {
        let mut config = match (self.config, self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) if self.allow_missing_config && !path.exists() => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                RelayConfig::default()
            }
            (None, Some(path)) => load_config(&path).map_err(|e| {
                BinError::from(e).with_context(format!("load config from {}", path.display()))
            })?,
            (None, None) => return Err(BinError::config("No configuration provided")),
        };

        if let Some(host) = self.host {
            config.server.host = Some(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        config.validate()?;

        Ok(RelayRuntime::new(config).with_skip_connect(self.skip_connect))
    }
}

// =============================================================================
// Tests
// =============================================================================
