// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Router-facing facade.
//!
//! [`RelayGateway`] accepts the string arguments an HTTP router receives
//! (`url`, `port`, node names, slot numbers) and returns serializable
//! response types. Mapping results to HTTP status codes stays with the
//! router.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::browse::NodeReference;
use crate::client::{ConnectionManager, ConnectionStatus, DataValue, UaTransport};
use crate::error::{ConfigurationError, OpcUaResult};
use crate::fanout::DataFanout;
use crate::stdvars::{self, StandardVariable};
use crate::types::{ClientSettings, Endpoint, NodeId};

/// Status text returned by a successful disconnect.
pub const DISCONNECTED_STATUS: &str = "Disconnected from server";

// =============================================================================
// Responses
// =============================================================================

/// Result of `connect`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    /// Connection token.
    pub token: Uuid,
    /// Server session ID.
    pub session_id: String,
    /// Children of the root folder.
    pub data: Vec<NodeReference>,
    /// Nodes monitored on the new subscription.
    pub subscription: Vec<NodeId>,
    /// Standard variable table.
    pub std_vars: Vec<StandardVariable>,
}

/// Result of `monitor_variable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorResponse {
    /// Node ID as requested.
    pub id: String,
}

/// Result of `disconnect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectResponse {
    /// Status text.
    pub status: String,
}

// =============================================================================
// RelayGateway
// =============================================================================

/// Entry point for the router.
#[derive(Debug)]
pub struct RelayGateway {
    manager: ConnectionManager,
}

impl RelayGateway {
    /// Creates a gateway over `transport` feeding `fanout`.
    pub fn new(
        transport: Arc<dyn UaTransport>,
        settings: ClientSettings,
        fanout: Arc<DataFanout>,
    ) -> Self {
        Self::from_manager(ConnectionManager::new(transport, settings, fanout))
    }

    /// Wraps an existing manager.
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// The underlying connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Connects to `opc.tcp://{url}:{port}`.
    pub async fn connect(&self, url: &str, port: &str) -> OpcUaResult<ConnectResponse> {
        let endpoint = Endpoint::parse(url, port)?;
        let handle = self.manager.connect(endpoint).await?;

        Ok(ConnectResponse {
            token: handle.token,
            session_id: handle.session_id,
            data: handle.root_folders,
            subscription: handle
                .monitored_items
                .into_iter()
                .map(|item| item.node_id)
                .collect(),
            std_vars: stdvars::all().to_vec(),
        })
    }

    /// Browses a node given by NodeId string or folder alias.
    pub async fn browse(&self, name: &str) -> OpcUaResult<Vec<NodeReference>> {
        let node_id = NodeId::resolve(name)?;
        self.manager.browse(&node_id).await
    }

    /// Reads the current value of a node.
    pub async fn read_variable(&self, id: &str) -> OpcUaResult<DataValue> {
        let node_id = NodeId::resolve(id)?;
        self.manager.read_value(&node_id).await
    }

    /// Monitors a node, optionally mapped to a standard variable slot.
    pub async fn monitor_variable(
        &self,
        id: &str,
        std_var: Option<&str>,
    ) -> OpcUaResult<MonitorResponse> {
        let slot = std_var.map(parse_slot).transpose()?;
        let node_id = NodeId::resolve(id)?;
        self.manager.monitor(node_id, slot).await?;
        Ok(MonitorResponse { id: id.to_string() })
    }

    /// Disconnects; succeeds when nothing is connected.
    pub async fn disconnect(&self) -> OpcUaResult<DisconnectResponse> {
        self.manager.disconnect().await?;
        Ok(DisconnectResponse {
            status: DISCONNECTED_STATUS.to_string(),
        })
    }

    /// The standard variable table.
    pub fn std_vars(&self) -> &'static [StandardVariable] {
        stdvars::all()
    }

    /// Connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.manager.status().await
    }
}

fn parse_slot(raw: &str) -> OpcUaResult<usize> {
    let slot = raw.trim().parse::<usize>().map_err(|_| {
        ConfigurationError::invalid_setting("stdVar", format!("'{raw}' is not a slot number"))
    })?;
    stdvars::lookup(slot)?;
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SimulatedTransport;
    use crate::sinks::{EventBus, MemoryPersistence};

    fn gateway(sim: &Arc<SimulatedTransport>) -> RelayGateway {
        let fanout = Arc::new(DataFanout::new(
            Arc::new(MemoryPersistence::new(100)),
            Arc::new(EventBus::new(16)),
        ));
        RelayGateway::new(sim.clone(), ClientSettings::default(), fanout)
    }

    #[test]
    fn test_parse_slot() {
        assert_eq!(parse_slot("0").unwrap(), 0);
        assert_eq!(parse_slot(" 3 ").unwrap(), 3);
        assert!(parse_slot("4").is_err());
        assert!(parse_slot("temp1").is_err());
    }

    #[tokio::test]
    async fn test_connect_response_shape() {
        let sim = Arc::new(SimulatedTransport::new());
        let gateway = gateway(&sim);

        let response = gateway.connect("10.0.0.5", "4840").await.unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["token"].is_string());
        assert!(json["sessionId"].is_string());
        assert_eq!(json["data"].as_array().unwrap().len(), 3);
        assert_eq!(json["subscription"], serde_json::json!([]));
        assert_eq!(json["stdVars"][0], serde_json::json!({"id": 0, "name": "temp1"}));
        assert_eq!(json["stdVars"][3]["name"], "flow2");
    }

    #[tokio::test]
    async fn test_invalid_port_is_caller_error() {
        let sim = Arc::new(SimulatedTransport::new());
        let gateway = gateway(&sim);

        let error = gateway.connect("10.0.0.5", "not-a-port").await.unwrap_err();
        assert_eq!(error.category(), "configuration");
        assert!(sim.calls().is_empty());
    }

    #[tokio::test]
    async fn test_browse_by_alias() {
        let sim = Arc::new(SimulatedTransport::new());
        let gateway = gateway(&sim);
        gateway.connect("localhost", "4840").await.unwrap();

        let children = gateway.browse("ObjectsFolder").await.unwrap();
        assert!(children.iter().any(|r| r.display_name == "Server"));
    }

    #[tokio::test]
    async fn test_monitor_echoes_id_and_disconnect_status() {
        let sim = Arc::new(SimulatedTransport::new());
        sim.add_variable(NodeId::numeric(2, 5), "Temperature", 20.0);
        let gateway = gateway(&sim);
        gateway.connect("localhost", "4840").await.unwrap();

        let response = gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
        assert_eq!(response.id, "ns=2;i=5");

        let value = gateway.read_variable("ns=2;i=5").await.unwrap();
        assert_eq!(value.value.as_f64(), Some(20.0));

        let response = gateway.disconnect().await.unwrap();
        assert_eq!(response.status, DISCONNECTED_STATUS);
        assert_eq!(gateway.disconnect().await.unwrap().status, DISCONNECTED_STATUS);
    }
}
