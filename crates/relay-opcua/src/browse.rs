// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One-shot node browsing.
//!
//! Lists the immediate children of a node over an established session. No
//! recursion and no pagination; each call is bounded by the request timeout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{SessionInfo, UaTransport};
use crate::error::{OpcUaErrorContext, OpcUaResult, TimeoutError};
use crate::types::{NodeClass, NodeId};

// =============================================================================
// Standard Reference Type Node IDs (OPC UA Part 5)
// =============================================================================

/// Standard OPC UA reference type node IDs.
pub mod reference_types {
    use crate::types::NodeId;

    /// Organizes - i=35.
    pub fn organizes() -> NodeId {
        NodeId::numeric(0, 35)
    }

    /// HasTypeDefinition - i=40.
    pub fn has_type_definition() -> NodeId {
        NodeId::numeric(0, 40)
    }

    /// HasProperty - i=46.
    pub fn has_property() -> NodeId {
        NodeId::numeric(0, 46)
    }

    /// HasComponent - i=47.
    pub fn has_component() -> NodeId {
        NodeId::numeric(0, 47)
    }
}

/// Standard type definitions used by the simulator and tests.
pub mod type_definitions {
    use crate::types::NodeId;

    /// FolderType - i=61.
    pub fn folder_type() -> NodeId {
        NodeId::numeric(0, 61)
    }

    /// BaseDataVariableType - i=63.
    pub fn base_data_variable_type() -> NodeId {
        NodeId::numeric(0, 63)
    }

    /// ServerType - i=2004.
    pub fn server_type() -> NodeId {
        NodeId::numeric(0, 2004)
    }
}

// =============================================================================
// QualifiedName
// =============================================================================

/// OPC UA qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// Name.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.namespace_index, self.name)
        }
    }
}

// =============================================================================
// NodeReference
// =============================================================================

/// One child reference returned by a browse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReference {
    /// Reference type (Organizes, HasComponent, ...).
    pub reference_type_id: NodeId,

    /// Forward or inverse reference.
    pub is_forward: bool,

    /// Target node.
    pub node_id: NodeId,

    /// Browse name.
    pub browse_name: QualifiedName,

    /// Display name.
    pub display_name: String,

    /// Node class.
    pub node_class: NodeClass,

    /// Type definition of the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_definition: Option<NodeId>,
}

impl NodeReference {
    /// Creates a forward `Organizes` reference to a folder.
    pub fn folder(node_id: NodeId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            reference_type_id: reference_types::organizes(),
            is_forward: true,
            browse_name: QualifiedName::new(node_id.namespace_index, name.clone()),
            node_id,
            display_name: name,
            node_class: NodeClass::Object,
            type_definition: Some(type_definitions::folder_type()),
        }
    }

    /// Creates a forward `HasComponent` reference to a variable.
    pub fn variable(node_id: NodeId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            reference_type_id: reference_types::has_component(),
            is_forward: true,
            browse_name: QualifiedName::new(node_id.namespace_index, name.clone()),
            node_id,
            display_name: name,
            node_class: NodeClass::Variable,
            type_definition: Some(type_definitions::base_data_variable_type()),
        }
    }

    /// Returns `true` if the target carries a value.
    pub fn has_value(&self) -> bool {
        self.node_class.has_value()
    }
}

impl fmt::Display for NodeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {})", self.display_name, self.node_class, self.node_id)
    }
}

// =============================================================================
// BrowseService
// =============================================================================

/// Browses nodes over an established session.
pub struct BrowseService {
    transport: Arc<dyn UaTransport>,
    request_timeout: Duration,
    browses: AtomicU64,
    failures: AtomicU64,
}

impl BrowseService {
    /// Creates a browse service.
    pub fn new(transport: Arc<dyn UaTransport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            request_timeout,
            browses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Lists the immediate children of `node_id`.
    ///
    /// Errors are per call and leave the connection state untouched.
    pub async fn browse(
        &self,
        session: &SessionInfo,
        node_id: &NodeId,
    ) -> OpcUaResult<Vec<NodeReference>> {
        self.browses.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.transport.browse(session, node_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TimeoutError::browse(self.request_timeout).into()),
        };

        match result {
            Ok(references) => {
                tracing::debug!(
                    node_id = %node_id,
                    children = references.len(),
                    "Browse completed"
                );
                Ok(references)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e).with_node(&node_id.to_string())
            }
        }
    }

    /// Returns `(browses, failures)`.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.browses.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

impl fmt::Debug for BrowseService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowseService")
            .field("transport", &self.transport.display_name())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{SimulatedTransport, UaTransport};
    use crate::client::SessionRequest;
    use crate::types::{ConnectionStrategy, Endpoint};

    async fn session_on(transport: &SimulatedTransport) -> SessionInfo {
        let endpoint = Endpoint::new("localhost", 4840).unwrap();
        transport
            .connect(&endpoint, &ConnectionStrategy::default())
            .await
            .unwrap();
        transport
            .create_session(&SessionRequest {
                application_name: "test".into(),
                session_name: "test".into(),
                timeout: Duration::from_secs(60),
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_qualified_name_display() {
        assert_eq!(QualifiedName::new(0, "Objects").to_string(), "Objects");
        assert_eq!(QualifiedName::new(2, "Line1").to_string(), "2:Line1");
    }

    #[test]
    fn test_node_reference_serialization() {
        let reference = NodeReference::folder(NodeId::OBJECTS_FOLDER, "Objects");
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["nodeId"], "i=85");
        assert_eq!(json["referenceTypeId"], "i=35");
        assert_eq!(json["isForward"], true);
        assert_eq!(json["browseName"]["name"], "Objects");
        assert_eq!(json["nodeClass"], "Object");
        assert_eq!(json["typeDefinition"], "i=61");
    }

    #[tokio::test]
    async fn test_browse_root_lists_standard_folders() {
        let transport = Arc::new(SimulatedTransport::new());
        let session = session_on(&transport).await;
        let service = BrowseService::new(transport.clone(), Duration::from_secs(1));

        let children = service.browse(&session, &NodeId::ROOT_FOLDER).await.unwrap();
        let names: Vec<_> = children.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, ["Objects", "Types", "Views"]);
        assert_eq!(service.counters(), (1, 0));
    }

    #[tokio::test]
    async fn test_browse_unknown_node_fails() {
        let transport = Arc::new(SimulatedTransport::new());
        let session = session_on(&transport).await;
        let service = BrowseService::new(transport.clone(), Duration::from_secs(1));

        let error = service
            .browse(&session, &NodeId::numeric(7, 999))
            .await
            .unwrap_err();
        assert_eq!(error.category(), "browse");
        assert_eq!(service.counters(), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_browse_times_out() {
        use crate::client::FaultPoint;

        let transport = Arc::new(SimulatedTransport::new());
        let session = session_on(&transport).await;
        transport.set_delay(FaultPoint::Browse, Duration::from_secs(30));
        let service = BrowseService::new(transport.clone(), Duration::from_secs(1));

        let error = service
            .browse(&session, &NodeId::ROOT_FOLDER)
            .await
            .unwrap_err();
        assert_eq!(error.category(), "timeout");
    }
}
