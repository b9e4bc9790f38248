// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory OPC UA server.
//!
//! [`SimulatedTransport`] implements [`UaTransport`] against a small address
//! space held in memory. It backs the test suites and the binary's demo mode,
//! and supports one-shot faults, per-call delays and a call log for ordering
//! assertions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::browse::{type_definitions, NodeReference};
use crate::error::{
    BrowseError, ConnectionError, OpcUaResult, OperationError, SessionError, SubscriptionError,
};
use crate::types::{ConnectionStrategy, Endpoint, NodeId, SubscriptionSettings};

use super::session::{SessionInfo, SessionRequest};
use super::transport::{
    DataValue, MonitoredItemId, MonitoredItemRequest, MonitoredItemStream, StatusCode,
    SubscriptionEvent, SubscriptionId, SubscriptionStream, TransportState, UaTransport,
    ValueSender, Variant, value_queue,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Fault injection
// =============================================================================

/// Transport call points that accept injected faults and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `connect`.
    Connect,
    /// `disconnect`.
    Disconnect,
    /// `create_session`.
    CreateSession,
    /// `close_session`.
    CloseSession,
    /// `browse`.
    Browse,
    /// `read_value`.
    Read,
    /// `create_subscription`.
    CreateSubscription,
    /// The `started` event; a fault sends `error` instead.
    SubscriptionStart,
    /// `delete_subscription`.
    DeleteSubscription,
    /// `create_monitored_item`.
    CreateMonitoredItem,
}

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `connect` to the given URL.
    Connect(String),
    /// `disconnect`.
    Disconnect,
    /// `create_session`.
    CreateSession,
    /// `close_session` for the given session ID.
    CloseSession(String),
    /// `browse` of a node.
    Browse(NodeId),
    /// `read_value` of a node.
    Read(NodeId),
    /// `create_subscription`.
    CreateSubscription,
    /// `delete_subscription`.
    DeleteSubscription(SubscriptionId),
    /// `create_monitored_item` for a node.
    CreateMonitoredItem(NodeId),
}

// =============================================================================
// Address space
// =============================================================================

#[derive(Debug, Clone)]
struct SimNode {
    reference: NodeReference,
    children: Vec<NodeId>,
    value: Option<DataValue>,
}

#[derive(Debug)]
struct SimItem {
    subscription_id: SubscriptionId,
    node_id: NodeId,
    queue: ValueSender,
}

#[derive(Debug, Default)]
struct SimState {
    transport_state: TransportState,
    nodes: HashMap<NodeId, SimNode>,
    sessions: HashSet<String>,
    subscriptions: HashMap<SubscriptionId, mpsc::Sender<SubscriptionEvent>>,
    items: HashMap<MonitoredItemId, SimItem>,
    faults: HashSet<FaultPoint>,
    delays: HashMap<FaultPoint, Duration>,
    hold_start: bool,
    calls: Vec<TransportCall>,
    next_session: u32,
    next_subscription: u32,
    next_item: u32,
    dropped_values: u64,
}

impl SimState {
    fn take_fault(&mut self, point: FaultPoint) -> bool {
        self.faults.remove(&point)
    }

    fn insert_node(&mut self, parent: &NodeId, reference: NodeReference, value: Option<DataValue>) {
        let node_id = reference.node_id.clone();
        if let Some(parent) = self.nodes.get_mut(parent) {
            if !parent.children.contains(&node_id) {
                parent.children.push(node_id.clone());
            }
        }
        self.nodes.insert(
            node_id,
            SimNode {
                reference,
                children: Vec::new(),
                value,
            },
        );
    }
}

// =============================================================================
// SimulatedTransport
// =============================================================================

/// In-memory transport with a standard root layout.
///
/// The address space starts with `Root -> {Objects, Types, Views}` and
/// `Objects -> Server`. Variables added with [`add_variable`] live under
/// `Objects`.
///
/// [`add_variable`]: SimulatedTransport::add_variable
pub struct SimulatedTransport {
    state: Mutex<SimState>,
}

impl SimulatedTransport {
    /// Creates a simulator with the standard folders.
    pub fn new() -> Self {
        let mut state = SimState::default();

        state.nodes.insert(
            NodeId::ROOT_FOLDER,
            SimNode {
                reference: NodeReference::folder(NodeId::ROOT_FOLDER, "Root"),
                children: Vec::new(),
                value: None,
            },
        );
        state.insert_node(
            &NodeId::ROOT_FOLDER,
            NodeReference::folder(NodeId::OBJECTS_FOLDER, "Objects"),
            None,
        );
        state.insert_node(
            &NodeId::ROOT_FOLDER,
            NodeReference::folder(NodeId::TYPES_FOLDER, "Types"),
            None,
        );
        state.insert_node(
            &NodeId::ROOT_FOLDER,
            NodeReference::folder(NodeId::VIEWS_FOLDER, "Views"),
            None,
        );
        let mut server = NodeReference::folder(NodeId::SERVER, "Server");
        server.reference_type_id = crate::browse::reference_types::has_component();
        server.type_definition = Some(type_definitions::server_type());
        state.insert_node(&NodeId::OBJECTS_FOLDER, server, None);

        Self {
            state: Mutex::new(state),
        }
    }

    // =========================================================================
    // Address space setup
    // =========================================================================

    /// Adds a folder under `parent`.
    pub fn add_folder(&self, parent: &NodeId, node_id: NodeId, name: &str) {
        self.state
            .lock()
            .insert_node(parent, NodeReference::folder(node_id, name), None);
    }

    /// Adds a variable under `Objects`.
    pub fn add_variable(&self, node_id: NodeId, name: &str, initial: impl Into<Variant>) {
        self.add_variable_under(&NodeId::OBJECTS_FOLDER, node_id, name, initial);
    }

    /// Adds a variable under `parent`.
    pub fn add_variable_under(
        &self,
        parent: &NodeId,
        node_id: NodeId,
        name: &str,
        initial: impl Into<Variant>,
    ) {
        self.state.lock().insert_node(
            parent,
            NodeReference::variable(node_id, name),
            Some(DataValue::new(initial)),
        );
    }

    /// Lists all variable node IDs.
    pub fn variables(&self) -> Vec<NodeId> {
        let state = self.state.lock();
        let mut ids: Vec<_> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.value.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    /// Returns the stored value of a variable.
    pub fn value(&self, node_id: &NodeId) -> Option<DataValue> {
        self.state
            .lock()
            .nodes
            .get(node_id)
            .and_then(|n| n.value.clone())
    }

    /// Updates a variable and notifies every monitored item on it, in call
    /// order.
    pub fn set_value(&self, node_id: &NodeId, value: impl Into<Variant>) {
        self.publish(node_id, DataValue::new(value));
    }

    /// Like [`set_value`](Self::set_value) with an explicit data value.
    pub fn publish(&self, node_id: &NodeId, value: DataValue) {
        let mut state = self.state.lock();
        let Some(node) = state.nodes.get_mut(node_id) else {
            tracing::warn!(node_id = %node_id, "Simulator: value for unknown node ignored");
            return;
        };
        node.value = Some(value.clone());

        let mut dropped = 0;
        for item in state.items.values().filter(|item| &item.node_id == node_id) {
            if item.queue.push(value.clone()) {
                dropped += 1;
            }
        }
        state.dropped_values += dropped;
    }

    // =========================================================================
    // Subscription control
    // =========================================================================

    /// When `true`, new subscriptions do not report `started` on their own.
    pub fn hold_subscription_start(&self, hold: bool) {
        self.state.lock().hold_start = hold;
    }

    /// Sends an event to every live subscription.
    pub fn emit_event(&self, event: SubscriptionEvent) {
        let state = self.state.lock();
        for sender in state.subscriptions.values() {
            let _ = sender.try_send(event.clone());
        }
    }

    /// Reports `terminated` and drops every subscription and monitored item.
    pub fn terminate_subscriptions(&self) {
        let mut state = self.state.lock();
        for (_, sender) in state.subscriptions.drain() {
            let _ = sender.try_send(SubscriptionEvent::Terminated);
        }
        state.items.clear();
    }

    /// Simulates loss of the transport link.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.transport_state = TransportState::Failed;
        state.sessions.clear();
        state.subscriptions.clear();
        state.items.clear();
    }

    // =========================================================================
    // Fault injection and inspection
    // =========================================================================

    /// Makes the next call at `point` fail.
    pub fn fail_next(&self, point: FaultPoint) {
        self.state.lock().faults.insert(point);
    }

    /// Delays every call at `point`.
    pub fn set_delay(&self, point: FaultPoint, delay: Duration) {
        self.state.lock().delays.insert(point, delay);
    }

    /// Removes the delay at `point`.
    pub fn clear_delay(&self, point: FaultPoint) {
        self.state.lock().delays.remove(&point);
    }

    /// Returns the call log.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of live monitored items.
    pub fn monitored_item_count(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Values discarded because a monitored item queue was full.
    pub fn dropped_values(&self) -> u64 {
        self.state.lock().dropped_values
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    async fn enter(&self, point: FaultPoint, call: TransportCall) -> bool {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.delays.get(&point).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().take_fault(point)
    }

    fn require_session(state: &SimState, session: &SessionInfo) -> OpcUaResult<()> {
        if !state.transport_state.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        if !state.sessions.contains(&session.session_id) {
            return Err(SessionError::expired(Some(session.session_id.clone())).into());
        }
        Ok(())
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedTransport")
            .field("state", &state.transport_state)
            .field("nodes", &state.nodes.len())
            .field("sessions", &state.sessions.len())
            .field("subscriptions", &state.subscriptions.len())
            .finish()
    }
}

#[async_trait]
impl UaTransport for SimulatedTransport {
    async fn connect(&self, endpoint: &Endpoint, strategy: &ConnectionStrategy) -> OpcUaResult<()> {
        let url = endpoint.url();
        let attempts = strategy.attempts();

        for attempt in 0..attempts {
            self.state.lock().transport_state = TransportState::Connecting;
            if !self
                .enter(FaultPoint::Connect, TransportCall::Connect(url.clone()))
                .await
            {
                self.state.lock().transport_state = TransportState::Connected;
                tracing::debug!(endpoint = %url, attempt, "Simulator: connected");
                return Ok(());
            }

            self.state.lock().transport_state = TransportState::Failed;
            if attempt + 1 < attempts {
                let delay = strategy.delay_for_attempt(attempt);
                tracing::debug!(endpoint = %url, attempt, ?delay, "Simulator: retrying connect");
                tokio::time::sleep(delay).await;
            }
        }

        Err(ConnectionError::refused(url).into())
    }

    async fn disconnect(&self) -> OpcUaResult<()> {
        let failed = self
            .enter(FaultPoint::Disconnect, TransportCall::Disconnect)
            .await;
        let mut state = self.state.lock();
        state.transport_state = TransportState::Disconnected;
        state.sessions.clear();
        state.subscriptions.clear();
        state.items.clear();
        if failed {
            return Err(ConnectionError::closed(Some("simulated disconnect fault".into())).into());
        }
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state.lock().transport_state
    }

    async fn create_session(&self, request: &SessionRequest) -> OpcUaResult<SessionInfo> {
        if self
            .enter(FaultPoint::CreateSession, TransportCall::CreateSession)
            .await
        {
            return Err(SessionError::creation_failed("simulated session fault").into());
        }

        let mut state = self.state.lock();
        if !state.transport_state.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        state.next_session += 1;
        let session_id = format!("ns=1;i={}", 1000 + state.next_session);
        state.sessions.insert(session_id.clone());

        Ok(SessionInfo::new(
            session_id,
            request.session_name.clone(),
            "opc.tcp://simulator",
            request.timeout,
        ))
    }

    async fn close_session(&self, session: &SessionInfo) -> OpcUaResult<()> {
        let failed = self
            .enter(
                FaultPoint::CloseSession,
                TransportCall::CloseSession(session.session_id.clone()),
            )
            .await;
        self.state.lock().sessions.remove(&session.session_id);
        if failed {
            return Err(
                SessionError::close_failed(&session.session_id, "simulated close fault").into(),
            );
        }
        Ok(())
    }

    async fn browse(
        &self,
        session: &SessionInfo,
        node_id: &NodeId,
    ) -> OpcUaResult<Vec<NodeReference>> {
        if self
            .enter(FaultPoint::Browse, TransportCall::Browse(node_id.clone()))
            .await
        {
            return Err(BrowseError::browse_failed(node_id.to_string(), "simulated browse fault").into());
        }

        let state = self.state.lock();
        Self::require_session(&state, session)?;
        let node = state
            .nodes
            .get(node_id)
            .ok_or_else(|| BrowseError::node_not_found(node_id.to_string()))?;

        Ok(node
            .children
            .iter()
            .filter_map(|child| state.nodes.get(child))
            .map(|child| child.reference.clone())
            .collect())
    }

    async fn read_value(&self, session: &SessionInfo, node_id: &NodeId) -> OpcUaResult<DataValue> {
        if self
            .enter(FaultPoint::Read, TransportCall::Read(node_id.clone()))
            .await
        {
            return Err(OperationError::read_failed(node_id.to_string(), "simulated read fault").into());
        }

        let state = self.state.lock();
        Self::require_session(&state, session)?;
        Ok(match state.nodes.get(node_id) {
            Some(SimNode { value: Some(value), .. }) => value.clone(),
            Some(_) => DataValue::with_status(StatusCode::BAD_NOT_READABLE),
            None => DataValue::with_status(StatusCode::BAD_NODE_ID_UNKNOWN),
        })
    }

    async fn create_subscription(
        &self,
        session: &SessionInfo,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionStream> {
        if self
            .enter(FaultPoint::CreateSubscription, TransportCall::CreateSubscription)
            .await
        {
            return Err(SubscriptionError::creation_failed("simulated subscription fault").into());
        }

        let start_delay = self.state.lock().delays.get(&FaultPoint::SubscriptionStart).copied();

        let mut state = self.state.lock();
        Self::require_session(&state, session)?;
        state.next_subscription += 1;
        let subscription_id = SubscriptionId(state.next_subscription);
        let (sender, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        if state.take_fault(FaultPoint::SubscriptionStart) {
            let _ = sender.try_send(SubscriptionEvent::Error("BadTooManySubscriptions".into()));
        } else if !state.hold_start {
            match start_delay {
                Some(delay) => {
                    let delayed = sender.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = delayed.send(SubscriptionEvent::Started).await;
                    });
                }
                None => {
                    let _ = sender.try_send(SubscriptionEvent::Started);
                }
            }
        }

        tracing::debug!(
            subscription_id = %subscription_id,
            publishing_interval = ?settings.publishing_interval,
            "Simulator: subscription created"
        );
        state.subscriptions.insert(subscription_id, sender);
        Ok(SubscriptionStream {
            subscription_id,
            events,
        })
    }

    async fn delete_subscription(&self, subscription_id: SubscriptionId) -> OpcUaResult<()> {
        let failed = self
            .enter(
                FaultPoint::DeleteSubscription,
                TransportCall::DeleteSubscription(subscription_id),
            )
            .await;
        let mut state = self.state.lock();
        let known = state.subscriptions.remove(&subscription_id).is_some();
        state
            .items
            .retain(|_, item| item.subscription_id != subscription_id);
        if failed {
            return Err(SubscriptionError::reported(subscription_id.0, "simulated delete fault").into());
        }
        if !known {
            return Err(
                SubscriptionError::reported(subscription_id.0, "BadSubscriptionIdInvalid").into(),
            );
        }
        Ok(())
    }

    async fn create_monitored_item(
        &self,
        subscription_id: SubscriptionId,
        request: &MonitoredItemRequest,
    ) -> OpcUaResult<MonitoredItemStream> {
        let node_id = &request.node_id;
        if self
            .enter(
                FaultPoint::CreateMonitoredItem,
                TransportCall::CreateMonitoredItem(node_id.clone()),
            )
            .await
        {
            return Err(SubscriptionError::monitored_item_failed(
                node_id.to_string(),
                "simulated monitored item fault",
            )
            .into());
        }

        let mut state = self.state.lock();
        if !state.subscriptions.contains_key(&subscription_id) {
            return Err(SubscriptionError::monitored_item_failed(
                node_id.to_string(),
                "BadSubscriptionIdInvalid",
            )
            .into());
        }
        match state.nodes.get(node_id) {
            Some(node) if node.value.is_some() => {}
            Some(_) => {
                return Err(SubscriptionError::monitored_item_failed(
                    node_id.to_string(),
                    "BadAttributeIdInvalid",
                )
                .into())
            }
            None => {
                return Err(SubscriptionError::monitored_item_failed(
                    node_id.to_string(),
                    "BadNodeIdUnknown",
                )
                .into())
            }
        }

        state.next_item += 1;
        let item_id = MonitoredItemId(state.next_item);
        let settings = &request.settings;
        let (queue, values) = value_queue(settings.queue_size as usize, settings.discard_oldest);
        state.items.insert(
            item_id,
            SimItem {
                subscription_id,
                node_id: node_id.clone(),
                queue,
            },
        );

        Ok(MonitoredItemStream { item_id, values })
    }

    fn display_name(&self) -> String {
        "simulator".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
