// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection manager and handshake state machine.
//!
//! # Handshake
//!
//! ```text
//!  connect(endpoint)
//!     │
//!     ├─ 1. transport_connect    Disconnected ─▶ Connecting
//!     ├─ 2. create_session       Connecting ─▶ SessionEstablished
//!     ├─ 3. browse_root
//!     └─ 4. create_subscription  SessionEstablished ─▶ SubscriptionActive
//!           (waits for `started`)
//! ```
//!
//! Steps run strictly in order outside the manager lock, so `disconnect` can
//! always take over. A disconnect during the handshake cancels the pending
//! step and tears down what exists in reverse order: registry, subscription,
//! session, transport.
//!
//! A failed step returns the manager to `Disconnected` but keeps the
//! resources already created. They are released by the next `disconnect` or
//! at the start of the next `connect`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::browse::{BrowseService, NodeReference};
use crate::error::{
    OpcUaError, OpcUaResult, StateError, SubscriptionError, TimeoutError,
};
use crate::fanout::{DataFanout, FanoutStatsSnapshot};
use crate::read::VariableReader;
use crate::stdvars;
use crate::types::{ClientSettings, Endpoint, NodeId};

use super::session::{
    ConnectionState, ConnectionStats, ConnectionStatsSnapshot, HandshakeStep, SessionInfo,
    SessionRequest, StateTracker,
};
use super::subscription::{MonitoredItemHandle, MonitoredItemInfo, SubscriptionRegistry};
use super::transport::{DataValue, SubscriptionEvent, SubscriptionId, UaTransport};

// =============================================================================
// ConnectionContext
// =============================================================================

/// State owned by one successful connection.
///
/// Created by `connect`, closed by `disconnect`. A closed context is never
/// reused.
pub struct ConnectionContext {
    token: Uuid,
    endpoint: Endpoint,
    session: SessionInfo,
    subscription_id: SubscriptionId,
    root_folders: Vec<NodeReference>,
    registry: SubscriptionRegistry,
    connected_at: DateTime<Utc>,
    terminated: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ConnectionContext {
    /// Connection token.
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Server endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Live session.
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Subscription created by the handshake.
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Children of the root folder at connect time.
    pub fn root_folders(&self) -> &[NodeReference] {
        &self.root_folders
    }

    /// Monitored item registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Connect completion time.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns `true` once the subscription reported `terminated`.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Returns `true` once disconnected.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("token", &self.token)
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session.session_id)
            .field("subscription_id", &self.subscription_id)
            .field("terminated", &self.is_terminated())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// ConnectionHandle / ConnectionStatus
// =============================================================================

/// Result of a successful `connect`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Token minted for this connection.
    pub token: Uuid,
    /// Server session ID.
    pub session_id: String,
    /// Server endpoint.
    pub endpoint: Endpoint,
    /// Children of the root folder.
    pub root_folders: Vec<NodeReference>,
    /// Monitored items; empty right after connect.
    pub monitored_items: Vec<MonitoredItemInfo>,
    context: Arc<ConnectionContext>,
}

impl ConnectionHandle {
    /// The connection context.
    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    /// Returns `true` while this connection is the live one.
    pub fn is_current(&self) -> bool {
        !self.context.is_closed()
    }
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Endpoint of the live or in-flight connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Token of the live connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Uuid>,
    /// Session ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Subscription ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
    /// Live monitored items.
    pub monitored_items: usize,
    /// Whether the subscription reported `terminated`.
    pub subscription_terminated: bool,
    /// Connect completion time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Connection counters.
    pub connection: ConnectionStatsSnapshot,
    /// Fan-out counters.
    pub fanout: FanoutStatsSnapshot,
}

// =============================================================================
// Internal slot state
// =============================================================================

/// Resources created by a handshake, in creation order.
#[derive(Debug, Default)]
struct Resources {
    transport_connected: bool,
    session: Option<SessionInfo>,
    subscription: Option<SubscriptionId>,
}

impl Resources {
    fn is_empty(&self) -> bool {
        !self.transport_connected && self.session.is_none() && self.subscription.is_none()
    }
}

#[derive(Debug, Default)]
struct Progress {
    resources: Resources,
    cancelled: bool,
}

#[derive(Debug)]
struct Attempt {
    endpoint: Endpoint,
    cancel: CancellationToken,
    progress: parking_lot::Mutex<Progress>,
}

#[derive(Debug)]
enum Slot {
    Idle { retained: Resources },
    Connecting(Arc<Attempt>),
    Active(Arc<ConnectionContext>),
}

struct HandshakeOutput {
    session: SessionInfo,
    root_folders: Vec<NodeReference>,
    subscription_id: SubscriptionId,
    events: mpsc::Receiver<SubscriptionEvent>,
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Owns the single server connection.
pub struct ConnectionManager {
    transport: Arc<dyn UaTransport>,
    settings: ClientSettings,
    fanout: Arc<DataFanout>,
    browser: BrowseService,
    reader: VariableReader,
    state: StateTracker,
    stats: Arc<ConnectionStats>,
    slot: Mutex<Slot>,
}

impl ConnectionManager {
    /// Creates a manager; nothing is connected yet.
    pub fn new(
        transport: Arc<dyn UaTransport>,
        settings: ClientSettings,
        fanout: Arc<DataFanout>,
    ) -> Self {
        Self {
            browser: BrowseService::new(transport.clone(), settings.request_timeout),
            reader: VariableReader::new(transport.clone(), settings.request_timeout),
            transport,
            settings,
            fanout,
            state: StateTracker::new(),
            stats: Arc::new(ConnectionStats::new()),
            slot: Mutex::new(Slot::Idle {
                retained: Resources::default(),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Client settings.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// The fan-out fed by monitored items.
    pub fn fanout(&self) -> &Arc<DataFanout> {
        &self.fanout
    }

    /// Connection counters.
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the live connection context, if any.
    pub async fn context(&self) -> Option<Arc<ConnectionContext>> {
        match &*self.slot.lock().await {
            Slot::Active(context) => Some(context.clone()),
            _ => None,
        }
    }

    // =========================================================================
    // connect
    // =========================================================================

    /// Runs the four-step handshake against `endpoint`.
    ///
    /// Fails with `Busy` while another attempt or connection exists.
    pub async fn connect(&self, endpoint: Endpoint) -> OpcUaResult<ConnectionHandle> {
        let attempt = {
            let mut slot = self.slot.lock().await;
            let retained = match &mut *slot {
                Slot::Idle { retained } => std::mem::take(retained),
                _ => return Err(StateError::busy(self.state.get()).into()),
            };
            // Released while the slot is held so no second attempt shares the link.
            if !retained.is_empty() {
                tracing::debug!("Releasing resources of a previous failed attempt");
                if let Err(e) = self.release(retained).await {
                    tracing::warn!(
                        error = %e,
                        "Previous attempt not released cleanly, connecting anyway"
                    );
                }
            }

            let attempt = Arc::new(Attempt {
                endpoint: endpoint.clone(),
                cancel: CancellationToken::new(),
                progress: parking_lot::Mutex::new(Progress::default()),
            });
            *slot = Slot::Connecting(attempt.clone());
            self.state.set(ConnectionState::Connecting);
            attempt
        };

        self.stats.record_attempt();
        tracing::info!(endpoint = %endpoint, "Connecting to OPC UA server");

        let result = self.handshake(&attempt).await;

        let mut slot = self.slot.lock().await;
        let current = matches!(&*slot, Slot::Connecting(a) if Arc::ptr_eq(a, &attempt));

        let output = match result {
            Ok(output) if current => output,
            Ok(_) => {
                // Disconnect took over after the last step completed.
                self.stats.record_cancelled();
                return Err(
                    StateError::disconnected_during_handshake(HandshakeStep::CreateSubscription)
                        .into(),
                );
            }
            Err(e) => {
                if current {
                    let retained = std::mem::take(&mut attempt.progress.lock().resources);
                    *slot = Slot::Idle { retained };
                    self.state.set(ConnectionState::Disconnected);
                }
                if matches!(e, OpcUaError::State(StateError::DisconnectedDuringHandshake { .. })) {
                    self.stats.record_cancelled();
                } else {
                    self.stats.record_failure();
                }
                e.log("connect");
                return Err(e);
            }
        };

        let context = Arc::new(ConnectionContext {
            token: Uuid::now_v7(),
            endpoint: endpoint.clone(),
            registry: SubscriptionRegistry::new(
                self.transport.clone(),
                output.subscription_id,
                self.settings.monitoring.clone(),
                self.fanout.clone(),
            ),
            session: output.session,
            subscription_id: output.subscription_id,
            root_folders: output.root_folders,
            connected_at: Utc::now(),
            terminated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(watch_subscription(
            output.events,
            context.clone(),
            self.stats.clone(),
        ));

        *slot = Slot::Active(context.clone());
        self.state.set(ConnectionState::SubscriptionActive);
        self.stats.record_success();

        tracing::info!(
            endpoint = %endpoint,
            session_id = %context.session.session_id,
            subscription_id = %context.subscription_id,
            token = %context.token,
            "Connected to OPC UA server"
        );

        Ok(ConnectionHandle {
            token: context.token,
            session_id: context.session.session_id.clone(),
            endpoint,
            root_folders: context.root_folders.clone(),
            monitored_items: context.registry.monitored_items(),
            context,
        })
    }

    async fn handshake(&self, attempt: &Attempt) -> OpcUaResult<HandshakeOutput> {
        let request_timeout = self.settings.request_timeout;

        // 1. Transport connect; retry is owned by the transport.
        self.step(
            attempt,
            HandshakeStep::TransportConnect,
            None,
            self.transport.connect(&attempt.endpoint, &self.settings.strategy),
        )
        .await?;
        self.record(attempt, HandshakeStep::TransportConnect, |progress| {
            progress.resources.transport_connected = true;
            None
        })
        .await?;

        // 2. Session.
        let request = SessionRequest {
            application_name: self.settings.application_name.clone(),
            session_name: self.settings.session_name.clone(),
            timeout: self.settings.session_timeout,
        };
        let session = self
            .step(
                attempt,
                HandshakeStep::CreateSession,
                Some(request_timeout),
                self.transport.create_session(&request),
            )
            .await?;
        self.record(attempt, HandshakeStep::CreateSession, |progress| {
            progress.resources.session = Some(session.clone());
            Some(ConnectionState::SessionEstablished)
        })
        .await?;

        // 3. Root browse.
        let root_folders = self
            .step(
                attempt,
                HandshakeStep::BrowseRoot,
                None,
                self.browser.browse(&session, &NodeId::ROOT_FOLDER),
            )
            .await?;

        // 4. Subscription, complete on `started`.
        let mut stream = self
            .step(
                attempt,
                HandshakeStep::CreateSubscription,
                Some(request_timeout),
                self.transport
                    .create_subscription(&session, &self.settings.subscription),
            )
            .await?;
        let subscription_id = stream.subscription_id;
        self.record(attempt, HandshakeStep::CreateSubscription, |progress| {
            progress.resources.subscription = Some(subscription_id);
            None
        })
        .await?;
        self.step(
            attempt,
            HandshakeStep::CreateSubscription,
            Some(request_timeout),
            self.await_started(attempt, &mut stream.events),
        )
        .await?;

        Ok(HandshakeOutput {
            session,
            root_folders,
            subscription_id,
            events: stream.events,
        })
    }

    /// Runs one step, racing it against cancellation and an optional bound.
    async fn step<T, F>(
        &self,
        attempt: &Attempt,
        step: HandshakeStep,
        bound: Option<Duration>,
        future: F,
    ) -> OpcUaResult<T>
    where
        F: Future<Output = OpcUaResult<T>>,
    {
        let bounded = async {
            match bound {
                Some(limit) => match tokio::time::timeout(limit, future).await {
                    Ok(result) => result,
                    Err(_) => Err(TimeoutError::request(limit).into()),
                },
                None => future.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = attempt.cancel.cancelled() => {
                Err(StateError::disconnected_during_handshake(step).into())
            }
            result = bounded => result,
        };

        match &result {
            Ok(_) => tracing::debug!(step = %step, "Handshake step completed"),
            Err(e) => tracing::debug!(step = %step, error = %e, "Handshake step failed"),
        }
        result
    }

    /// Stores a created resource unless the attempt was cancelled meanwhile.
    ///
    /// A cancelled attempt releases the resource itself.
    async fn record<F>(&self, attempt: &Attempt, step: HandshakeStep, update: F) -> OpcUaResult<()>
    where
        F: FnOnce(&mut Progress) -> Option<ConnectionState>,
    {
        let orphan = {
            let mut progress = attempt.progress.lock();
            if progress.cancelled {
                let mut orphan = Progress::default();
                update(&mut orphan);
                Some(orphan.resources)
            } else {
                if let Some(state) = update(&mut progress) {
                    self.state.set(state);
                }
                None
            }
        };

        match orphan {
            Some(resources) => {
                let _ = self.release(resources).await;
                Err(StateError::disconnected_during_handshake(step).into())
            }
            None => Ok(()),
        }
    }

    async fn await_started(
        &self,
        attempt: &Attempt,
        events: &mut mpsc::Receiver<SubscriptionEvent>,
    ) -> OpcUaResult<()> {
        loop {
            match events.recv().await {
                Some(SubscriptionEvent::Started) => return Ok(()),
                Some(SubscriptionEvent::KeepAlive) => {
                    self.stats.record_keepalive();
                    tracing::debug!("Subscription keep-alive before start");
                }
                Some(SubscriptionEvent::Error(message)) => {
                    return Err(SubscriptionError::creation_failed(message).into());
                }
                Some(SubscriptionEvent::Terminated) | None => {
                    // Gone on the server, so there is nothing to delete.
                    attempt.progress.lock().resources.subscription = None;
                    return Err(SubscriptionError::creation_failed(
                        "subscription terminated before start",
                    )
                    .into());
                }
            }
        }
    }

    // =========================================================================
    // disconnect
    // =========================================================================

    /// Tears down the connection or in-flight attempt.
    ///
    /// Succeeds as a no-op when nothing exists. Every release step is
    /// attempted; the first failure is returned after the manager is back in
    /// `Disconnected`.
    pub async fn disconnect(&self) -> OpcUaResult<()> {
        let mut slot = self.slot.lock().await;
        let previous = std::mem::replace(
            &mut *slot,
            Slot::Idle {
                retained: Resources::default(),
            },
        );

        let resources = match previous {
            Slot::Idle { retained } if retained.is_empty() => {
                tracing::debug!("Disconnect without connection");
                return Ok(());
            }
            Slot::Idle { retained } => retained,
            Slot::Connecting(attempt) => {
                tracing::info!(endpoint = %attempt.endpoint, "Disconnect during handshake");
                let resources = {
                    let mut progress = attempt.progress.lock();
                    progress.cancelled = true;
                    std::mem::take(&mut progress.resources)
                };
                attempt.cancel.cancel();
                resources
            }
            Slot::Active(context) => {
                context.close();
                context.registry.invalidate();
                // A terminated subscription no longer exists on the server.
                let subscription =
                    (!context.is_terminated()).then_some(context.subscription_id);
                Resources {
                    transport_connected: true,
                    session: Some(context.session.clone()),
                    subscription,
                }
            }
        };

        let result = self.release(resources).await;
        self.state.set(ConnectionState::Disconnected);
        self.stats.record_disconnect();
        tracing::info!("Disconnected from OPC UA server");
        result
    }

    /// Releases resources in reverse creation order.
    async fn release(&self, resources: Resources) -> OpcUaResult<()> {
        let mut first_error: Option<OpcUaError> = None;
        let mut keep = |result: OpcUaResult<()>, context: &str| {
            if let Err(e) = result {
                e.log(context);
                first_error.get_or_insert(e);
            }
        };

        if let Some(subscription_id) = resources.subscription {
            keep(
                self.transport.delete_subscription(subscription_id).await,
                "delete_subscription",
            );
        }
        if let Some(session) = &resources.session {
            keep(self.transport.close_session(session).await, "close_session");
        }
        if resources.transport_connected {
            keep(self.transport.disconnect().await, "disconnect");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Operations on the live connection
    // =========================================================================

    async fn session_for(&self, operation: &'static str) -> OpcUaResult<SessionInfo> {
        let session = match &*self.slot.lock().await {
            Slot::Active(context) => Some(context.session.clone()),
            Slot::Connecting(attempt) => attempt.progress.lock().resources.session.clone(),
            Slot::Idle { .. } => None,
        };
        session.ok_or_else(|| {
            OpcUaError::precondition(
                operation,
                ConnectionState::SessionEstablished,
                self.state.get(),
            )
        })
    }

    /// Lists the children of `node_id`.
    pub async fn browse(&self, node_id: &NodeId) -> OpcUaResult<Vec<NodeReference>> {
        let session = self.session_for("browse").await?;
        self.browser.browse(&session, node_id).await
    }

    /// Reads the current value of `node_id`.
    pub async fn read_value(&self, node_id: &NodeId) -> OpcUaResult<DataValue> {
        let session = self.session_for("read").await?;
        self.reader.read_value(&session, node_id).await
    }

    /// Monitors `node_id`, optionally mapped to a standard variable slot.
    pub async fn monitor(
        &self,
        node_id: NodeId,
        slot: Option<usize>,
    ) -> OpcUaResult<MonitoredItemHandle> {
        if let Some(slot) = slot {
            stdvars::lookup(slot)?;
        }
        let context = match &*self.slot.lock().await {
            Slot::Active(context) => context.clone(),
            _ => {
                return Err(OpcUaError::precondition(
                    "monitor",
                    ConnectionState::SubscriptionActive,
                    self.state.get(),
                ))
            }
        };
        context.registry.monitor(node_id, slot).await
    }

    /// Returns a status snapshot.
    pub async fn status(&self) -> ConnectionStatus {
        let slot = self.slot.lock().await;
        let mut status = ConnectionStatus {
            state: self.state.get(),
            endpoint: None,
            token: None,
            session_id: None,
            subscription_id: None,
            monitored_items: 0,
            subscription_terminated: false,
            connected_at: None,
            connection: self.stats.snapshot(),
            fanout: self.fanout.stats(),
        };

        match &*slot {
            Slot::Idle { .. } => {}
            Slot::Connecting(attempt) => {
                status.endpoint = Some(attempt.endpoint.url());
                let progress = attempt.progress.lock();
                status.session_id = progress
                    .resources
                    .session
                    .as_ref()
                    .map(|s| s.session_id.clone());
                status.subscription_id = progress.resources.subscription;
            }
            Slot::Active(context) => {
                status.endpoint = Some(context.endpoint.url());
                status.token = Some(context.token);
                status.session_id = Some(context.session.session_id.clone());
                status.subscription_id = Some(context.subscription_id);
                status.monitored_items = context.registry.len();
                status.subscription_terminated = context.is_terminated();
                status.connected_at = Some(context.connected_at);
            }
        }
        status
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.transport.display_name())
            .field("state", &self.state.get())
            .finish()
    }
}

/// Interprets subscription events after `started`.
async fn watch_subscription(
    mut events: mpsc::Receiver<SubscriptionEvent>,
    context: Arc<ConnectionContext>,
    stats: Arc<ConnectionStats>,
) {
    let subscription_id = context.subscription_id;
    loop {
        let event = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Some(SubscriptionEvent::KeepAlive) => {
                stats.record_keepalive();
                tracing::trace!(subscription_id = %subscription_id, "Subscription keep-alive");
            }
            Some(SubscriptionEvent::Error(message)) => {
                stats.record_subscription_error();
                OpcUaError::from(SubscriptionError::reported(subscription_id.0, message))
                    .log("subscription");
            }
            Some(SubscriptionEvent::Started) => {
                tracing::debug!(subscription_id = %subscription_id, "Duplicate started event ignored");
            }
            Some(SubscriptionEvent::Terminated) | None => {
                context.terminated.store(true, Ordering::SeqCst);
                let dropped = context.registry.invalidate();
                tracing::warn!(
                    subscription_id = %subscription_id,
                    dropped,
                    "Subscription terminated"
                );
                return;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
