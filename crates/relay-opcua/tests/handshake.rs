// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection lifecycle integration tests.
//!
//! Drive the [`ConnectionManager`] against the in-memory simulator and check
//! handshake ordering, concurrency rules, cancellation and the subscription
//! event lifecycle.
//!
//! ```bash
//! cargo test -p relay-opcua --test handshake
//! ```

use std::sync::Arc;
use std::time::Duration;

use relay_opcua::client::{FaultPoint, SimulatedTransport, TransportCall};
use relay_opcua::{
    ClientSettings, ConnectionManager, ConnectionState, DataFanout, Endpoint, EventBus,
    HandshakeStep, MemoryPersistence, NodeId, OpcUaError, StateError, SubscriptionEvent,
};

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    sim: Arc<SimulatedTransport>,
    store: Arc<MemoryPersistence>,
    manager: Arc<ConnectionManager>,
}

fn harness() -> Harness {
    let sim = Arc::new(SimulatedTransport::new());
    sim.add_variable(NodeId::numeric(2, 5), "Temperature", 20.0);
    sim.add_variable(NodeId::numeric(2, 6), "Flow", 1.5);

    let store = Arc::new(MemoryPersistence::new(1000));
    let fanout = Arc::new(DataFanout::new(store.clone(), Arc::new(EventBus::new(64))));
    let manager = Arc::new(ConnectionManager::new(
        sim.clone(),
        ClientSettings::default(),
        fanout,
    ));
    Harness { sim, store, manager }
}

fn endpoint() -> Endpoint {
    Endpoint::parse("10.0.0.5", "4840").unwrap()
}

/// Polls `condition` until it holds or a second has passed.
async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

fn called(sim: &SimulatedTransport, call: &TransportCall) -> bool {
    sim.calls().contains(call)
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let h = harness();
    let mut states = h.manager.subscribe_state();

    let handle = h.manager.connect(endpoint()).await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::SubscriptionActive);
    assert_eq!(handle.endpoint.url(), "opc.tcp://10.0.0.5:4840");

    h.manager.disconnect().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_while_connecting_is_busy() {
    let h = harness();
    h.sim.set_delay(FaultPoint::CreateSession, Duration::from_millis(100));

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.connect(endpoint()).await });
    eventually(|| called(&h.sim, &TransportCall::CreateSession)).await;

    let error = h.manager.connect(endpoint()).await.unwrap_err();
    assert!(matches!(error, OpcUaError::State(StateError::Busy { .. })));

    // The first attempt is unaffected.
    let handle = first.await.unwrap().unwrap();
    assert_eq!(h.manager.state(), ConnectionState::SubscriptionActive);
    assert_eq!(h.manager.status().await.token, Some(handle.token));
}

#[tokio::test]
async fn test_connect_while_active_is_busy() {
    let h = harness();
    h.manager.connect(endpoint()).await.unwrap();
    h.sim.clear_calls();

    let error = h.manager.connect(endpoint()).await.unwrap_err();
    assert!(matches!(error, OpcUaError::State(StateError::Busy { .. })));
    assert!(h.sim.calls().is_empty());
}

#[tokio::test]
async fn test_browse_allowed_once_session_exists() {
    let h = harness();
    h.sim.hold_subscription_start(true);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect(endpoint()).await });
    eventually(|| called(&h.sim, &TransportCall::CreateSubscription)).await;
    assert_eq!(h.manager.state(), ConnectionState::SessionEstablished);

    let children = h.manager.browse(&NodeId::OBJECTS_FOLDER).await.unwrap();
    assert!(children.iter().any(|r| r.display_name == "Temperature"));

    // Monitoring still needs an active subscription.
    let error = h.manager.monitor(NodeId::numeric(2, 5), None).await.unwrap_err();
    assert!(error.is_precondition());

    h.sim.emit_event(SubscriptionEvent::Started);
    pending.await.unwrap().unwrap();
    assert_eq!(h.manager.state(), ConnectionState::SubscriptionActive);
}

#[tokio::test]
async fn test_keepalive_before_start_does_not_resolve() {
    let h = harness();
    h.sim.hold_subscription_start(true);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect(endpoint()).await });
    eventually(|| called(&h.sim, &TransportCall::CreateSubscription)).await;

    h.sim.emit_event(SubscriptionEvent::KeepAlive);
    eventually(|| h.manager.stats().keepalives == 1).await;
    assert!(!pending.is_finished());

    h.sim.emit_event(SubscriptionEvent::Started);
    assert!(pending.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_terminated_before_start_fails_connect() {
    let h = harness();
    h.sim.hold_subscription_start(true);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect(endpoint()).await });
    eventually(|| called(&h.sim, &TransportCall::CreateSubscription)).await;

    h.sim.emit_event(SubscriptionEvent::Terminated);
    let error = pending.await.unwrap().unwrap_err();
    assert_eq!(error.category(), "subscription");
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);

    // The retained session and link are released; the ended subscription is not.
    h.sim.clear_calls();
    h.manager.disconnect().await.unwrap();
    let calls = h.sim.calls();
    assert!(!calls
        .iter()
        .any(|call| matches!(call, TransportCall::DeleteSubscription(_))));
    assert_eq!(calls.last(), Some(&TransportCall::Disconnect));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_disconnect_during_session_step() {
    let h = harness();
    h.sim.set_delay(FaultPoint::CreateSession, Duration::from_secs(30));

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect(endpoint()).await });
    eventually(|| called(&h.sim, &TransportCall::CreateSession)).await;

    h.manager.disconnect().await.unwrap();

    let error = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        error,
        OpcUaError::State(StateError::DisconnectedDuringHandshake {
            step: HandshakeStep::CreateSession
        })
    ));
    assert!(error.to_string().contains("create_session"));
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_eq!(h.sim.session_count(), 0);
    assert_eq!(
        h.sim.calls(),
        vec![
            TransportCall::Connect("opc.tcp://10.0.0.5:4840".into()),
            TransportCall::CreateSession,
            TransportCall::Disconnect,
        ]
    );
    assert_eq!(h.manager.stats().cancelled, 1);
}

#[tokio::test]
async fn test_disconnect_while_waiting_for_start_tears_down_in_reverse() {
    let h = harness();
    h.sim.hold_subscription_start(true);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect(endpoint()).await });
    eventually(|| called(&h.sim, &TransportCall::CreateSubscription)).await;

    let status = h.manager.status().await;
    let session_id = status.session_id.clone().unwrap();
    let subscription_id = status.subscription_id.unwrap();
    h.sim.clear_calls();

    h.manager.disconnect().await.unwrap();
    assert_eq!(
        h.sim.calls(),
        vec![
            TransportCall::DeleteSubscription(subscription_id),
            TransportCall::CloseSession(session_id),
            TransportCall::Disconnect,
        ]
    );

    let error = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        error,
        OpcUaError::State(StateError::DisconnectedDuringHandshake {
            step: HandshakeStep::CreateSubscription
        })
    ));
    assert_eq!(h.sim.subscription_count(), 0);
}

#[tokio::test]
async fn test_reconnect_after_cancelled_handshake() {
    let h = harness();
    h.sim.set_delay(FaultPoint::Browse, Duration::from_secs(30));

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect(endpoint()).await });
    eventually(|| called(&h.sim, &TransportCall::Browse(NodeId::ROOT_FOLDER))).await;
    h.manager.disconnect().await.unwrap();
    assert!(pending.await.unwrap().is_err());

    h.sim.clear_delay(FaultPoint::Browse);
    h.manager.connect(endpoint()).await.unwrap();
    assert_eq!(h.manager.state(), ConnectionState::SubscriptionActive);
    assert_eq!(h.sim.session_count(), 1);
}

// =============================================================================
// Subscription lifecycle
// =============================================================================

#[tokio::test]
async fn test_terminated_invalidates_registry() {
    let h = harness();
    h.manager.connect(endpoint()).await.unwrap();
    let handle = h
        .manager
        .monitor(NodeId::numeric(2, 5), Some(0))
        .await
        .unwrap();

    h.sim.terminate_subscriptions();
    let manager = h.manager.clone();
    let mut terminated = false;
    for _ in 0..500 {
        if manager.status().await.subscription_terminated {
            terminated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(terminated);

    assert!(handle.ensure_live().unwrap_err().is_stale());
    assert!(handle.info().unwrap_err().is_stale());

    h.sim.clear_calls();
    let error = h
        .manager
        .monitor(NodeId::numeric(2, 6), None)
        .await
        .unwrap_err();
    assert!(error.is_stale());
    assert!(h.sim.calls().is_empty());

    // Disconnect still closes the session and link, and skips the
    // subscription the server already dropped.
    h.manager.disconnect().await.unwrap();
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    let calls = h.sim.calls();
    assert!(!calls
        .iter()
        .any(|call| matches!(call, TransportCall::DeleteSubscription(_))));
    assert!(calls
        .iter()
        .any(|call| matches!(call, TransportCall::CloseSession(_))));
    assert_eq!(calls.last(), Some(&TransportCall::Disconnect));
    assert_eq!(h.sim.session_count(), 0);
}

#[tokio::test]
async fn test_error_after_start_is_operational() {
    let h = harness();
    h.manager.connect(endpoint()).await.unwrap();
    h.manager
        .monitor(NodeId::numeric(2, 5), Some(0))
        .await
        .unwrap();

    h.sim.emit_event(SubscriptionEvent::Error("BadTimeout".into()));
    eventually(|| h.manager.stats().subscription_errors == 1).await;
    assert_eq!(h.manager.state(), ConnectionState::SubscriptionActive);

    h.sim.set_value(&NodeId::numeric(2, 5), 22.5);
    eventually(|| h.store.values("temp1") == vec![22.5]).await;

    // New items can still be added.
    h.manager.monitor(NodeId::numeric(2, 6), None).await.unwrap();
}

#[tokio::test]
async fn test_keepalive_after_start_is_counted() {
    let h = harness();
    h.manager.connect(endpoint()).await.unwrap();

    h.sim.emit_event(SubscriptionEvent::KeepAlive);
    h.sim.emit_event(SubscriptionEvent::KeepAlive);
    eventually(|| h.manager.stats().keepalives == 2).await;
    assert_eq!(h.manager.state(), ConnectionState::SubscriptionActive);
}

#[tokio::test]
async fn test_read_surfaces_server_status() {
    let h = harness();
    h.manager.connect(endpoint()).await.unwrap();

    let value = h.manager.read_value(&NodeId::numeric(2, 6)).await.unwrap();
    assert_eq!(value.value.as_f64(), Some(1.5));

    let error = h
        .manager
        .read_value(&NodeId::numeric(2, 999))
        .await
        .unwrap_err();
    assert_eq!(error.category(), "operation");
    assert_eq!(h.manager.state(), ConnectionState::SubscriptionActive);
}
