// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! End-to-end value pipeline tests.
//!
//! Simulated server -> monitored item -> fan-out -> persistence and broadcast
//! sinks, driven through the [`RelayGateway`] the router uses.
//!
//! ```bash
//! cargo test -p relay-opcua --test fanout_pipeline
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use relay_opcua::client::SimulatedTransport;
use relay_opcua::{
    BroadcastSink, BusMessage, ClientSettings, DataFanout, EventBus, EventSubscriber,
    FanoutSettings, MemoryPersistence, MonitoredItemSettings, NodeId, PersistenceSink,
    RelayGateway, SinkError, SinkKind, VariableValueEvent, VARIABLE_VALUES_TOPIC,
};

// =============================================================================
// Test sinks
// =============================================================================

/// Persistence that always fails.
struct OfflinePersistence {
    attempts: AtomicUsize,
}

#[async_trait]
impl PersistenceSink for OfflinePersistence {
    async fn write(&self, _variable_name: &str, _value: f64) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::unavailable("connection refused"))
    }

    fn name(&self) -> &str {
        "offline-db"
    }
}

/// Persistence that stalls for one variable and stores the rest.
struct StallingPersistence {
    stalled: &'static str,
    inner: MemoryPersistence,
}

#[async_trait]
impl PersistenceSink for StallingPersistence {
    async fn write(&self, variable_name: &str, value: f64) -> Result<(), SinkError> {
        if variable_name == self.stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.write(variable_name, value).await
    }
}

/// Persistence that holds every write until the gate opens.
struct GatedPersistence {
    open: watch::Receiver<bool>,
    entered: AtomicUsize,
    inner: MemoryPersistence,
}

#[async_trait]
impl PersistenceSink for GatedPersistence {
    async fn write(&self, variable_name: &str, value: f64) -> Result<(), SinkError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.clone();
        let _ = open.wait_for(|open| *open).await;
        self.inner.write(variable_name, value).await
    }
}

/// Broadcast that always fails.
struct BrokenBroadcast;

#[async_trait]
impl BroadcastSink for BrokenBroadcast {
    async fn publish(&self, _topic: &str, _payload: &VariableValueEvent) -> Result<(), SinkError> {
        Err(SinkError::rejected("socket closed"))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn temperature() -> NodeId {
    NodeId::numeric(2, 5)
}

fn simulator() -> Arc<SimulatedTransport> {
    let sim = Arc::new(SimulatedTransport::new());
    sim.add_variable(temperature(), "Temperature", 20.0);
    sim.add_variable(NodeId::numeric(2, 6), "Flow", 0.0);
    sim.add_variable(NodeId::numeric(2, 7), "Mode", "auto");
    sim
}

fn gateway_with(
    sim: &Arc<SimulatedTransport>,
    persistence: Arc<dyn PersistenceSink>,
    broadcast: Arc<dyn BroadcastSink>,
    settings: FanoutSettings,
) -> (RelayGateway, Arc<DataFanout>) {
    gateway_with_queue(sim, persistence, broadcast, settings, MonitoredItemSettings::default())
}

fn gateway_with_queue(
    sim: &Arc<SimulatedTransport>,
    persistence: Arc<dyn PersistenceSink>,
    broadcast: Arc<dyn BroadcastSink>,
    settings: FanoutSettings,
    monitoring: MonitoredItemSettings,
) -> (RelayGateway, Arc<DataFanout>) {
    let fanout = Arc::new(DataFanout::with_settings(persistence, broadcast, settings));
    let client = ClientSettings {
        monitoring,
        ..ClientSettings::default()
    };
    let gateway = RelayGateway::new(sim.clone(), client, fanout.clone());
    (gateway, fanout)
}

fn queue_of(queue_size: u32) -> MonitoredItemSettings {
    MonitoredItemSettings {
        queue_size,
        ..MonitoredItemSettings::default()
    }
}

async fn next_event(subscriber: &mut EventSubscriber) -> BusMessage {
    tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
        .await
        .expect("no event within a second")
        .expect("event bus closed")
}

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

// =============================================================================
// Scenario
// =============================================================================

#[tokio::test]
async fn test_mapped_values_reach_both_sinks_in_order() {
    let sim = simulator();
    let store = Arc::new(MemoryPersistence::new(1000));
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let (gateway, fanout) = gateway_with(&sim, store.clone(), bus.clone(), FanoutSettings::default());

    gateway.connect("10.0.0.5", "4840").await.unwrap();
    let response = gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
    assert_eq!(response.id, "ns=2;i=5");

    for value in [21.0, 21.3, 21.1] {
        sim.set_value(&temperature(), value);
    }

    for expected in [21.0, 21.3, 21.1] {
        let message = next_event(&mut events).await;
        assert_eq!(message.topic, VARIABLE_VALUES_TOPIC);
        assert_eq!(message.payload.id, temperature());
        assert_eq!(message.payload.data.value.as_f64(), Some(expected));
    }

    eventually(|| store.len() == 3).await;
    assert_eq!(
        store.entries(),
        vec![
            ("temp1".to_string(), 21.0),
            ("temp1".to_string(), 21.3),
            ("temp1".to_string(), 21.1),
        ]
    );

    let stats = fanout.stats();
    assert_eq!(stats.notifications, 3);
    assert_eq!(stats.persisted, 3);
    assert_eq!(stats.broadcasts, 3);
}

#[tokio::test]
async fn test_broadcast_payload_shape() {
    let sim = simulator();
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let (gateway, _) = gateway_with(
        &sim,
        Arc::new(MemoryPersistence::new(10)),
        bus.clone(),
        FanoutSettings::default(),
    );

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
    sim.set_value(&temperature(), 21.0);

    let message = next_event(&mut events).await;
    let json = serde_json::to_value(&message.payload).unwrap();
    assert_eq!(json["id"], "ns=2;i=5");
    assert_eq!(json["data"]["value"]["dataType"], "Double");
    assert_eq!(json["data"]["value"]["value"], 21.0);
    assert_eq!(json["data"]["statusCode"], 0);
}

// =============================================================================
// Mapping
// =============================================================================

#[tokio::test]
async fn test_unmapped_item_is_broadcast_only() {
    let sim = simulator();
    let store = Arc::new(MemoryPersistence::new(1000));
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let (gateway, fanout) = gateway_with(&sim, store.clone(), bus.clone(), FanoutSettings::default());

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=6", None).await.unwrap();
    sim.set_value(&NodeId::numeric(2, 6), 4.2);
    sim.set_value(&NodeId::numeric(2, 6), 4.4);

    assert_eq!(next_event(&mut events).await.payload.id, NodeId::numeric(2, 6));
    assert_eq!(next_event(&mut events).await.payload.id, NodeId::numeric(2, 6));
    assert!(store.is_empty());
    assert_eq!(fanout.stats().unmapped, 2);
}

#[tokio::test]
async fn test_non_numeric_values_are_not_persisted() {
    let sim = simulator();
    let store = Arc::new(MemoryPersistence::new(1000));
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let (gateway, fanout) = gateway_with(&sim, store.clone(), bus.clone(), FanoutSettings::default());

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=7", Some("1")).await.unwrap();
    sim.set_value(&NodeId::numeric(2, 7), "manual");

    let message = next_event(&mut events).await;
    assert_eq!(message.payload.data.value.as_str(), Some("manual"));
    assert!(store.is_empty());
    assert_eq!(fanout.stats().persistence_skipped, 1);
}

#[tokio::test]
async fn test_out_of_range_slot_creates_nothing() {
    let sim = simulator();
    let (gateway, _) = gateway_with(
        &sim,
        Arc::new(MemoryPersistence::new(10)),
        Arc::new(EventBus::new(8)),
        FanoutSettings::default(),
    );
    gateway.connect("localhost", "4840").await.unwrap();

    let error = gateway.monitor_variable("ns=2;i=5", Some("4")).await.unwrap_err();
    assert_eq!(error.category(), "configuration");
    assert_eq!(sim.monitored_item_count(), 0);
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn test_persistence_failure_does_not_block_broadcast() {
    let sim = simulator();
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let persistence = Arc::new(OfflinePersistence {
        attempts: AtomicUsize::new(0),
    });
    let (gateway, fanout) =
        gateway_with(&sim, persistence.clone(), bus.clone(), FanoutSettings::default());
    let mut failures = fanout.persistence_failures();

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
    for value in [21.0, 21.3, 21.1] {
        sim.set_value(&temperature(), value);
    }

    for expected in [21.0, 21.3, 21.1] {
        let message = next_event(&mut events).await;
        assert_eq!(message.payload.data.value.as_f64(), Some(expected));
    }
    for _ in 0..3 {
        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.kind, SinkKind::Persistence);
        assert_eq!(failure.sink_name, "offline-db");
        assert_eq!(failure.variable, Some("temp1"));
    }
    assert_eq!(persistence.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(gateway.status().await.fanout.persistence_failures, 3);
}

#[tokio::test]
async fn test_broadcast_failure_does_not_block_persistence() {
    let sim = simulator();
    let store = Arc::new(MemoryPersistence::new(1000));
    let (gateway, fanout) = gateway_with(
        &sim,
        store.clone(),
        Arc::new(BrokenBroadcast),
        FanoutSettings::default(),
    );
    let mut failures = fanout.broadcast_failures();

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
    sim.set_value(&temperature(), 19.5);

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.kind, SinkKind::Broadcast);
    assert_eq!(failure.error, SinkError::rejected("socket closed"));
    eventually(|| store.values("temp1") == vec![19.5]).await;
}

#[tokio::test]
async fn test_slow_persistence_does_not_delay_other_nodes() {
    let sim = simulator();
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let persistence = Arc::new(StallingPersistence {
        stalled: "temp1",
        inner: MemoryPersistence::new(100),
    });
    let settings = FanoutSettings {
        sink_timeout: Duration::from_secs(600),
        ..Default::default()
    };
    let (gateway, _) = gateway_with(&sim, persistence.clone(), bus.clone(), settings);

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
    gateway.monitor_variable("ns=2;i=6", Some("2")).await.unwrap();

    // Node 5 stalls inside its persistence write.
    sim.set_value(&temperature(), 21.0);
    assert_eq!(next_event(&mut events).await.payload.id, temperature());

    sim.set_value(&NodeId::numeric(2, 6), 3.3);
    let message = next_event(&mut events).await;
    assert_eq!(message.payload.id, NodeId::numeric(2, 6));
    eventually(|| persistence.inner.values("flow1") == vec![3.3]).await;
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_per_node_order_is_preserved_under_load() {
    let sim = simulator();
    let store = Arc::new(MemoryPersistence::new(10_000));
    let bus = Arc::new(EventBus::new(1024));
    // The burst is pushed without yielding, so each queue must hold all of it.
    let (gateway, _) = gateway_with_queue(
        &sim,
        store.clone(),
        bus.clone(),
        FanoutSettings::default(),
        queue_of(256),
    );

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
    gateway.monitor_variable("ns=2;i=6", Some("2")).await.unwrap();

    for i in 0..200 {
        sim.set_value(&temperature(), i as f64);
        sim.set_value(&NodeId::numeric(2, 6), 1000.0 + i as f64);
    }

    eventually(|| store.len() == 400).await;
    let temps: Vec<f64> = (0..200).map(|i| i as f64).collect();
    let flows: Vec<f64> = (0..200).map(|i| 1000.0 + i as f64).collect();
    assert_eq!(store.values("temp1"), temps);
    assert_eq!(store.values("flow1"), flows);
}

#[tokio::test]
async fn test_no_delivery_after_disconnect() {
    let sim = simulator();
    let store = Arc::new(MemoryPersistence::new(100));
    let (gateway, fanout) = gateway_with(
        &sim,
        store.clone(),
        Arc::new(EventBus::new(8)),
        FanoutSettings::default(),
    );

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();
    gateway.disconnect().await.unwrap();

    sim.set_value(&temperature(), 50.0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(store.is_empty());
    assert_eq!(fanout.stats().notifications, 0);
}

// =============================================================================
// Queueing
// =============================================================================

#[tokio::test]
async fn test_stalled_sink_keeps_newest_values() {
    let sim = simulator();
    let (gate, open) = watch::channel(false);
    let persistence = Arc::new(GatedPersistence {
        open,
        entered: AtomicUsize::new(0),
        inner: MemoryPersistence::new(100),
    });
    let bus = Arc::new(EventBus::new(16));
    let (gateway, _) = gateway_with_queue(
        &sim,
        persistence.clone(),
        bus,
        FanoutSettings::default(),
        queue_of(2),
    );

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();

    sim.set_value(&temperature(), 1.0);
    eventually(|| persistence.entered.load(Ordering::SeqCst) == 1).await;

    for v in 2..=2000 {
        sim.set_value(&temperature(), v as f64);
    }
    assert_eq!(sim.dropped_values(), 1997);

    gate.send(true).unwrap();
    eventually(|| persistence.inner.len() == 3).await;
    assert_eq!(persistence.inner.values("temp1"), vec![1.0, 1999.0, 2000.0]);
}

#[tokio::test]
async fn test_discard_newest_keeps_first_values() {
    let sim = simulator();
    let (gate, open) = watch::channel(false);
    let persistence = Arc::new(GatedPersistence {
        open,
        entered: AtomicUsize::new(0),
        inner: MemoryPersistence::new(100),
    });
    let bus = Arc::new(EventBus::new(16));
    let monitoring = MonitoredItemSettings {
        discard_oldest: false,
        ..queue_of(2)
    };
    let (gateway, _) =
        gateway_with_queue(&sim, persistence.clone(), bus, FanoutSettings::default(), monitoring);

    gateway.connect("localhost", "4840").await.unwrap();
    gateway.monitor_variable("ns=2;i=5", Some("0")).await.unwrap();

    sim.set_value(&temperature(), 1.0);
    eventually(|| persistence.entered.load(Ordering::SeqCst) == 1).await;
    for v in 2..=10 {
        sim.set_value(&temperature(), v as f64);
    }

    gate.send(true).unwrap();
    eventually(|| persistence.inner.len() == 3).await;
    assert_eq!(persistence.inner.values("temp1"), vec![1.0, 2.0, 3.0]);
}
