// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value-change fan-out.
//!
//! Every [`ValueNotification`] goes to two outbound sinks:
//!
//! ```text
//!                       ┌──────────────────────┐
//!   ValueNotification ─▶│      DataFanout      │
//!                       └──────────┬───────────┘
//!                    ┌─────────────┴─────────────┐
//!                    ▼                           ▼
//!         PersistenceSink::write      BroadcastSink::publish
//!         (mapped slot only)          ("variableValues", {id, data})
//!                    │                           │
//!                    ▼                           ▼
//!        persistence_failures()        broadcast_failures()
//! ```
//!
//! The two calls run concurrently, each bounded by `sink_timeout`. A failed
//! or slow sink is logged, counted and reported on its own failure channel;
//! it never affects the other sink or the protocol layer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::client::DataValue;
use crate::error::{ConfigurationError, OpcUaResult, SinkError};
use crate::stdvars::StandardVariable;
use crate::types::NodeId;

/// Broadcast topic for value changes.
pub const VARIABLE_VALUES_TOPIC: &str = "variableValues";

// =============================================================================
// Sink traits
// =============================================================================

/// Time-series persistence of standard variables.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Stores one value under a standard variable name.
    async fn write(&self, variable_name: &str, value: f64) -> Result<(), SinkError>;

    /// Name used in logs and failure reports.
    fn name(&self) -> &str {
        "persistence"
    }
}

/// Real-time publication of value changes.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Publishes one event on `topic`.
    async fn publish(&self, topic: &str, payload: &VariableValueEvent) -> Result<(), SinkError>;

    /// Name used in logs and failure reports.
    fn name(&self) -> &str {
        "broadcast"
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Broadcast payload: `{"id": "ns=2;i=5", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValueEvent {
    /// Node the value belongs to.
    pub id: NodeId,
    /// The value as received.
    pub data: DataValue,
}

/// One value change for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueNotification {
    /// Monitored node.
    pub node_id: NodeId,
    /// Value as received.
    pub value: DataValue,
    /// Mapped standard variable, if any.
    pub slot: Option<StandardVariable>,
    /// Receive time.
    pub received_at: DateTime<Utc>,
}

impl ValueNotification {
    /// Creates a notification stamped with the current time.
    pub fn new(node_id: NodeId, value: DataValue, slot: Option<StandardVariable>) -> Self {
        Self {
            node_id,
            value,
            slot,
            received_at: Utc::now(),
        }
    }

    /// Returns the value to persist, if the value qualifies.
    ///
    /// Numeric variants with a Good or Uncertain status and a finite value.
    pub fn persistable_value(&self) -> Option<f64> {
        if self.value.status_code.is_bad() {
            return None;
        }
        self.value.value.as_f64().filter(|v| v.is_finite())
    }

    fn event(&self) -> VariableValueEvent {
        VariableValueEvent {
            id: self.node_id.clone(),
            data: self.value.clone(),
        }
    }
}

// =============================================================================
// Failure reports
// =============================================================================

/// Which sink failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Persistence sink.
    Persistence,
    /// Broadcast sink.
    Broadcast,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistence => write!(f, "persistence"),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// A sink failure, emitted on the sink's failure channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkFailure {
    /// Failed sink.
    pub kind: SinkKind,
    /// Sink name.
    pub sink_name: String,
    /// Node of the notification.
    pub node_id: NodeId,
    /// Standard variable name, for persistence failures.
    pub variable: Option<&'static str>,
    /// The error.
    pub error: SinkError,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

/// Result of one sink call within a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// The sink accepted the value.
    Delivered,
    /// The sink was not called.
    Skipped,
    /// The sink failed or timed out.
    Failed,
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Persistence result.
    pub persistence: SinkOutcome,
    /// Broadcast result.
    pub broadcast: SinkOutcome,
}

// =============================================================================
// Settings
// =============================================================================

/// Fan-out settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutSettings {
    /// Upper bound for one sink call.
    #[serde(default = "default_sink_timeout", with = "crate::types::humantime_serde")]
    pub sink_timeout: Duration,

    /// Capacity of each failure channel.
    #[serde(default = "default_failure_channel_capacity")]
    pub failure_channel_capacity: usize,
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_failure_channel_capacity() -> usize {
    256
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            sink_timeout: default_sink_timeout(),
            failure_channel_capacity: default_failure_channel_capacity(),
        }
    }
}

impl FanoutSettings {
    /// Validates the settings.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.sink_timeout.is_zero() {
            return Err(ConfigurationError::invalid_setting("sink_timeout", "must be non-zero").into());
        }
        if self.failure_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_setting(
                "failure_channel_capacity",
                "must be non-zero",
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Fan-out counters.
#[derive(Debug, Default)]
pub struct FanoutStats {
    notifications: AtomicU64,
    persisted: AtomicU64,
    persistence_failures: AtomicU64,
    persistence_skipped: AtomicU64,
    unmapped: AtomicU64,
    broadcasts: AtomicU64,
    broadcast_failures: AtomicU64,
}

impl FanoutStats {
    /// Returns a point-in-time copy.
    pub fn snapshot(&self) -> FanoutStatsSnapshot {
        FanoutStatsSnapshot {
            notifications: self.notifications.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            persistence_skipped: self.persistence_skipped.load(Ordering::Relaxed),
            unmapped: self.unmapped.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            broadcast_failures: self.broadcast_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`FanoutStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutStatsSnapshot {
    /// Notifications dispatched.
    pub notifications: u64,
    /// Successful persistence writes.
    pub persisted: u64,
    /// Failed persistence writes.
    pub persistence_failures: u64,
    /// Mapped values that did not qualify for persistence.
    pub persistence_skipped: u64,
    /// Notifications for items without a slot.
    pub unmapped: u64,
    /// Successful broadcasts.
    pub broadcasts: u64,
    /// Failed broadcasts.
    pub broadcast_failures: u64,
}

// =============================================================================
// DataFanout
// =============================================================================

/// Delivers value notifications to the persistence and broadcast sinks.
pub struct DataFanout {
    persistence: Arc<dyn PersistenceSink>,
    broadcast: Arc<dyn BroadcastSink>,
    settings: FanoutSettings,
    stats: FanoutStats,
    persistence_failures: broadcast::Sender<SinkFailure>,
    broadcast_failures: broadcast::Sender<SinkFailure>,
}

impl DataFanout {
    /// Creates a fan-out with default settings.
    pub fn new(persistence: Arc<dyn PersistenceSink>, broadcast: Arc<dyn BroadcastSink>) -> Self {
        Self::with_settings(persistence, broadcast, FanoutSettings::default())
    }

    /// Creates a fan-out with explicit settings.
    pub fn with_settings(
        persistence: Arc<dyn PersistenceSink>,
        broadcast: Arc<dyn BroadcastSink>,
        settings: FanoutSettings,
    ) -> Self {
        let capacity = settings.failure_channel_capacity.max(1);
        let (persistence_failures, _) = broadcast::channel(capacity);
        let (broadcast_failures, _) = broadcast::channel(capacity);
        Self {
            persistence,
            broadcast,
            settings,
            stats: FanoutStats::default(),
            persistence_failures,
            broadcast_failures,
        }
    }

    /// Subscribes to persistence failures.
    pub fn persistence_failures(&self) -> broadcast::Receiver<SinkFailure> {
        self.persistence_failures.subscribe()
    }

    /// Subscribes to broadcast failures.
    pub fn broadcast_failures(&self) -> broadcast::Receiver<SinkFailure> {
        self.broadcast_failures.subscribe()
    }

    /// Returns the counters.
    pub fn stats(&self) -> FanoutStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the settings.
    pub fn settings(&self) -> &FanoutSettings {
        &self.settings
    }

    /// Sends one notification to both sinks.
    ///
    /// Never fails; sink errors are reported on the failure channels.
    pub async fn dispatch(&self, notification: &ValueNotification) -> DispatchOutcome {
        self.stats.notifications.fetch_add(1, Ordering::Relaxed);

        let (persistence, broadcast) =
            tokio::join!(self.persist(notification), self.publish(notification));

        DispatchOutcome {
            persistence,
            broadcast,
        }
    }

    async fn persist(&self, notification: &ValueNotification) -> SinkOutcome {
        let Some(slot) = notification.slot else {
            self.stats.unmapped.fetch_add(1, Ordering::Relaxed);
            return SinkOutcome::Skipped;
        };

        let Some(value) = notification.persistable_value() else {
            self.stats.persistence_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                node_id = %notification.node_id,
                variable = slot.name,
                data_type = notification.value.value.type_name(),
                status = %notification.value.status_code,
                "Value not persistable, broadcast only"
            );
            return SinkOutcome::Skipped;
        };

        let result = match tokio::time::timeout(
            self.settings.sink_timeout,
            self.persistence.write(slot.name, value),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SinkError::TimedOut(self.settings.sink_timeout)),
        };

        match result {
            Ok(()) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                SinkOutcome::Delivered
            }
            Err(error) => {
                self.stats.persistence_failures.fetch_add(1, Ordering::Relaxed);
                self.report(
                    SinkKind::Persistence,
                    self.persistence.name(),
                    notification,
                    Some(slot.name),
                    error,
                );
                SinkOutcome::Failed
            }
        }
    }

    async fn publish(&self, notification: &ValueNotification) -> SinkOutcome {
        let event = notification.event();
        let result = match tokio::time::timeout(
            self.settings.sink_timeout,
            self.broadcast.publish(VARIABLE_VALUES_TOPIC, &event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SinkError::TimedOut(self.settings.sink_timeout)),
        };

        match result {
            Ok(()) => {
                self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
                SinkOutcome::Delivered
            }
            Err(error) => {
                self.stats.broadcast_failures.fetch_add(1, Ordering::Relaxed);
                self.report(
                    SinkKind::Broadcast,
                    self.broadcast.name(),
                    notification,
                    None,
                    error,
                );
                SinkOutcome::Failed
            }
        }
    }

    fn report(
        &self,
        kind: SinkKind,
        sink_name: &str,
        notification: &ValueNotification,
        variable: Option<&'static str>,
        error: SinkError,
    ) {
        tracing::warn!(
            sink = %kind,
            sink_name = sink_name,
            node_id = %notification.node_id,
            variable = variable,
            error = %error,
            "Sink write failed"
        );

        let failure = SinkFailure {
            kind,
            sink_name: sink_name.to_string(),
            node_id: notification.node_id.clone(),
            variable,
            error,
            occurred_at: Utc::now(),
        };
        let channel = match kind {
            SinkKind::Persistence => &self.persistence_failures,
            SinkKind::Broadcast => &self.broadcast_failures,
        };
        // No subscribers is fine.
        let _ = channel.send(failure);
    }
}

impl fmt::Debug for DataFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFanout")
            .field("persistence", &self.persistence.name())
            .field("broadcast", &self.broadcast.name())
            .field("settings", &self.settings)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{StatusCode, Variant};
    use crate::sinks::{EventBus, MemoryPersistence};
    use crate::stdvars;

    struct RejectingPersistence;

    #[async_trait]
    impl PersistenceSink for RejectingPersistence {
        async fn write(&self, _variable_name: &str, _value: f64) -> Result<(), SinkError> {
            Err(SinkError::unavailable("database offline"))
        }

        fn name(&self) -> &str {
            "rejecting"
        }
    }

    struct StalledBroadcast;

    #[async_trait]
    impl BroadcastSink for StalledBroadcast {
        async fn publish(&self, _topic: &str, _payload: &VariableValueEvent) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn notification(value: impl Into<Variant>, slot: Option<usize>) -> ValueNotification {
        ValueNotification::new(
            NodeId::numeric(2, 5),
            DataValue::new(value),
            slot.and_then(stdvars::get),
        )
    }

    #[test]
    fn test_persistable_values() {
        assert_eq!(notification(21.5, Some(0)).persistable_value(), Some(21.5));
        assert_eq!(notification(7, Some(0)).persistable_value(), Some(7.0));
        assert_eq!(notification(true, Some(0)).persistable_value(), Some(1.0));
        assert_eq!(notification("text", Some(0)).persistable_value(), None);
        assert_eq!(notification(f64::NAN, Some(0)).persistable_value(), None);

        let mut bad = notification(21.5, Some(0));
        bad.value.status_code = StatusCode::BAD;
        assert_eq!(bad.persistable_value(), None);

        let mut uncertain = notification(21.5, Some(0));
        uncertain.value.status_code = StatusCode::UNCERTAIN;
        assert_eq!(uncertain.persistable_value(), Some(21.5));
    }

    #[test]
    fn test_event_serialization() {
        let event = notification(21.0, Some(0)).event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], "ns=2;i=5");
        assert_eq!(json["data"]["value"]["dataType"], "Double");
        assert_eq!(json["data"]["value"]["value"], 21.0);
    }

    #[tokio::test]
    async fn test_mapped_value_goes_to_both_sinks() {
        let store = Arc::new(MemoryPersistence::new(100));
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let fanout = DataFanout::new(store.clone(), bus.clone());

        let outcome = fanout.dispatch(&notification(21.0, Some(0))).await;
        assert_eq!(outcome.persistence, SinkOutcome::Delivered);
        assert_eq!(outcome.broadcast, SinkOutcome::Delivered);

        assert_eq!(store.values("temp1"), vec![21.0]);
        let message = events.recv().await.unwrap();
        assert_eq!(message.topic, VARIABLE_VALUES_TOPIC);
        assert_eq!(message.payload.id, NodeId::numeric(2, 5));
    }

    #[tokio::test]
    async fn test_unmapped_value_is_broadcast_only() {
        let store = Arc::new(MemoryPersistence::new(100));
        let bus = Arc::new(EventBus::new(16));
        let fanout = DataFanout::new(store.clone(), bus.clone());

        let outcome = fanout.dispatch(&notification(21.0, None)).await;
        assert_eq!(outcome.persistence, SinkOutcome::Skipped);
        assert_eq!(outcome.broadcast, SinkOutcome::Delivered);
        assert!(store.is_empty());

        let stats = fanout.stats();
        assert_eq!(stats.unmapped, 1);
        assert_eq!(stats.broadcasts, 1);
    }

    #[tokio::test]
    async fn test_string_value_is_not_persisted() {
        let store = Arc::new(MemoryPersistence::new(100));
        let bus = Arc::new(EventBus::new(16));
        let fanout = DataFanout::new(store.clone(), bus.clone());

        let outcome = fanout.dispatch(&notification("running", Some(1))).await;
        assert_eq!(outcome.persistence, SinkOutcome::Skipped);
        assert_eq!(outcome.broadcast, SinkOutcome::Delivered);
        assert_eq!(fanout.stats().persistence_skipped, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_isolated() {
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let fanout = DataFanout::new(Arc::new(RejectingPersistence), bus.clone());
        let mut failures = fanout.persistence_failures();

        let outcome = fanout.dispatch(&notification(21.0, Some(0))).await;
        assert_eq!(outcome.persistence, SinkOutcome::Failed);
        assert_eq!(outcome.broadcast, SinkOutcome::Delivered);
        assert!(events.recv().await.is_ok());

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.kind, SinkKind::Persistence);
        assert_eq!(failure.sink_name, "rejecting");
        assert_eq!(failure.variable, Some("temp1"));
        assert_eq!(failure.error, SinkError::unavailable("database offline"));
        assert_eq!(fanout.stats().persistence_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_timeout_is_isolated() {
        let store = Arc::new(MemoryPersistence::new(100));
        let settings = FanoutSettings {
            sink_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let fanout = DataFanout::with_settings(store.clone(), Arc::new(StalledBroadcast), settings);
        let mut failures = fanout.broadcast_failures();

        let outcome = fanout.dispatch(&notification(21.0, Some(0))).await;
        assert_eq!(outcome.persistence, SinkOutcome::Delivered);
        assert_eq!(outcome.broadcast, SinkOutcome::Failed);
        assert_eq!(store.values("temp1"), vec![21.0]);

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.error, SinkError::TimedOut(Duration::from_millis(200)));
    }

    #[test]
    fn test_settings_validation() {
        assert!(FanoutSettings::default().validate().is_ok());
        let settings = FanoutSettings {
            sink_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
