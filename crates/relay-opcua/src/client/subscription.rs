// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored item registry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     SubscriptionRegistry                        │
//! │            (one per active subscription, keyed by NodeId)       │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │  ns=2;i=5       │ │  ns=2;i=6       │ │  ns=3;s=Flow    │
//! │  slot temp1     │ │  slot temp2     │ │  unmapped       │
//! │  delivery task  │ │  delivery task  │ │  delivery task  │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!                          DataFanout
//! ```
//!
//! Each monitored item owns one delivery task, so values for one node reach
//! the fan-out in server order while different nodes run in parallel.
//!
//! When the subscription terminates the registry is invalidated as a whole:
//! delivery tasks stop, entries are dropped and every later `monitor` call or
//! handle use fails with [`SubscriptionError::Stale`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{OpcUaError, OpcUaErrorContext, OpcUaResult, SubscriptionError};
use crate::fanout::{DataFanout, ValueNotification};
use crate::stdvars::{self, StandardVariable};
use crate::types::{MonitoredItemSettings, NodeId};

use super::transport::{
    MonitoredItemId, MonitoredItemRequest, SubscriptionId, UaTransport, ValueReceiver,
};

// =============================================================================
// MonitoredItemInfo
// =============================================================================

/// Description of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredItemInfo {
    /// Monitored node.
    pub node_id: NodeId,
    /// Server-assigned item ID.
    pub item_id: MonitoredItemId,
    /// Mapped standard variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<StandardVariable>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Notifications delivered to the fan-out.
    pub notifications: u64,
}

// =============================================================================
// MonitoredItemHandle
// =============================================================================

/// Caller-side reference to a monitored item.
///
/// Becomes stale when the registry is invalidated.
#[derive(Clone)]
pub struct MonitoredItemHandle {
    node_id: NodeId,
    item_id: MonitoredItemId,
    slot: Option<StandardVariable>,
    created_at: DateTime<Utc>,
    notifications: Arc<AtomicU64>,
    invalidated: Arc<AtomicBool>,
}

impl MonitoredItemHandle {
    /// Monitored node.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Server-assigned item ID.
    pub fn item_id(&self) -> MonitoredItemId {
        self.item_id
    }

    /// Fails with `Stale` once the registry was invalidated.
    pub fn ensure_live(&self) -> OpcUaResult<()> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(OpcUaError::stale());
        }
        Ok(())
    }

    /// Returns the current description of the item.
    pub fn info(&self) -> OpcUaResult<MonitoredItemInfo> {
        self.ensure_live()?;
        Ok(MonitoredItemInfo {
            node_id: self.node_id.clone(),
            item_id: self.item_id,
            slot: self.slot,
            created_at: self.created_at,
            notifications: self.notifications.load(Ordering::Relaxed),
        })
    }
}

impl fmt::Debug for MonitoredItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItemHandle")
            .field("node_id", &self.node_id)
            .field("item_id", &self.item_id)
            .field("slot", &self.slot.map(|s| s.name))
            .field("stale", &self.invalidated.load(Ordering::SeqCst))
            .finish()
    }
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

struct Entry {
    item_id: MonitoredItemId,
    slot: Option<StandardVariable>,
    created_at: DateTime<Utc>,
    notifications: Arc<AtomicU64>,
}

#[derive(Default)]
struct Items {
    entries: HashMap<NodeId, Entry>,
    pending: HashSet<NodeId>,
}

/// Monitored items of one subscription.
pub struct SubscriptionRegistry {
    transport: Arc<dyn UaTransport>,
    subscription_id: SubscriptionId,
    item_settings: MonitoredItemSettings,
    fanout: Arc<DataFanout>,
    items: Mutex<Items>,
    invalidated: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SubscriptionRegistry {
    /// Creates an empty registry for `subscription_id`.
    pub fn new(
        transport: Arc<dyn UaTransport>,
        subscription_id: SubscriptionId,
        item_settings: MonitoredItemSettings,
        fanout: Arc<DataFanout>,
    ) -> Self {
        Self {
            transport,
            subscription_id,
            item_settings,
            fanout,
            items: Mutex::new(Items::default()),
            invalidated: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Subscription this registry belongs to.
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Returns `true` once invalidated.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Starts monitoring `node_id`, optionally mapped to a standard variable.
    ///
    /// Resolves on the server's acknowledgement, not on the first value.
    pub async fn monitor(
        &self,
        node_id: NodeId,
        slot: Option<usize>,
    ) -> OpcUaResult<MonitoredItemHandle> {
        let slot = slot.map(stdvars::lookup).transpose()?;
        self.reserve(&node_id)?;

        let request = MonitoredItemRequest {
            node_id: node_id.clone(),
            settings: self.item_settings.clone(),
        };
        let stream = match self
            .transport
            .create_monitored_item(self.subscription_id, &request)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.items.lock().pending.remove(&node_id);
                return Err(e).with_node(&node_id.to_string());
            }
        };

        let notifications = Arc::new(AtomicU64::new(0));
        let created_at = Utc::now();
        {
            let mut items = self.items.lock();
            items.pending.remove(&node_id);
            // The subscription may have terminated while the request was out.
            if self.is_invalidated() {
                return Err(OpcUaError::stale());
            }
            items.entries.insert(
                node_id.clone(),
                Entry {
                    item_id: stream.item_id,
                    slot,
                    created_at,
                    notifications: notifications.clone(),
                },
            );
        }

        tokio::spawn(deliver(
            stream.values,
            node_id.clone(),
            slot,
            self.fanout.clone(),
            notifications.clone(),
            self.cancel.child_token(),
        ));

        tracing::info!(
            node_id = %node_id,
            item_id = %stream.item_id,
            subscription_id = %self.subscription_id,
            slot = slot.map(|s| s.name),
            "Monitored item created"
        );

        Ok(MonitoredItemHandle {
            node_id,
            item_id: stream.item_id,
            slot,
            created_at,
            notifications,
            invalidated: self.invalidated.clone(),
        })
    }

    fn reserve(&self, node_id: &NodeId) -> OpcUaResult<()> {
        let mut items = self.items.lock();
        if self.is_invalidated() {
            return Err(OpcUaError::stale());
        }
        if items.entries.contains_key(node_id) || items.pending.contains(node_id) {
            return Err(SubscriptionError::already_monitored(node_id.to_string()).into());
        }
        items.pending.insert(node_id.clone());
        Ok(())
    }

    /// Invalidates every entry at once and stops all delivery tasks.
    ///
    /// Returns the number of entries dropped. Repeated calls are no-ops.
    pub fn invalidate(&self) -> usize {
        let dropped = {
            let mut items = self.items.lock();
            if self.invalidated.swap(true, Ordering::SeqCst) {
                return 0;
            }
            let count = items.entries.len();
            items.entries.clear();
            count
        };
        self.cancel.cancel();

        tracing::info!(
            subscription_id = %self.subscription_id,
            dropped,
            "Subscription registry invalidated"
        );
        dropped
    }

    /// Returns `true` if `node_id` is monitored.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.items.lock().entries.contains_key(node_id)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.items.lock().entries.len()
    }

    /// Returns `true` if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lists live entries ordered by item ID.
    pub fn monitored_items(&self) -> Vec<MonitoredItemInfo> {
        let items = self.items.lock();
        let mut infos: Vec<_> = items
            .entries
            .iter()
            .map(|(node_id, entry)| MonitoredItemInfo {
                node_id: node_id.clone(),
                item_id: entry.item_id,
                slot: entry.slot,
                created_at: entry.created_at,
                notifications: entry.notifications.load(Ordering::Relaxed),
            })
            .collect();
        infos.sort_by_key(|info| info.item_id);
        infos
    }

    /// Monitored node IDs ordered by item ID.
    pub fn monitored_nodes(&self) -> Vec<NodeId> {
        self.monitored_items()
            .into_iter()
            .map(|info| info.node_id)
            .collect()
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscription_id", &self.subscription_id)
            .field("items", &self.len())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

/// Per-item delivery loop.
async fn deliver(
    mut values: ValueReceiver,
    node_id: NodeId,
    slot: Option<StandardVariable>,
    fanout: Arc<DataFanout>,
    notifications: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        let value = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            value = values.recv() => match value {
                Some(value) => value,
                None => break,
            },
        };

        notifications.fetch_add(1, Ordering::Relaxed);
        fanout
            .dispatch(&ValueNotification::new(node_id.clone(), value, slot))
            .await;
    }

    tracing::debug!(node_id = %node_id, "Delivery task stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::client::{FaultPoint, SessionRequest, SimulatedTransport};
    use crate::sinks::{EventBus, MemoryPersistence};
    use crate::types::{ConnectionStrategy, Endpoint, SubscriptionSettings};

    struct Fixture {
        sim: Arc<SimulatedTransport>,
        store: Arc<MemoryPersistence>,
        registry: SubscriptionRegistry,
    }

    async fn fixture() -> Fixture {
        let sim = Arc::new(SimulatedTransport::new());
        sim.add_variable(NodeId::numeric(2, 5), "Temperature", 20.0);
        sim.add_variable(NodeId::numeric(2, 6), "Status", "idle");
        sim.connect(&Endpoint::new("localhost", 4840).unwrap(), &ConnectionStrategy::default())
            .await
            .unwrap();
        let session = sim
            .create_session(&SessionRequest {
                application_name: "test".into(),
                session_name: "test".into(),
                timeout: Duration::from_secs(60),
            })
            .await
            .unwrap();
        let stream = sim
            .create_subscription(&session, &SubscriptionSettings::default())
            .await
            .unwrap();

        let store = Arc::new(MemoryPersistence::new(100));
        let fanout = Arc::new(DataFanout::new(store.clone(), Arc::new(EventBus::new(16))));
        let registry = SubscriptionRegistry::new(
            sim.clone(),
            stream.subscription_id,
            MonitoredItemSettings::default(),
            fanout,
        );
        Fixture {
            sim,
            store,
            registry,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_invalid_slot_is_rejected_before_network() {
        let f = fixture().await;
        f.sim.clear_calls();

        let error = f
            .registry
            .monitor(NodeId::numeric(2, 5), Some(4))
            .await
            .unwrap_err();
        assert_eq!(error.category(), "configuration");
        assert!(f.sim.calls().is_empty());
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_and_deliver() {
        let f = fixture().await;
        let handle = f
            .registry
            .monitor(NodeId::numeric(2, 5), Some(0))
            .await
            .unwrap();
        assert_eq!(handle.info().unwrap().slot.map(|s| s.name), Some("temp1"));

        f.sim.set_value(&NodeId::numeric(2, 5), 21.0);
        f.sim.set_value(&NodeId::numeric(2, 5), 21.3);
        settle().await;

        assert_eq!(f.store.values("temp1"), vec![21.0, 21.3]);
        assert_eq!(handle.info().unwrap().notifications, 2);
    }

    #[tokio::test]
    async fn test_duplicate_monitor_fails() {
        let f = fixture().await;
        f.registry.monitor(NodeId::numeric(2, 5), None).await.unwrap();
        let error = f
            .registry
            .monitor(NodeId::numeric(2, 5), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            OpcUaError::Subscription(SubscriptionError::AlreadyMonitored { .. })
        ));
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_releases_reservation() {
        let f = fixture().await;
        f.sim.fail_next(FaultPoint::CreateMonitoredItem);
        assert!(f.registry.monitor(NodeId::numeric(2, 5), None).await.is_err());

        // The node can be retried.
        assert!(f.registry.monitor(NodeId::numeric(2, 5), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalidate_makes_everything_stale() {
        let f = fixture().await;
        let handle = f
            .registry
            .monitor(NodeId::numeric(2, 5), Some(0))
            .await
            .unwrap();
        f.registry.monitor(NodeId::numeric(2, 6), None).await.unwrap();

        assert_eq!(f.registry.invalidate(), 2);
        assert_eq!(f.registry.invalidate(), 0);
        assert!(f.registry.is_empty());

        assert!(handle.ensure_live().unwrap_err().is_stale());
        assert!(handle.info().unwrap_err().is_stale());

        f.sim.clear_calls();
        let error = f
            .registry
            .monitor(NodeId::numeric(2, 5), None)
            .await
            .unwrap_err();
        assert!(error.is_stale());
        assert!(f.sim.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_delivery_after_invalidate() {
        let f = fixture().await;
        f.registry.monitor(NodeId::numeric(2, 5), Some(0)).await.unwrap();
        f.registry.invalidate();
        settle().await;

        f.sim.set_value(&NodeId::numeric(2, 5), 30.0);
        settle().await;
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_monitored_items_listing() {
        let f = fixture().await;
        f.registry.monitor(NodeId::numeric(2, 5), Some(0)).await.unwrap();
        f.registry.monitor(NodeId::numeric(2, 6), None).await.unwrap();

        assert_eq!(
            f.registry.monitored_nodes(),
            vec![NodeId::numeric(2, 5), NodeId::numeric(2, 6)]
        );
        let json = serde_json::to_value(f.registry.monitored_items()).unwrap();
        assert_eq!(json[0]["nodeId"], "ns=2;i=5");
        assert_eq!(json[0]["slot"]["name"], "temp1");
        assert!(json[1].get("slot").is_none());
    }
}
