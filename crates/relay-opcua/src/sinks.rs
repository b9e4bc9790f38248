// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process sink implementations.
//!
//! - [`MemoryPersistence`]: bounded FIFO store of `(variable, value)` records
//! - [`EventBus`]: topic-tagged `tokio::sync::broadcast` channel
//!
//! Both are used by the binary and the test suites. Production deployments
//! plug their own [`PersistenceSink`] and [`BroadcastSink`] implementations
//! into the fan-out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::SinkError;
use crate::fanout::{BroadcastSink, PersistenceSink, VariableValueEvent};

// =============================================================================
// MemoryPersistence
// =============================================================================

/// One persisted value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    /// Standard variable name.
    pub variable: String,
    /// Value.
    pub value: f64,
    /// Storage time.
    pub stored_at: DateTime<Utc>,
}

/// Bounded in-memory persistence.
///
/// Keeps the newest `max_records` records in insertion order; the oldest
/// record is evicted first.
#[derive(Debug)]
pub struct MemoryPersistence {
    records: RwLock<VecDeque<PersistedRecord>>,
    max_records: usize,
    available: AtomicBool,
    evicted: AtomicU64,
}

impl MemoryPersistence {
    /// Creates a store holding at most `max_records` records.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
            available: AtomicBool::new(true),
            evicted: AtomicU64::new(0),
        }
    }

    /// Toggles availability; writes fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns all records, oldest first.
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// Returns the `(variable, value)` pairs, oldest first.
    pub fn entries(&self) -> Vec<(String, f64)> {
        self.records
            .read()
            .iter()
            .map(|r| (r.variable.clone(), r.value))
            .collect()
    }

    /// Returns the values stored for one variable, oldest first.
    pub fn values(&self, variable: &str) -> Vec<f64> {
        self.records
            .read()
            .iter()
            .filter(|r| r.variable == variable)
            .map(|r| r.value)
            .collect()
    }

    /// Returns the newest record for one variable.
    pub fn latest(&self, variable: &str) -> Option<PersistedRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .find(|r| r.variable == variable)
            .cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of records evicted by the size bound.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Removes all records.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl PersistenceSink for MemoryPersistence {
    async fn write(&self, variable_name: &str, value: f64) -> Result<(), SinkError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SinkError::unavailable("memory store offline"));
        }

        let mut records = self.records.write();
        while records.len() >= self.max_records {
            records.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(PersistedRecord {
            variable: variable_name.to_string(),
            value,
            stored_at: Utc::now(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// EventBus
// =============================================================================

/// A published event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusMessage {
    /// Topic, e.g. `variableValues`.
    pub topic: String,
    /// Payload.
    pub payload: VariableValueEvent,
}

#[derive(Debug, Default)]
struct BusStats {
    published: AtomicU64,
    without_subscribers: AtomicU64,
    lagged: AtomicU64,
}

/// Topic-tagged broadcast bus.
///
/// Publishing with no subscribers succeeds; the event is simply not seen.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<BusMessage>,
    capacity: usize,
    stats: Arc<BusStats>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: Arc::new(BusStats::default()),
        }
    }

    /// Creates a subscriber.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
            stats: self.stats.clone(),
        }
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `(published, without_subscribers, lagged)`.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.stats.published.load(Ordering::Relaxed),
            self.stats.without_subscribers.load(Ordering::Relaxed),
            self.stats.lagged.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl BroadcastSink for EventBus {
    async fn publish(&self, topic: &str, payload: &VariableValueEvent) -> Result<(), SinkError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
        };
        if self.sender.send(message).is_err() {
            self.stats.without_subscribers.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "event-bus"
    }
}

/// Receiving end of an [`EventBus`].
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<BusMessage>,
    stats: Arc<BusStats>,
}

impl EventSubscriber {
    /// Receives the next event, skipping over lag.
    pub async fn recv(&mut self) -> Result<BusMessage, SinkError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SinkError::unavailable("event bus closed"))
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.stats.lagged.fetch_add(count, Ordering::Relaxed);
                    tracing::warn!(count, "Event bus subscriber lagged, events dropped");
                }
            }
        }
    }

    /// Receives an event without waiting.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.stats.lagged.fetch_add(count, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
