// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport abstraction layer.
//!
//! [`UaTransport`] is the seam between the relay core and an OPC UA SDK. The
//! core never encodes protocol messages itself; it drives the primitives
//! below and interprets their results.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};

use crate::browse::NodeReference;
use crate::error::OpcUaResult;
use crate::types::{ConnectionStrategy, Endpoint, MonitoredItemSettings, NodeId, SubscriptionSettings};

use super::session::{SessionInfo, SessionRequest};

// =============================================================================
// TransportState
// =============================================================================

/// Connection state of the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Transport is not connected.
    #[default]
    Disconnected,

    /// Transport is establishing the link.
    Connecting,

    /// Transport is connected.
    Connected,

    /// Transport link has failed.
    Failed,
}

impl TransportState {
    /// Returns `true` if the transport is connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: StatusCode = StatusCode(0);
    /// Uncertain.
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    /// Bad.
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    /// BadNodeIdUnknown.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    /// BadNotReadable.
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);

    /// Returns `true` for Good severity.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` for Uncertain severity.
    #[inline]
    pub fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` for Bad severity.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:08X})",
            crate::error::OperationError::status_code_name(self.0),
            self.0
        )
    }
}

// =============================================================================
// Variant
// =============================================================================

/// OPC UA variant value.
///
/// Serialized as `{"dataType": "Double", "value": 21.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dataType", content = "value")]
pub enum Variant {
    /// Boolean value.
    Boolean(bool),
    /// Signed byte.
    SByte(i8),
    /// Unsigned byte.
    Byte(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit double.
    Double(f64),
    /// String value.
    String(String),
    /// Date/time value.
    DateTime(DateTime<Utc>),
    /// GUID value.
    Guid(uuid::Uuid),
    /// Byte string.
    ByteString(Vec<u8>),
    /// Array of values.
    Array(Vec<Variant>),
    /// Null value.
    Null,
}

impl Variant {
    /// Returns the OPC UA data type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "Boolean",
            Self::SByte(_) => "SByte",
            Self::Byte(_) => "Byte",
            Self::Int16(_) => "Int16",
            Self::UInt16(_) => "UInt16",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Guid(_) => "Guid",
            Self::ByteString(_) => "ByteString",
            Self::Array(_) => "Array",
            Self::Null => "Null",
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to get the value as an f64.
    ///
    /// Booleans map to 0.0 / 1.0; strings, arrays and the like yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::SByte(v) => Some(*v as f64),
            Self::Byte(v) => Some(*v as f64),
            Self::Int16(v) => Some(*v as f64),
            Self::UInt16(v) => Some(*v as f64),
            Self::Int32(v) => Some(*v as f64),
            Self::UInt32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::Null
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::SByte(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Guid(v) => write!(f, "{}", v),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::Array(v) => write!(f, "[{} items]", v.len()),
            Self::Null => write!(f, "null"),
        }
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value with status and timestamps, as read or notified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    /// The value.
    pub value: Variant,

    /// Status code.
    pub status_code: StatusCode,

    /// Source timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Server timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a Good value stamped with the current time.
    pub fn new(value: impl Into<Variant>) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            status_code: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// Creates a value-less result carrying only a status.
    pub fn with_status(status_code: StatusCode) -> Self {
        Self {
            value: Variant::Null,
            status_code,
            source_timestamp: None,
            server_timestamp: Some(Utc::now()),
        }
    }

    /// Returns `true` if the status is Good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.status_code.is_good()
    }

    /// Returns `true` if the status is Bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.status_code.is_bad()
    }
}

// =============================================================================
// Subscription primitives
// =============================================================================

/// Server-assigned subscription ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u32);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned monitored item ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoredItemId(pub u32);

impl fmt::Display for MonitoredItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Out-of-band subscription lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// The server confirmed the subscription.
    Started,
    /// The subscription is alive but had nothing to publish.
    KeepAlive,
    /// The server reported an error.
    Error(String),
    /// The subscription ended.
    Terminated,
}

impl fmt::Display for SubscriptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::KeepAlive => write!(f, "keepalive"),
            Self::Error(message) => write!(f, "error: {}", message),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// A created subscription and its ordered event stream.
#[derive(Debug)]
pub struct SubscriptionStream {
    /// Server-assigned ID.
    pub subscription_id: SubscriptionId,
    /// Lifecycle events in server order. Closing the channel means terminated.
    pub events: mpsc::Receiver<SubscriptionEvent>,
}

/// Parameters for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRequest {
    /// Node to monitor.
    pub node_id: NodeId,
    /// Sampling and queue settings.
    pub settings: MonitoredItemSettings,
}

/// A created monitored item and its ordered value stream.
#[derive(Debug)]
pub struct MonitoredItemStream {
    /// Server-assigned ID.
    pub item_id: MonitoredItemId,
    /// Value changes in server order.
    pub values: ValueReceiver,
}

// =============================================================================
// Monitored item queue
// =============================================================================

#[derive(Debug)]
struct QueueState {
    values: VecDeque<DataValue>,
    closed: bool,
}

#[derive(Debug)]
struct QueueShared {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    discard_oldest: bool,
}

/// Creates a monitored item notification queue.
///
/// The queue holds at most `capacity` values (at least one). When it is full
/// a push discards the oldest queued value if `discard_oldest` is set, and
/// the pushed value otherwise.
pub fn value_queue(capacity: usize, discard_oldest: bool) -> (ValueSender, ValueReceiver) {
    let shared = Arc::new(QueueShared {
        state: Mutex::new(QueueState {
            values: VecDeque::new(),
            closed: false,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
        discard_oldest,
    });
    (
        ValueSender {
            shared: shared.clone(),
        },
        ValueReceiver { shared },
    )
}

/// Producer side of a monitored item queue, held by the server.
///
/// Dropping it closes the queue once the remaining values are drained.
#[derive(Debug)]
pub struct ValueSender {
    shared: Arc<QueueShared>,
}

impl ValueSender {
    /// Queues a value. Returns `true` if a value was discarded.
    pub fn push(&self, value: DataValue) -> bool {
        let discarded = {
            let mut state = self.shared.state.lock();
            if state.values.len() < self.shared.capacity {
                state.values.push_back(value);
                false
            } else if self.shared.discard_oldest {
                state.values.pop_front();
                state.values.push_back(value);
                true
            } else {
                true
            }
        };
        self.shared.notify.notify_one();
        discarded
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl Drop for ValueSender {
    fn drop(&mut self) {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_one();
    }
}

/// Consumer side of a monitored item queue.
#[derive(Debug)]
pub struct ValueReceiver {
    shared: Arc<QueueShared>,
}

impl ValueReceiver {
    /// Waits for the next value. Returns `None` once the sender is gone and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<DataValue> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(value) = state.values.pop_front() {
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Takes a queued value without waiting.
    pub fn try_recv(&mut self) -> Option<DataValue> {
        self.shared.state.lock().values.pop_front()
    }

    /// Number of queued values.
    pub fn len(&self) -> usize {
        self.shared.state.lock().values.len()
    }

    /// Returns true if no value is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// UaTransport Trait
// =============================================================================

/// Abstract transport for OPC UA communication.
///
/// Implementations own the wire protocol, the secure channel and any retry
/// governed by the [`ConnectionStrategy`]. Every method takes `&self`;
/// implementations synchronize internally.
#[async_trait]
pub trait UaTransport: Send + Sync {
    // =========================================================================
    // Connection Management
    // =========================================================================

    /// Establishes the transport link to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint, strategy: &ConnectionStrategy) -> OpcUaResult<()>;

    /// Closes the transport link.
    async fn disconnect(&self) -> OpcUaResult<()>;

    /// Returns the current transport state.
    fn state(&self) -> TransportState;

    // =========================================================================
    // Session
    // =========================================================================

    /// Creates and activates a session on the connected link.
    async fn create_session(&self, request: &SessionRequest) -> OpcUaResult<SessionInfo>;

    /// Closes a session.
    async fn close_session(&self, session: &SessionInfo) -> OpcUaResult<()>;

    // =========================================================================
    // Browse and Read
    // =========================================================================

    /// Lists the immediate children of a node.
    async fn browse(&self, session: &SessionInfo, node_id: &NodeId)
        -> OpcUaResult<Vec<NodeReference>>;

    /// Reads a node's current value attribute.
    async fn read_value(&self, session: &SessionInfo, node_id: &NodeId) -> OpcUaResult<DataValue>;

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Creates a subscription. The stream reports `Started` once the server
    /// confirms it.
    async fn create_subscription(
        &self,
        session: &SessionInfo,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionStream>;

    /// Deletes a subscription and all its monitored items.
    async fn delete_subscription(&self, subscription_id: SubscriptionId) -> OpcUaResult<()>;

    /// Creates one monitored item. Resolves on the server's acknowledgement.
    async fn create_monitored_item(
        &self,
        subscription_id: SubscriptionId,
        request: &MonitoredItemRequest,
    ) -> OpcUaResult<MonitoredItemStream>;

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Returns the transport display name for logging.
    fn display_name(&self) -> String;
}

// =============================================================================
// Tests
// =============================================================================
