// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client core.
//!
//! - **Transport Layer**: the [`UaTransport`] seam and its in-memory
//!   [`SimulatedTransport`]
//! - **Session Bookkeeping**: connection states, handshake steps, counters
//! - **Connection Manager**: the handshake state machine and teardown
//! - **Subscription Registry**: monitored items and their delivery tasks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ConnectionManager                          │
//! │         (handshake, disconnect, browse / read / monitor)        │
//! └─────────────────────────────────────────────────────────────────┘
//!            │                    │                     │
//!            ▼                    ▼                     ▼
//! ┌──────────────────┐ ┌────────────────────┐ ┌────────────────────┐
//! │ BrowseService /  │ │ SubscriptionRegistry│ │    DataFanout     │
//! │ VariableReader   │ │ (per-item delivery) │─▶│ (persist + publish)│
//! └──────────────────┘ └────────────────────┘ └────────────────────┘
//!            │                    │
//!            ▼                    ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         UaTransport                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod connection;
mod session;
mod simulated;
pub mod subscription;
mod transport;

pub use connection::{ConnectionContext, ConnectionHandle, ConnectionManager, ConnectionStatus};
pub use session::{
    ConnectionState, ConnectionStats, ConnectionStatsSnapshot, HandshakeStep, SessionInfo,
    SessionRequest,
};
pub use simulated::{FaultPoint, SimulatedTransport, TransportCall};
pub use subscription::{MonitoredItemHandle, MonitoredItemInfo, SubscriptionRegistry};
pub use transport::{
    DataValue, MonitoredItemId, MonitoredItemRequest, MonitoredItemStream, StatusCode,
    SubscriptionEvent, SubscriptionId, SubscriptionStream, TransportState, UaTransport,
    ValueReceiver, ValueSender, Variant, value_queue,
};
