// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client relay core.
//!
//! Connects to one OPC UA server, exposes browse and read, monitors nodes
//! and fans every value change out to a persistence sink and a broadcast
//! sink.
//!
//! # Features
//!
//! - Four-step connect handshake with an explicit state machine
//! - Cancellable handshake; reverse-order teardown on disconnect
//! - One-shot browse and read bounded by a request timeout
//! - Monitored items mapped to a fixed standard variable table
//! - Per-item ordered delivery into isolated persistence and broadcast sinks
//! - In-memory [`SimulatedTransport`](client::SimulatedTransport) for tests
//!   and demos
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Connection    - Transport link failures
//! ├── Session       - Session lifecycle errors
//! ├── Browse        - Node browsing failures
//! ├── Operation     - Read failures and bad status codes
//! ├── Subscription  - Subscription and monitoring errors
//! ├── State         - Precondition, busy, cancelled handshake
//! ├── Configuration - Invalid caller input
//! └── Timeout       - Bounded requests that expired
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relay_opcua::{ClientSettings, DataFanout, EventBus, MemoryPersistence, RelayGateway};
//! use relay_opcua::client::SimulatedTransport;
//!
//! let fanout = Arc::new(DataFanout::new(
//!     Arc::new(MemoryPersistence::new(10_000)),
//!     Arc::new(EventBus::new(1024)),
//! ));
//! let gateway = RelayGateway::new(
//!     Arc::new(SimulatedTransport::new()),
//!     ClientSettings::default(),
//!     fanout,
//! );
//!
//! let response = gateway.connect("10.0.0.5", "4840").await?;
//! gateway.monitor_variable("ns=2;i=5", Some("0")).await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod browse;
pub mod client;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod read;
pub mod sinks;
pub mod stdvars;
pub mod types;

// Re-export commonly used types
pub use error::{
    BrowseError, ConfigurationError, ConnectionError, ErrorCode, ErrorInfo, ErrorSeverity, OpcUaError,
    OpcUaErrorContext, OpcUaResult, OperationError, SessionError, SinkError, StateError,
    SubscriptionError, TimeoutError,
};

pub use types::{
    ClientSettings, ConnectionStrategy, Endpoint, MonitoredItemSettings, NodeClass, NodeId,
    NodeIdentifier, SubscriptionSettings, TimestampsToReturn,
};

pub use client::{
    ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus, DataValue,
    HandshakeStep, MonitoredItemHandle, MonitoredItemInfo, SessionInfo, StatusCode,
    SubscriptionEvent, SubscriptionId, UaTransport, Variant,
};

pub use browse::{BrowseService, NodeReference, QualifiedName};
pub use fanout::{
    BroadcastSink, DataFanout, FanoutSettings, FanoutStatsSnapshot, PersistenceSink, SinkFailure,
    SinkKind, ValueNotification, VariableValueEvent, VARIABLE_VALUES_TOPIC,
};
pub use gateway::{ConnectResponse, DisconnectResponse, MonitorResponse, RelayGateway};
pub use read::VariableReader;
pub use sinks::{BusMessage, EventBus, EventSubscriber, MemoryPersistence, PersistedRecord};
pub use stdvars::{StandardVariable, STANDARD_VARIABLES};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
