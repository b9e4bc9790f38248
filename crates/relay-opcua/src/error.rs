// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the relay core.
//!
//! Protocol failures surface as [`OpcUaError`], grouped by the stage of the
//! client lifecycle that produced them. Sink failures never become protocol
//! errors; they are reported separately as [`SinkError`].
//!
//! # Error Categories
//!
//! ```text
//! OpcUaError
//! ├── Connection    - Transport link failures (terminal for an attempt)
//! ├── Session       - Session creation and lifecycle
//! ├── Browse        - Per-call browse failures
//! ├── Operation     - Per-call read failures
//! ├── Subscription  - Subscription creation, stale registry, monitored items
//! ├── State         - Precondition, busy, cancelled handshake
//! ├── Configuration - Invalid caller input (node ids, endpoints, slots)
//! └── Timeout       - Bounded requests that ran out of time
//! ```
//!
//! Every category describes its variants once through [`ErrorInfo`]: code,
//! severity, retry advice and recovery hints.
//!
//! # Examples
//!
//! ```
//! use relay_opcua::error::{ConnectionError, ErrorSeverity, OpcUaError};
//!
//! let error = OpcUaError::from(ConnectionError::refused("opc.tcp://localhost:4840"));
//!
//! assert_eq!(error.category(), "connection");
//! assert_eq!(error.severity(), ErrorSeverity::Error);
//! assert_eq!(error.error_code().to_string(), "UA-0101");
//! assert!(!error.recovery_hints().is_empty());
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::client::{ConnectionState, HandshakeStep};

// =============================================================================
// ErrorInfo
// =============================================================================

/// Static description of one error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Structured code.
    pub code: ErrorCode,
    /// How loudly the error is logged.
    pub severity: ErrorSeverity,
    /// Whether the caller may retry the same call.
    pub retryable: bool,
    /// Suggestions for the operator.
    pub hints: &'static [&'static str],
}

impl ErrorInfo {
    const fn new(
        code: ErrorCode,
        severity: ErrorSeverity,
        retryable: bool,
        hints: &'static [&'static str],
    ) -> Self {
        Self {
            code,
            severity,
            retryable,
            hints,
        }
    }
}

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for relay operations.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Transport link errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Node browsing errors.
    #[error("{0}")]
    Browse(#[from] BrowseError),

    /// Read operation errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Subscription and monitoring errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Connection state machine errors.
    #[error("{0}")]
    State(#[from] StateError),

    /// Caller input errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl OpcUaError {
    /// Wraps a caller input error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// The registry was invalidated by a terminated subscription.
    pub fn stale() -> Self {
        Self::Subscription(SubscriptionError::Stale)
    }

    /// `operation` was called before the connection reached `required`.
    pub fn precondition(
        operation: &'static str,
        required: ConnectionState,
        actual: ConnectionState,
    ) -> Self {
        Self::State(StateError::precondition(operation, required, actual))
    }

    /// Returns the description of the wrapped variant.
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::Connection(e) => e.info(),
            Self::Session(e) => e.info(),
            Self::Browse(e) => e.info(),
            Self::Operation(e) => e.info(),
            Self::Subscription(e) => e.info(),
            Self::State(e) => e.info(),
            Self::Configuration(e) => e.info(),
            Self::Timeout(e) => e.info(),
        }
    }

    /// Returns `true` if the caller may retry.
    ///
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        self.info().retryable
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        self.info().severity
    }

    /// Returns the structured error code.
    pub fn error_code(&self) -> ErrorCode {
        self.info().code
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> &'static [&'static str] {
        self.info().hints
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
            Self::Browse(_) => "browse",
            Self::Operation(_) => "operation",
            Self::Subscription(_) => "subscription",
            Self::State(_) => "state",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns `true` if the error means the registry no longer accepts work.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Subscription(SubscriptionError::Stale))
    }

    /// Returns `true` if the error is a failed precondition.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::State(StateError::Precondition { .. }))
    }

    /// Logs this error at its severity with `context`.
    pub fn log(&self, context: &str) {
        let info = self.info();
        match info.severity {
            ErrorSeverity::Error => tracing::error!(
                error_code = %info.code,
                category = self.category(),
                context,
                retryable = info.retryable,
                "{self}"
            ),
            ErrorSeverity::Warning => tracing::warn!(
                error_code = %info.code,
                category = self.category(),
                context,
                retryable = info.retryable,
                "{self}"
            ),
            ErrorSeverity::Info => tracing::debug!(
                error_code = %info.code,
                category = self.category(),
                context,
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Transport link errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The server refused the link.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Target endpoint.
        endpoint: String,
    },

    /// The link closed or could not be closed cleanly.
    #[error("Connection closed unexpectedly{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// A call needed a link that does not exist.
    #[error("Not connected to OPC UA server")]
    NotConnected,
}

impl ConnectionError {
    /// Refused by `endpoint`.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
        }
    }

    /// Closed, optionally with a reason.
    pub fn closed(reason: Option<String>) -> Self {
        Self::Closed { reason }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::Refused { .. } => ErrorInfo::new(
                ErrorCode::new(1, 1),
                ErrorSeverity::Error,
                true,
                &[
                    "Check that the OPC UA server is running",
                    "Verify the host and port passed to connect",
                ],
            ),
            Self::Closed { .. } => ErrorInfo::new(
                ErrorCode::new(1, 2),
                ErrorSeverity::Warning,
                true,
                &["Connect again"],
            ),
            Self::NotConnected => ErrorInfo::new(
                ErrorCode::new(1, 3),
                ErrorSeverity::Warning,
                true,
                &["Call connect() before performing operations"],
            ),
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server rejected session creation.
    #[error("Failed to create session: {message}")]
    CreationFailed {
        /// Server message.
        message: String,
    },

    /// Session is no longer valid on the server.
    #[error("Session expired{}", .session_id.as_deref().map(|s| format!(": {s}")).unwrap_or_default())]
    Expired {
        /// Session ID.
        session_id: Option<String>,
    },

    /// Closing the session failed.
    #[error("Failed to close session '{session_id}': {message}")]
    CloseFailed {
        /// Session ID.
        session_id: String,
        /// Server message.
        message: String,
    },
}

impl SessionError {
    /// Creation rejected with `message`.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// The session is unknown to the server.
    pub fn expired(session_id: Option<String>) -> Self {
        Self::Expired { session_id }
    }

    /// Closing `session_id` failed.
    pub fn close_failed(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CloseFailed {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::CreationFailed { .. } => ErrorInfo::new(
                ErrorCode::new(2, 1),
                ErrorSeverity::Error,
                true,
                &["Check the server's session limits", "Disconnect and connect again"],
            ),
            Self::Expired { .. } => ErrorInfo::new(
                ErrorCode::new(2, 2),
                ErrorSeverity::Warning,
                true,
                &["Disconnect and connect again to open a new session"],
            ),
            Self::CloseFailed { .. } => ErrorInfo::new(
                ErrorCode::new(2, 3),
                ErrorSeverity::Warning,
                false,
                &["The server expires abandoned sessions on its own"],
            ),
        }
    }
}

// =============================================================================
// BrowseError
// =============================================================================

/// Node browsing errors.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// The node is not in the server's address space.
    #[error("Node not found: '{node_id}'")]
    NodeNotFound {
        /// Node ID.
        node_id: String,
    },

    /// The server failed the browse request.
    #[error("Browse failed for node '{node_id}': {message}")]
    BrowseFailed {
        /// Node ID.
        node_id: String,
        /// Server message.
        message: String,
    },
}

impl BrowseError {
    /// `node_id` does not exist.
    pub fn node_not_found(node_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_id: node_id.into(),
        }
    }

    /// Browsing `node_id` failed with `message`.
    pub fn browse_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrowseFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::NodeNotFound { .. } => ErrorInfo::new(
                ErrorCode::new(4, 1),
                ErrorSeverity::Warning,
                false,
                &[
                    "Verify the node ID exists on the server",
                    "Browse the parent node to list valid children",
                ],
            ),
            Self::BrowseFailed { .. } => ErrorInfo::new(
                ErrorCode::new(4, 2),
                ErrorSeverity::Error,
                true,
                &["Retry the browse request"],
            ),
        }
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Read operation errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The read request itself failed.
    #[error("Read failed for node '{node_id}': {message}")]
    ReadFailed {
        /// Node ID.
        node_id: String,
        /// Server message.
        message: String,
    },

    /// The server answered with a bad status.
    #[error("Bad status {} (0x{status_code:08X}) for node '{node_id}'", OperationError::status_code_name(*.status_code))]
    BadStatus {
        /// Node ID.
        node_id: String,
        /// OPC UA status code.
        status_code: u32,
    },
}

impl OperationError {
    /// Reading `node_id` failed with `message`.
    pub fn read_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReadFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// The value of `node_id` carried a bad status.
    pub fn bad_status(node_id: impl Into<String>, status_code: u32) -> Self {
        Self::BadStatus {
            node_id: node_id.into(),
            status_code,
        }
    }

    /// Returns the symbolic name of well-known status codes.
    pub fn status_code_name(code: u32) -> &'static str {
        match code {
            0x0000_0000 => "Good",
            0x4000_0000 => "Uncertain",
            0x8000_0000 => "Bad",
            0x8001_0000 => "BadUnexpectedError",
            0x8002_0000 => "BadInternalError",
            0x8005_0000 => "BadCommunicationError",
            0x800A_0000 => "BadTimeout",
            0x800C_0000 => "BadShutdown",
            0x800D_0000 => "BadServerNotConnected",
            0x801F_0000 => "BadUserAccessDenied",
            0x8025_0000 => "BadSessionIdInvalid",
            0x8026_0000 => "BadSessionClosed",
            0x8028_0000 => "BadSubscriptionIdInvalid",
            0x8033_0000 => "BadNodeIdInvalid",
            0x8034_0000 => "BadNodeIdUnknown",
            0x8035_0000 => "BadAttributeIdInvalid",
            0x803A_0000 => "BadNotReadable",
            0x803E_0000 => "BadNotFound",
            0x809B_0000 => "BadNoData",
            _ => "Unknown",
        }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::ReadFailed { .. } => ErrorInfo::new(
                ErrorCode::new(5, 1),
                ErrorSeverity::Error,
                true,
                &["Verify the node exists and is a variable", "Retry the read"],
            ),
            Self::BadStatus { status_code, .. } => ErrorInfo::new(
                ErrorCode::new(5, 2),
                ErrorSeverity::Error,
                // Transient transport statuses only.
                matches!(*status_code, 0x800A_0000 | 0x8005_0000),
                &["Inspect the status code on the server side"],
            ),
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitoring errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Subscription creation failed before it reported `started`.
    #[error("Failed to create subscription: {message}")]
    CreationFailed {
        /// Server message.
        message: String,
    },

    /// The subscription terminated and the registry was invalidated.
    #[error("Subscription terminated; monitored items are stale")]
    Stale,

    /// Monitored item creation failed.
    #[error("Failed to create monitored item for node '{node_id}': {message}")]
    MonitoredItemFailed {
        /// Node ID.
        node_id: String,
        /// Server message.
        message: String,
    },

    /// The node is already monitored on this subscription.
    #[error("Node '{node_id}' is already monitored")]
    AlreadyMonitored {
        /// Node ID.
        node_id: String,
    },

    /// The server reported an operational subscription error.
    #[error("Subscription {subscription_id} reported an error: {message}")]
    Reported {
        /// Subscription ID.
        subscription_id: u32,
        /// Server message.
        message: String,
    },
}

impl SubscriptionError {
    /// Creation failed with `message`.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creating an item on `node_id` failed with `message`.
    pub fn monitored_item_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MonitoredItemFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// `node_id` already has an item.
    pub fn already_monitored(node_id: impl Into<String>) -> Self {
        Self::AlreadyMonitored {
            node_id: node_id.into(),
        }
    }

    /// The server reported `message` on a live subscription.
    pub fn reported(subscription_id: u32, message: impl Into<String>) -> Self {
        Self::Reported {
            subscription_id,
            message: message.into(),
        }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::CreationFailed { .. } => ErrorInfo::new(
                ErrorCode::new(6, 1),
                ErrorSeverity::Error,
                true,
                &["Check the server's subscription limits", "Connect again"],
            ),
            Self::Stale => ErrorInfo::new(
                ErrorCode::new(6, 2),
                ErrorSeverity::Warning,
                false,
                &[
                    "The subscription terminated on the server",
                    "Disconnect and connect again before monitoring",
                ],
            ),
            Self::MonitoredItemFailed { .. } => ErrorInfo::new(
                ErrorCode::new(6, 3),
                ErrorSeverity::Error,
                true,
                &[
                    "Verify the node exists and is a variable",
                    "Check the server's monitored item limits",
                ],
            ),
            Self::AlreadyMonitored { .. } => ErrorInfo::new(
                ErrorCode::new(6, 4),
                ErrorSeverity::Warning,
                false,
                &["The existing item keeps delivering values"],
            ),
            Self::Reported { .. } => ErrorInfo::new(
                ErrorCode::new(6, 5),
                ErrorSeverity::Warning,
                false,
                &["Check server logs for the subscription"],
            ),
        }
    }
}

// =============================================================================
// StateError
// =============================================================================

/// Connection state machine errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The operation needs a state the connection has not reached.
    #[error("{operation} requires state {required}, current state is {actual}")]
    Precondition {
        /// Rejected operation.
        operation: &'static str,
        /// Minimum required state.
        required: ConnectionState,
        /// State at the time of the call.
        actual: ConnectionState,
    },

    /// A connection attempt or live connection already exists.
    #[error("Connection manager is busy (state {state})")]
    Busy {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// Disconnect was requested while the handshake was running.
    #[error("Disconnected during handshake at step '{step}'")]
    DisconnectedDuringHandshake {
        /// Step that was in flight.
        step: HandshakeStep,
    },
}

impl StateError {
    /// See [`OpcUaError::precondition`].
    pub fn precondition(
        operation: &'static str,
        required: ConnectionState,
        actual: ConnectionState,
    ) -> Self {
        Self::Precondition {
            operation,
            required,
            actual,
        }
    }

    /// Rejected while in `state`.
    pub fn busy(state: ConnectionState) -> Self {
        Self::Busy { state }
    }

    /// Cancelled while `step` was running.
    pub fn disconnected_during_handshake(step: HandshakeStep) -> Self {
        Self::DisconnectedDuringHandshake { step }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::Precondition { .. } => ErrorInfo::new(
                ErrorCode::new(7, 1),
                ErrorSeverity::Warning,
                false,
                &["Call connect() and wait for it to complete"],
            ),
            Self::Busy { .. } => ErrorInfo::new(
                ErrorCode::new(7, 2),
                ErrorSeverity::Warning,
                true,
                &[
                    "Wait for the pending connect to finish",
                    "Call disconnect() before connecting elsewhere",
                ],
            ),
            Self::DisconnectedDuringHandshake { .. } => ErrorInfo::new(
                ErrorCode::new(7, 3),
                ErrorSeverity::Info,
                false,
                &["Connect again if still required"],
            ),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Caller input errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Invalid endpoint.
    #[error("Invalid endpoint: {url} ({reason})")]
    InvalidEndpoint {
        /// The rejected endpoint.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid node ID format.
    #[error("Invalid node ID format: {node_id} ({reason})")]
    InvalidNodeId {
        /// The rejected node ID.
        node_id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Slot outside the standard variable table.
    #[error("Invalid standard variable slot {slot} (table has {len} entries)")]
    InvalidSlot {
        /// Requested slot.
        slot: usize,
        /// Table length.
        len: usize,
    },

    /// Invalid setting value.
    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting {
        /// Setting name.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigurationError {
    /// `url` is not a usable endpoint.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// `node_id` does not parse.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// `slot` is past the end of a table of `len` entries.
    pub fn invalid_slot(slot: usize, len: usize) -> Self {
        Self::InvalidSlot { slot, len }
    }

    /// `field` holds an unusable value.
    pub fn invalid_setting(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        let invalid = |code: u8, hints: &'static [&'static str]| {
            ErrorInfo::new(ErrorCode::new(8, code), ErrorSeverity::Warning, false, hints)
        };
        match self {
            Self::InvalidEndpoint { .. } => invalid(
                1,
                &["Provide a host without scheme and a port between 1 and 65535"],
            ),
            Self::InvalidNodeId { .. } => invalid(
                2,
                &[
                    "Use format: ns=<namespace>;i=<numeric> or ns=<namespace>;s=<string>",
                    "Well-known names like RootFolder are also accepted",
                ],
            ),
            Self::InvalidSlot { .. } => {
                invalid(3, &["Use a slot listed by the standard variable table"])
            }
            Self::InvalidSetting { .. } => invalid(4, &["Check the relay configuration"]),
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Bounded requests that ran out of time.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// A browse call.
    #[error("Browse operation timed out after {duration:?}")]
    Browse {
        /// Bound that elapsed.
        duration: Duration,
    },

    /// A read call.
    #[error("Read operation timed out after {duration:?}")]
    Read {
        /// Bound that elapsed.
        duration: Duration,
    },

    /// A handshake request.
    #[error("Request timed out after {duration:?}")]
    Request {
        /// Bound that elapsed.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Browse exceeded `duration`.
    pub fn browse(duration: Duration) -> Self {
        Self::Browse { duration }
    }

    /// Read exceeded `duration`.
    pub fn read(duration: Duration) -> Self {
        Self::Read { duration }
    }

    /// A handshake step exceeded `duration`.
    pub fn request(duration: Duration) -> Self {
        Self::Request { duration }
    }

    /// Describes this error.
    pub fn info(&self) -> ErrorInfo {
        let code = match self {
            Self::Browse { .. } => 1,
            Self::Read { .. } => 2,
            Self::Request { .. } => 3,
        };
        ErrorInfo::new(
            ErrorCode::new(9, code),
            ErrorSeverity::Warning,
            true,
            &["Check network connectivity", "Increase client.request_timeout"],
        )
    }
}

// =============================================================================
// SinkError
// =============================================================================

/// Failure of an outbound sink.
///
/// Sink errors stay inside the fan-out; they are logged, counted and sent on
/// the sink's failure channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The sink cannot accept writes right now.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The sink rejected the write.
    #[error("Sink rejected write: {0}")]
    Rejected(String),

    /// The sink did not answer within the configured bound.
    #[error("Sink timed out after {0:?}")]
    TimedOut(Duration),
}

impl SinkError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates a rejected error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Expected outcome, logged at debug.
    Info,
    /// The call failed but the relay is healthy.
    Warning,
    /// The server or link misbehaved.
    Error,
}

impl ErrorSeverity {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code, displayed as `UA-CCNN`.
///
/// Categories: 1 connection, 2 session, 4 browse, 5 operation,
/// 6 subscription, 7 state, 8 configuration, 9 timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Variant within the category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with OpcUaError.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// Error Context Extension
// =============================================================================

/// Extension trait for attaching log context to relay errors.
pub trait OpcUaErrorContext<T> {
    /// Logs the error with the node it concerns.
    fn with_node(self, node_id: &str) -> Result<T, OpcUaError>;
}

impl<T> OpcUaErrorContext<T> for Result<T, OpcUaError> {
    fn with_node(self, node_id: &str) -> Result<T, OpcUaError> {
        self.map_err(|e| {
            tracing::debug!(node_id, error = %e, "OPC UA error with node context");
            e
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
