// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection state machine bookkeeping.
//!
//! Holds the observable [`ConnectionState`], the handshake step names, the
//! server session description and connection counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// =============================================================================
// ConnectionState
// =============================================================================

/// State of the connection manager.
///
/// `Disconnected -> Connecting -> SessionEstablished -> SubscriptionActive`,
/// and back to `Disconnected` on failure or disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No connection or attempt.
    #[default]
    Disconnected,

    /// Handshake running, no session yet.
    Connecting,

    /// Session created; subscription not started yet.
    SessionEstablished,

    /// Subscription started; monitoring allowed.
    SubscriptionActive,
}

impl ConnectionState {
    const fn rank(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::SessionEstablished => 2,
            Self::SubscriptionActive => 3,
        }
    }

    /// Returns `true` if this state is `required` or further along.
    #[inline]
    pub fn has_reached(self, required: ConnectionState) -> bool {
        self.rank() >= required.rank()
    }

    /// Returns `true` if no connection or attempt exists.
    #[inline]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Returns `true` while a handshake is in flight.
    #[inline]
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Connecting | Self::SessionEstablished)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::SessionEstablished => write!(f, "SessionEstablished"),
            Self::SubscriptionActive => write!(f, "SubscriptionActive"),
        }
    }
}

// =============================================================================
// HandshakeStep
// =============================================================================

/// The four sequential handshake steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStep {
    /// Transport-level connect.
    TransportConnect,
    /// Session creation.
    CreateSession,
    /// Root folder browse.
    BrowseRoot,
    /// Subscription creation, waiting for `started`.
    CreateSubscription,
}

impl HandshakeStep {
    /// Steps in execution order.
    pub const ALL: [HandshakeStep; 4] = [
        Self::TransportConnect,
        Self::CreateSession,
        Self::BrowseRoot,
        Self::CreateSubscription,
    ];

    /// Returns the step name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransportConnect => "transport_connect",
            Self::CreateSession => "create_session",
            Self::BrowseRoot => "browse_root",
            Self::CreateSubscription => "create_subscription",
        }
    }
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SessionInfo
// =============================================================================

/// Parameters for session creation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    /// Application name presented to the server.
    pub application_name: String,
    /// Session name.
    pub session_name: String,
    /// Requested session timeout.
    pub timeout: Duration,
}

/// A live server session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session ID (server-assigned).
    pub session_id: String,

    /// Session name.
    pub session_name: String,

    /// Endpoint the session belongs to.
    pub endpoint_url: String,

    /// Server-revised session timeout.
    #[serde(with = "crate::types::humantime_serde")]
    pub revised_timeout: Duration,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Creates new session info stamped with the current time.
    pub fn new(
        session_id: impl Into<String>,
        session_name: impl Into<String>,
        endpoint_url: impl Into<String>,
        revised_timeout: Duration,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            session_name: session_name.into(),
            endpoint_url: endpoint_url.into(),
            revised_timeout,
            created_at: Utc::now(),
        }
    }

    /// Returns the session age.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

// =============================================================================
// StateTracker
// =============================================================================

/// Observable connection state.
///
/// Every transition is traced; subscribers get the latest value.
#[derive(Debug)]
pub(crate) struct StateTracker {
    sender: watch::Sender<ConnectionState>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(ConnectionState::Disconnected);
        Self { sender }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.sender.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.sender.subscribe()
    }

    pub(crate) fn set(&self, new_state: ConnectionState) {
        let old_state = self.sender.send_replace(new_state);
        if old_state != new_state {
            tracing::trace!(
                old_state = %old_state,
                new_state = %new_state,
                "Connection state changed"
            );
        }
    }
}

// =============================================================================
// ConnectionStats
// =============================================================================

/// Counters for connection manager activity.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
    disconnects: AtomicU64,
    keepalives: AtomicU64,
    subscription_errors: AtomicU64,
}

impl ConnectionStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_keepalive(&self) {
        self.keepalives.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_subscription_error(&self) {
        self.subscription_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy.
    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            keepalives: self.keepalives.load(Ordering::Relaxed),
            subscription_errors: self.subscription_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatsSnapshot {
    /// Connect calls that started a handshake.
    pub attempts: u64,
    /// Handshakes that reached `SubscriptionActive`.
    pub successes: u64,
    /// Handshakes that failed at a step.
    pub failures: u64,
    /// Handshakes cancelled by disconnect.
    pub cancelled: u64,
    /// Disconnects that released resources.
    pub disconnects: u64,
    /// Subscription keep-alive events.
    pub keepalives: u64,
    /// Operational subscription errors.
    pub subscription_errors: u64,
}

// =============================================================================
// Tests
// =============================================================================
