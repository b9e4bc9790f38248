// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol-level types shared by the client, the registry and the gateway.
//!
//! - **NodeId**: the four OPC UA identifier kinds, parsing and well-known aliases
//! - **Endpoint**: a validated `opc.tcp://host:port` target
//! - **SubscriptionSettings / MonitoredItemSettings**: creation parameters
//! - **ConnectionStrategy**: retry budget handed to the transport
//! - **ClientSettings**: everything the connection manager needs
//!
//! # Examples
//!
//! ```
//! use relay_opcua::types::{Endpoint, NodeId};
//!
//! let endpoint = Endpoint::parse("10.0.0.5", "4840").unwrap();
//! assert_eq!(endpoint.url(), "opc.tcp://10.0.0.5:4840");
//!
//! let node = NodeId::resolve("RootFolder").unwrap();
//! assert_eq!(node, NodeId::ROOT_FOLDER);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{ConfigurationError, OpcUaError, OpcUaResult};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA Node Identifier.
///
/// Serialized as its string form (`ns=2;i=5`), which is also what the
/// router layer passes around.
///
/// # Examples
///
/// ```
/// use relay_opcua::types::NodeId;
///
/// let numeric = NodeId::numeric(2, 5);
/// assert_eq!(numeric.to_string(), "ns=2;i=5");
///
/// let parsed: NodeId = "ns=2;s=Line1.Temperature".parse().unwrap();
/// assert_eq!(parsed.as_string(), Some("Line1.Temperature"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    // =========================================================================
    // Well-known Nodes
    // =========================================================================

    /// Root folder (i=84).
    pub const ROOT_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(84),
    };

    /// Objects folder (i=85).
    pub const OBJECTS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(85),
    };

    /// Types folder (i=86).
    pub const TYPES_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(86),
    };

    /// Views folder (i=87).
    pub const VIEWS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(87),
    };

    /// Server object (i=2253).
    pub const SERVER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2253),
    };

    /// Looks up a well-known node by its browse name.
    pub fn from_alias(name: &str) -> Option<Self> {
        match name {
            "RootFolder" => Some(Self::ROOT_FOLDER),
            "ObjectsFolder" => Some(Self::OBJECTS_FOLDER),
            "TypesFolder" => Some(Self::TYPES_FOLDER),
            "ViewsFolder" => Some(Self::VIEWS_FOLDER),
            "Server" => Some(Self::SERVER),
            _ => None,
        }
    }

    /// Resolves a node name as supplied by a router: a well-known alias or
    /// an OPC UA node id string.
    pub fn resolve(name: &str) -> OpcUaResult<Self> {
        let name = name.trim();
        match Self::from_alias(name) {
            Some(node) => Ok(node),
            None => name.parse(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns `true` if this is a numeric identifier.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        matches!(self.identifier, NodeIdentifier::Numeric(_))
    }

    /// Returns `true` if this is a string identifier.
    #[inline]
    pub const fn is_string(&self) -> bool {
        matches!(self.identifier, NodeIdentifier::String(_))
    }

    /// Returns the numeric value, if numeric.
    pub fn as_numeric(&self) -> Option<u32> {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value, if a string identifier.
    pub fn as_string(&self) -> Option<&str> {
        match &self.identifier {
            NodeIdentifier::String(v) => Some(v),
            _ => None,
        }
    }

    /// Converts to the OPC UA string format.
    ///
    /// Format: `ns=<namespace>;{i|s|g|b}=<identifier>`, with `ns=0;` omitted.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses a NodeId from OPC UA string format.
    ///
    /// Supported formats:
    /// - `ns=2;i=1001` (numeric)
    /// - `ns=2;s=MyNode` (string)
    /// - `ns=2;g=550e8400-e29b-41d4-a716-446655440000` (GUID)
    /// - `ns=2;b=SGVsbG8=` (opaque, base64 encoded)
    /// - `i=85` (namespace 0)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| {
            OpcUaError::configuration(ConfigurationError::invalid_node_id(s, reason))
        };

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("missing identifier after namespace".into()))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| invalid(format!("invalid namespace index '{ns}'")))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                id.parse()
                    .map_err(|_| invalid(format!("invalid numeric identifier '{id}'")))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid("empty string identifier".into()));
            }
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(
                Uuid::parse_str(id).map_err(|e| invalid(format!("invalid GUID: {e}")))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(
                BASE64
                    .decode(id)
                    .map_err(|e| invalid(format!("invalid base64: {e}")))?,
            )
        } else {
            return Err(invalid(
                "unknown identifier type, expected i=, s=, g= or b=".into(),
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NodeId::resolve(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// OPC UA node identifier kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// A validated server endpoint.
///
/// Immutable once a connection attempt begins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or address, without scheme.
    pub host: String,

    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint after validating the host.
    ///
    /// IPv6 literals may be given with or without brackets; they are stored
    /// without.
    pub fn new(host: impl Into<String>, port: u16) -> OpcUaResult<Self> {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(literal) => literal.to_string(),
            None => host,
        };
        let invalid = |reason: &str| {
            OpcUaError::configuration(ConfigurationError::invalid_endpoint(
                format!("{host}:{port}"),
                reason,
            ))
        };

        if host.trim().is_empty() {
            return Err(invalid("host is empty"));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(invalid("host must not contain whitespace or '/'"));
        }
        if port == 0 {
            return Err(invalid("port must be between 1 and 65535"));
        }

        Ok(Self { host, port })
    }

    /// Parses the `(url, port)` pair a router receives as strings.
    ///
    /// An `opc.tcp://` prefix on the host is tolerated.
    pub fn parse(host: &str, port: &str) -> OpcUaResult<Self> {
        let host = host.trim();
        let host = host.strip_prefix("opc.tcp://").unwrap_or(host);
        let port: u16 = port.trim().parse().map_err(|_| {
            OpcUaError::configuration(ConfigurationError::invalid_endpoint(
                format!("{host}:{port}"),
                "port is not a number between 1 and 65535",
            ))
        })?;
        Self::new(host, port)
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "opc.tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "opc.tcp://{}:{}", self.host, self.port)
        }
    }
}

// =============================================================================
// NodeClass
// =============================================================================

/// OPC UA node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeClass {
    /// Object node.
    Object,
    /// Variable node.
    Variable,
    /// Method node.
    Method,
    /// Object type node.
    ObjectType,
    /// Variable type node.
    VariableType,
    /// Reference type node.
    ReferenceType,
    /// Data type node.
    DataType,
    /// View node.
    View,
}

impl NodeClass {
    /// Returns the OPC UA bit mask value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Object => 1,
            Self::Variable => 2,
            Self::Method => 4,
            Self::ObjectType => 8,
            Self::VariableType => 16,
            Self::ReferenceType => 32,
            Self::DataType => 64,
            Self::View => 128,
        }
    }

    /// Returns `true` if this node class carries a value.
    pub const fn has_value(&self) -> bool {
        matches!(self, Self::Variable)
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Subscription creation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Requested publishing interval.
    #[serde(default = "default_publishing_interval")]
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Lifetime count, in publishing intervals.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Max keep-alive count.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Maximum notifications per publish.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_publish: u32,

    /// Priority (0-255, higher is more important).
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Publishing enabled.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    10
}

fn default_keepalive_count() -> u32 {
    2
}

fn default_max_notifications() -> u32 {
    10
}

fn default_priority() -> u8 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            keepalive_count: default_keepalive_count(),
            max_notifications_per_publish: default_max_notifications(),
            priority: default_priority(),
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Checks the settings for values the server would reject.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.publishing_interval.is_zero() {
            return Err(ConfigurationError::invalid_setting(
                "subscription.publishing_interval",
                "must be greater than zero",
            )
            .into());
        }
        // The lifetime must cover at least three keep-alive periods.
        if self.lifetime_count < self.keepalive_count.saturating_mul(3) {
            return Err(ConfigurationError::invalid_setting(
                "subscription.lifetime_count",
                format!(
                    "must be at least three times keepalive_count ({})",
                    self.keepalive_count
                ),
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// MonitoredItemSettings
// =============================================================================

/// Which timestamps the server attaches to notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampsToReturn {
    /// Source timestamp only.
    Source,
    /// Server timestamp only.
    Server,
    /// Both timestamps.
    #[default]
    Both,
    /// No timestamps.
    Neither,
}

/// Monitored item creation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemSettings {
    /// Sampling interval.
    #[serde(default = "default_sampling_interval")]
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Server-side queue size.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Discard the oldest value when the queue is full.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,

    /// Timestamps to return.
    #[serde(default)]
    pub timestamps: TimestampsToReturn,
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_queue_size() -> u32 {
    10
}

impl Default for MonitoredItemSettings {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            queue_size: default_queue_size(),
            discard_oldest: true,
            timestamps: TimestampsToReturn::Both,
        }
    }
}

impl MonitoredItemSettings {
    /// Checks the settings for values the server would reject.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.queue_size == 0 {
            return Err(ConfigurationError::invalid_setting(
                "monitoring.queue_size",
                "must be at least 1",
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// ConnectionStrategy
// =============================================================================

/// Retry budget for the transport connect step.
///
/// The connection manager never retries; the transport applies this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStrategy {
    /// Maximum number of retries after the first attempt.
    #[serde(default)]
    pub max_retry: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for the retry delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_millis(200)
}

impl Default for ConnectionStrategy {
    fn default() -> Self {
        Self {
            max_retry: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl ConnectionStrategy {
    /// Exponential backoff capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay * 2u32.saturating_pow(attempt);
        delay.min(self.max_delay)
    }

    /// Total number of attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retry.saturating_add(1)
    }
}

// =============================================================================
// ClientSettings
// =============================================================================

/// Settings for the connection manager and the services built on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Application name presented to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Session name.
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout")]
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Bound for browse and read calls.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Transport connect strategy.
    #[serde(default)]
    pub strategy: ConnectionStrategy,

    /// Subscription created by the handshake.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Defaults for monitored items.
    #[serde(default)]
    pub monitoring: MonitoredItemSettings,
}

fn default_application_name() -> String {
    "ua-relay".to_string()
}

fn default_session_name() -> String {
    "ua-relay-session".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            session_name: default_session_name(),
            session_timeout: default_session_timeout(),
            request_timeout: default_request_timeout(),
            strategy: ConnectionStrategy::default(),
            subscription: SubscriptionSettings::default(),
            monitoring: MonitoredItemSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Validates all nested settings.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.request_timeout.is_zero() {
            return Err(ConfigurationError::invalid_setting(
                "client.request_timeout",
                "must be greater than zero",
            )
            .into());
        }
        if self.session_name.trim().is_empty() {
            return Err(
                ConfigurationError::invalid_setting("client.session_name", "must not be empty")
                    .into(),
            );
        }
        self.subscription.validate()?;
        self.monitoring.validate()
    }
}

// =============================================================================
// humantime_serde helper
// =============================================================================

/// Serde adapter for human-readable durations (`"1s"`, `"250ms"`).
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a humantime string.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    /// Deserializes a duration from a humantime string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
