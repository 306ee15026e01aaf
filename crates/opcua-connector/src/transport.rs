// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Stack abstraction and wire-facing data types.
//!
//! The connector does not speak the binary protocol itself; it drives an
//! implementation of [`UaStack`], which hands out [`StackSession`] handles.
//! Everything above this module is written against these two traits, which
//! keeps the session registry, builder and subscription bookkeeping fully
//! testable with a scripted in-memory stack.
//!
//! ```text
//! ConnectionRegistry ──► UaStack::create_session ──► StackSession
//!        │                                               │
//!        └── SessionBuilder ──► UaStack::get_endpoints   ├── connect / disconnect
//!                                                        ├── subscriptions
//!                                                        └── monitored items
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{ConfigKey, SecurityMode};
use crate::error::UaResult;
use crate::session::builder::SessionConfig;

// =============================================================================
// Identifiers and Status
// =============================================================================

/// Server-assigned subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u32);

impl SubscriptionId {
    /// Creates a subscription ID from a raw value.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Server-assigned monitored item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoredItemId(u32);

impl MonitoredItemId {
    /// Creates a monitored item ID from a raw value.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MonitoredItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mi-{}", self.0)
    }
}

/// OPC UA status code.
///
/// The top two bits carry the severity: `00` good, `01` uncertain,
/// `10` bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The all-good status code.
    pub const GOOD: StatusCode = StatusCode(0);

    /// Returns `true` if the severity bits indicate success.
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity bits indicate failure.
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// =============================================================================
// Service Enums
// =============================================================================

/// Which timestamps the server returns with each notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
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

/// Monitoring mode of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Item exists but is not sampled.
    Disabled,
    /// Item is sampled but notifications are not queued.
    Sampling,
    /// Item is sampled and notifications are delivered.
    #[default]
    Reporting,
}

/// Attribute of a node to monitor or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    /// The node's identifier.
    NodeId,
    /// The node's class.
    NodeClass,
    /// The browse name.
    BrowseName,
    /// The display name.
    DisplayName,
    /// The description text.
    Description,
    /// The event notifier byte.
    EventNotifier,
    /// The current value.
    #[default]
    Value,
    /// The value's data type.
    DataType,
    /// The access level byte.
    AccessLevel,
}

impl AttributeId {
    /// Returns the numeric attribute ID from the address space model.
    pub fn value(&self) -> u32 {
        match self {
            Self::NodeId => 1,
            Self::NodeClass => 2,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::Description => 5,
            Self::EventNotifier => 12,
            Self::Value => 13,
            Self::DataType => 14,
            Self::AccessLevel => 17,
        }
    }
}

// =============================================================================
// Values and Notifications
// =============================================================================

/// A value delivered by the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// No value.
    #[default]
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed integer value.
    Int64(i64),
    /// Unsigned integer value.
    UInt64(u64),
    /// Floating point value.
    Double(f64),
    /// Text value.
    String(String),
    /// Raw byte string.
    ByteString(Vec<u8>),
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// A value together with its quality and timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value itself.
    pub value: Variant,
    /// Quality of the value.
    pub status: StatusCode,
    /// When the underlying source produced the value.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// When the server observed the value.
    pub server_timestamp: Option<DateTime<Utc>>,
}

/// One data change delivered for a monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    /// The subscription that produced the change.
    pub subscription_id: SubscriptionId,
    /// The monitored item that changed.
    pub monitored_item_id: MonitoredItemId,
    /// Caller-chosen handle from the create request.
    pub client_handle: u32,
    /// The monitored node.
    pub node_id: String,
    /// The new value.
    pub value: DataValue,
}

/// Callback invoked by the stack for every data change of an item.
///
/// Implementations must never block: the stack calls this from its
/// delivery task.
pub type ValueConsumer = Arc<dyn Fn(DataChangeNotification) + Send + Sync>;

// =============================================================================
// Requests and Handles
// =============================================================================

/// Parameters for creating one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateRequest {
    /// The node to monitor, e.g. `ns=2;s=Line1.Speed`.
    pub node_id: String,
    /// Which attribute to monitor.
    pub attribute_id: AttributeId,
    /// Caller-chosen handle echoed back in notifications.
    pub client_handle: u32,
    /// Requested sampling interval in milliseconds.
    pub sampling_interval_ms: f64,
    /// Requested notification queue size.
    pub queue_size: u32,
    /// Drop the oldest queued notification on overflow.
    pub discard_oldest: bool,
    /// Initial monitoring mode.
    pub monitoring_mode: MonitoringMode,
}

impl MonitoredItemCreateRequest {
    /// Creates a request for the value attribute with common defaults.
    pub fn new(node_id: impl Into<String>, client_handle: u32) -> Self {
        Self {
            node_id: node_id.into(),
            attribute_id: AttributeId::Value,
            client_handle,
            sampling_interval_ms: 1_000.0,
            queue_size: 10,
            discard_oldest: true,
            monitoring_mode: MonitoringMode::Reporting,
        }
    }
}

/// Result of creating one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemHandle {
    /// Server-assigned identifier.
    pub id: MonitoredItemId,
    /// Caller-chosen handle from the request.
    pub client_handle: u32,
    /// The monitored node.
    pub node_id: String,
    /// The monitored attribute.
    pub attribute_id: AttributeId,
    /// Per-item creation status; may be bad while the call succeeds.
    pub status: StatusCode,
    /// Sampling interval granted by the server.
    pub revised_sampling_interval_ms: f64,
    /// Queue size granted by the server.
    pub revised_queue_size: u32,
}

/// Parameters for creating a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Requested publishing interval in milliseconds.
    pub publishing_interval_ms: f64,
    /// Publishing intervals the subscription survives without traffic.
    pub lifetime_count: u32,
    /// Publishing intervals between keep-alive messages.
    pub max_keepalive_count: u32,
    /// Maximum notifications per publish response, 0 for unlimited.
    pub max_notifications_per_publish: u32,
    /// Relative priority among subscriptions of the session.
    pub priority: u8,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval_ms: 1_000.0,
            lifetime_count: 60,
            max_keepalive_count: 10,
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }
}

// =============================================================================
// Discovery Types
// =============================================================================

/// One endpoint advertised by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescription {
    /// The endpoint's own URL; may differ from the discovery URL.
    pub endpoint_url: String,
    /// Security mode of the endpoint.
    pub security_mode: SecurityMode,
    /// Security policy URI of the endpoint.
    pub security_policy_uri: String,
    /// Server-assigned relative security strength.
    pub security_level: u8,
    /// DER-encoded server certificate, absent for unsecured endpoints.
    pub server_certificate: Option<Vec<u8>>,
}

/// One server returned by a find-servers request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationDescription {
    /// Globally unique application URI.
    pub application_uri: String,
    /// Human-readable application name.
    pub application_name: String,
    /// Discovery URLs the application listens on.
    pub discovery_urls: Vec<String>,
}

// =============================================================================
// Events
// =============================================================================

/// Subscription lifecycle events published by the stack.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The subscription is alive but had nothing to publish.
    KeepAlive {
        /// The affected subscription.
        subscription_id: SubscriptionId,
        /// Server publish time of the keep-alive.
        publish_time: DateTime<Utc>,
    },
    /// The subscription's status changed.
    StatusChanged {
        /// The affected subscription.
        subscription_id: SubscriptionId,
        /// The new status.
        status: StatusCode,
    },
    /// A publish request failed.
    PublishFailure {
        /// Failure description.
        message: String,
    },
    /// The server dropped notifications for the subscription.
    NotificationDataLost {
        /// The affected subscription.
        subscription_id: SubscriptionId,
    },
    /// The subscription could not be transferred to a new session and
    /// must be recreated by the application.
    TransferFailed {
        /// The affected subscription.
        subscription_id: SubscriptionId,
        /// Status code of the failed transfer.
        status: StatusCode,
    },
}

/// Work the application must pick up, published by the connector.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// A subscription was lost and needs to be recreated.
    RecreateSubscription {
        /// Configuration key of the affected server.
        key: ConfigKey,
        /// The lost subscription.
        subscription_id: SubscriptionId,
        /// Status code of the failed transfer.
        status: StatusCode,
    },
}

// =============================================================================
// Stack Traits
// =============================================================================

/// Entry point into a protocol stack implementation.
#[async_trait]
pub trait UaStack: Send + Sync {
    /// Asks the server at `endpoint_url` for its advertised endpoints.
    async fn get_endpoints(&self, endpoint_url: &str) -> UaResult<Vec<EndpointDescription>>;

    /// Asks the discovery server at `endpoint_url` for known servers.
    async fn find_servers(&self, endpoint_url: &str) -> UaResult<Vec<ApplicationDescription>>;

    /// Creates an unconnected session from a fully built configuration.
    async fn create_session(&self, config: &SessionConfig) -> UaResult<Box<dyn StackSession>>;
}

/// One protocol-level session.
///
/// `connect` is called exactly once per session; a session that failed to
/// connect is disconnected and discarded, never retried.
#[async_trait]
pub trait StackSession: Send + Sync {
    /// Establishes the secure channel and activates the session.
    async fn connect(&self) -> UaResult<()>;

    /// Closes the session and releases the secure channel.
    async fn disconnect(&self) -> UaResult<()>;

    /// Creates a subscription and returns its server-assigned ID.
    async fn create_subscription(&self, settings: &SubscriptionSettings)
        -> UaResult<SubscriptionId>;

    /// Deletes a subscription, returning the service-level status.
    async fn delete_subscription(&self, subscription_id: SubscriptionId) -> UaResult<StatusCode>;

    /// Creates monitored items, installing `on_value` for each of them.
    async fn create_monitored_items(
        &self,
        subscription_id: SubscriptionId,
        timestamps: TimestampsToReturn,
        requests: Vec<MonitoredItemCreateRequest>,
        on_value: ValueConsumer,
    ) -> UaResult<Vec<MonitoredItemHandle>>;

    /// Deletes monitored items, returning one status per requested item.
    async fn delete_monitored_items(
        &self,
        subscription_id: SubscriptionId,
        item_ids: &[MonitoredItemId],
    ) -> UaResult<Vec<StatusCode>>;

    /// Installs the receiver for subscription lifecycle events.
    fn set_event_listener(&self, listener: mpsc::UnboundedSender<SubscriptionEvent>);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_severity_bits() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        let bad = StatusCode(0x8000_0000);
        assert!(bad.is_bad());
        assert!(!bad.is_good());
        let uncertain = StatusCode(0x4000_0000);
        assert!(!uncertain.is_good());
        assert!(!uncertain.is_bad());
    }

    #[test]
    fn ids_format_with_prefix() {
        assert_eq!(SubscriptionId::new(3).to_string(), "sub-3");
        assert_eq!(MonitoredItemId::new(12).to_string(), "mi-12");
    }

    #[test]
    fn create_request_defaults_target_the_value_attribute() {
        let request = MonitoredItemCreateRequest::new("ns=2;s=Speed", 1);
        assert_eq!(request.attribute_id, AttributeId::Value);
        assert_eq!(request.attribute_id.value(), 13);
        assert_eq!(request.monitoring_mode, MonitoringMode::Reporting);
        assert!(request.discard_oldest);
    }

    #[test]
    fn subscription_settings_default_to_enabled() {
        let settings = SubscriptionSettings::default();
        assert!(settings.publishing_enabled);
        assert!(settings.publishing_interval_ms > 0.0);
    }
}
