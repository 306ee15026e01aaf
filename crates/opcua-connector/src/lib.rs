// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection-reusing OPC UA client connector.
//!
//! This crate manages the client side of OPC UA server connections:
//! configuration validation, endpoint discovery, secure session
//! establishment, certificate trust, and subscription bookkeeping. The
//! protocol stack itself is abstracted behind the [`transport::UaStack`]
//! trait.
//!
//! ```text
//! ServerConfig ──► SessionBuilder ──► SessionConfig
//!                       │                  │
//!     TrustStore ◄── TrustValidator        ▼
//!                                   ConnectionRegistry ──► Session (cached per key)
//!                                                              │
//!                                                     SubscriptionTracker
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use opcua_connector::{
//!     ApplicationIdentity, ConnectionRegistry, ServerConfig, TrustStore, TrustValidator,
//! };
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn run(stack: Arc<dyn opcua_connector::UaStack>) -> opcua_connector::UaResult<()> {
//! let store = TrustStore::open(TrustStore::default_dir()).await?;
//! let (workflow_tx, _workflow_rx) = mpsc::unbounded_channel();
//! let registry = ConnectionRegistry::new(
//!     stack,
//!     ApplicationIdentity::new("my-client", "urn:factory:line1:client"),
//!     Arc::new(TrustValidator::new(store)),
//!     workflow_tx,
//! );
//!
//! let config = ServerConfig::builder("plc-7", "Packaging line PLC")
//!     .endpoint_url("opc.tcp://10.0.0.7:4840")
//!     .no_security()
//!     .build();
//! let session = registry.get_or_create(&config).await?;
//! # let _ = session;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod certificate;
pub mod config;
pub mod discovery;
pub mod error;
pub mod session;
pub mod subscription;
pub mod transport;

// Re-export commonly used types
pub use error::{
    CertificateError, DiscoveryError, SubscriptionError, UaError, UaResult, ValidationError,
};

pub use config::{
    security_policy, ApplicationIdentity, CertificateDocument, CertificateHolder, ConfigKey,
    IdentityToken, PrivateKeyDocument, SecurityMode, ServerConfig, ServerConfigBuilder,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SESSION_TIMEOUT_MS,
};

pub use certificate::{
    parse_certificate, parse_private_key, thumbprint, Certificate, KeyPair, PrivateKey, TrustStore,
    TrustValidator,
};

pub use discovery::{EndpointResolver, EndpointUrl, DEFAULT_OPC_TCP_PORT};

pub use session::builder::{IdentityProvider, SessionBuilder, SessionConfig};
pub use session::registry::ConnectionRegistry;
pub use session::Session;

pub use subscription::{ItemTable, SubscriptionTracker};

pub use transport::{
    ApplicationDescription, AttributeId, DataChangeNotification, DataValue, EndpointDescription,
    MonitoredItemCreateRequest, MonitoredItemHandle, MonitoredItemId, MonitoringMode, StackSession,
    StatusCode, SubscriptionEvent, SubscriptionId, SubscriptionSettings, TimestampsToReturn,
    UaStack, ValueConsumer, Variant, WorkflowEvent,
};
