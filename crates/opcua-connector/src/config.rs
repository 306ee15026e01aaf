// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server configuration types.
//!
//! A [`ServerConfig`] is a passive description of one OPC UA server: where
//! it lives, how the channel is secured and which identity the client
//! presents. Construction goes through [`ServerConfigBuilder`]; validation
//! is deferred to the session builder so that a config can be assembled
//! incrementally and stored before it is ever used.
//!
//! ```rust
//! use opcua_connector::config::{IdentityToken, SecurityMode, ServerConfig};
//!
//! let config = ServerConfig::builder("plc-7", "Packaging line PLC")
//!     .endpoint_url("opc.tcp://10.0.0.7:4840")
//!     .security_mode(SecurityMode::None)
//!     .identity(IdentityToken::Anonymous)
//!     .build();
//! assert_eq!(config.key.as_str(), "plc-7");
//! ```

use std::fmt;
use serde::{Deserialize, Serialize};

/// Request timeout applied when the configuration leaves it unset.
pub const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 3_000;

/// Session timeout applied when the configuration leaves it unset.
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = 120_000;

/// Well-known OPC UA security policy URIs.
pub mod security_policy {
    /// No security.
    pub const NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
    /// Basic128Rsa15 (deprecated by the standard, still deployed).
    pub const BASIC128_RSA15: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
    /// Basic256.
    pub const BASIC256: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
    /// Basic256Sha256.
    pub const BASIC256_SHA256: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";
    /// Aes128-Sha256-RsaOaep.
    pub const AES128_SHA256_RSA_OAEP: &str =
        "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep";
    /// Aes256-Sha256-RsaPss.
    pub const AES256_SHA256_RSA_PSS: &str =
        "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss";
}

// =============================================================================
// ConfigKey
// =============================================================================

/// Stable identity of a server configuration.
///
/// The key is what the connection registry caches sessions under; two
/// configs with the same key are treated as the same server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigKey(String);

impl ConfigKey {
    /// Creates a key from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ConfigKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// =============================================================================
// SecurityMode
// =============================================================================

/// Message security mode of the secure channel.
///
/// `Invalid` represents an unset or unrecognized mode; validation rejects
/// it before any network traffic, which keeps every later `match` on this
/// enum total without a catch-all arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No signing or encryption.
    None,
    /// Messages are signed but not encrypted.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
    /// Unset or unrecognized; rejected at validation.
    #[default]
    Invalid,
}

impl SecurityMode {
    /// Returns `true` for modes that require certificate material.
    pub fn is_secured(&self) -> bool {
        matches!(self, Self::Sign | Self::SignAndEncrypt)
    }

    /// Returns the snake_case name used in logs and messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sign => "sign",
            Self::SignAndEncrypt => "sign_and_encrypt",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Documents
// =============================================================================

/// Raw certificate bytes as supplied by the caller, PEM or DER.
///
/// `next` links to the issuing certificate; following the links from a
/// leaf yields the chain in leaf-to-root order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateDocument {
    /// PEM or DER encoded X.509 certificate.
    pub content: Vec<u8>,
    /// The issuing certificate, if the caller supplied a chain.
    pub next: Option<Box<CertificateDocument>>,
}

impl CertificateDocument {
    /// Creates a document with no issuer link.
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            next: None,
        }
    }

    /// Links the issuing certificate and returns the updated document.
    pub fn with_issuer(mut self, issuer: CertificateDocument) -> Self {
        self.next = Some(Box::new(issuer));
        self
    }

    /// Returns `true` if any bytes were supplied.
    pub fn has_contents(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Raw private key bytes plus the decryption password.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateKeyDocument {
    /// PEM encoded encrypted private key.
    pub content: Vec<u8>,
    /// Decryption password; `None` means the caller never set one.
    pub password: Option<String>,
}

impl PrivateKeyDocument {
    /// Creates a document with the given content and password.
    pub fn new(content: impl Into<Vec<u8>>, password: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            password: Some(password.into()),
        }
    }

    /// Returns `true` if any bytes were supplied.
    pub fn has_contents(&self) -> bool {
        !self.content.is_empty()
    }
}

/// The application instance certificate together with its private key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateHolder {
    /// Leaf certificate, optionally chained through `next` links.
    pub certificate: CertificateDocument,
    /// The matching private key.
    pub private_key: PrivateKeyDocument,
}

// =============================================================================
// IdentityToken
// =============================================================================

/// How the client authenticates itself when activating the session.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityToken {
    /// No user authentication.
    Anonymous,
    /// Username and password.
    UsernamePassword {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// X.509 user certificate with its private key.
    X509 {
        /// User certificate, PEM or DER.
        certificate: CertificateDocument,
        /// Matching private key.
        private_key: PrivateKeyDocument,
    },
}

impl IdentityToken {
    /// Returns the variant name for logs and messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::UsernamePassword { .. } => "username_password",
            Self::X509 { .. } => "x509",
        }
    }
}

impl Default for IdentityToken {
    fn default() -> Self {
        Self::Anonymous
    }
}

// =============================================================================
// ApplicationIdentity
// =============================================================================

/// The client application's own name and URI.
///
/// These go into the application description of every session and must
/// match the URI embedded in the application certificate when a secured
/// mode is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    /// Human-readable application name.
    pub application_name: String,
    /// Globally unique application URI, e.g. `urn:factory:line1:client`.
    pub application_uri: String,
}

impl ApplicationIdentity {
    /// Creates an application identity.
    pub fn new(application_name: impl Into<String>, application_uri: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            application_uri: application_uri.into(),
        }
    }
}

// =============================================================================
// ServerConfig
// =============================================================================

/// Full description of one OPC UA server connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Stable cache key for this configuration.
    pub key: ConfigKey,
    /// Display name used in logs and error messages.
    pub name: String,
    /// Discovery and connection URL, `opc.tcp://host:port[/path]`.
    pub endpoint_url: String,
    /// Message security mode.
    pub security_mode: SecurityMode,
    /// Expected security policy URI; compared case-insensitively, and an
    /// empty string matches any policy.
    pub security_policy_uri: String,
    /// Requested session timeout in milliseconds; `None` means default.
    pub session_timeout_ms: Option<i64>,
    /// Request timeout in milliseconds; `None` means default.
    pub request_timeout_ms: Option<i64>,
    /// User identity presented at session activation.
    pub identity: IdentityToken,
    /// Application certificate and key; required for secured modes.
    pub certificate: Option<CertificateHolder>,
    /// Rewrite the discovered endpoint's host and port with the values
    /// from `endpoint_url`. Needed when the server advertises an internal
    /// address that is unreachable from the client.
    pub manual_endpoint: bool,
}

impl ServerConfig {
    /// Starts building a configuration with the given key and name.
    pub fn builder(key: impl Into<ConfigKey>, name: impl Into<String>) -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: ServerConfig {
                key: key.into(),
                name: name.into(),
                endpoint_url: String::new(),
                security_mode: SecurityMode::default(),
                security_policy_uri: String::new(),
                session_timeout_ms: None,
                request_timeout_ms: None,
                identity: IdentityToken::default(),
                certificate: None,
                manual_endpoint: false,
            },
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Sets the discovery and connection URL.
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint_url = url.into();
        self
    }

    /// Sets the message security mode.
    pub fn security_mode(mut self, mode: SecurityMode) -> Self {
        self.config.security_mode = mode;
        self
    }

    /// Sets the expected security policy URI.
    pub fn security_policy_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.security_policy_uri = uri.into();
        self
    }

    /// Shorthand for mode `None` with the `None` policy URI.
    pub fn no_security(mut self) -> Self {
        self.config.security_mode = SecurityMode::None;
        self.config.security_policy_uri = security_policy::NONE.to_string();
        self
    }

    /// Sets the requested session timeout in milliseconds.
    pub fn session_timeout_ms(mut self, ms: i64) -> Self {
        self.config.session_timeout_ms = Some(ms);
        self
    }

    /// Sets the request timeout in milliseconds.
    pub fn request_timeout_ms(mut self, ms: i64) -> Self {
        self.config.request_timeout_ms = Some(ms);
        self
    }

    /// Sets the identity token.
    pub fn identity(mut self, identity: IdentityToken) -> Self {
        self.config.identity = identity;
        self
    }

    /// Shorthand for a username/password identity.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.identity = IdentityToken::UsernamePassword {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Sets the application certificate and private key.
    pub fn certificate(mut self, holder: CertificateHolder) -> Self {
        self.config.certificate = Some(holder);
        self
    }

    /// Enables rewriting the discovered endpoint host and port.
    pub fn manual_endpoint(mut self, manual: bool) -> Self {
        self.config.manual_endpoint = manual;
        self
    }

    /// Finishes the builder.
    ///
    /// No validation happens here; the session builder validates the
    /// complete config before using it.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = ServerConfig::builder("k1", "Test server").build();
        assert_eq!(config.security_mode, SecurityMode::Invalid);
        assert_eq!(config.identity, IdentityToken::Anonymous);
        assert!(config.session_timeout_ms.is_none());
        assert!(config.request_timeout_ms.is_none());
        assert!(!config.manual_endpoint);
    }

    #[test]
    fn no_security_sets_mode_and_policy() {
        let config = ServerConfig::builder("k1", "Test server")
            .no_security()
            .build();
        assert_eq!(config.security_mode, SecurityMode::None);
        assert_eq!(config.security_policy_uri, security_policy::NONE);
        assert!(!config.security_mode.is_secured());
    }

    #[test]
    fn secured_modes_are_flagged() {
        assert!(SecurityMode::Sign.is_secured());
        assert!(SecurityMode::SignAndEncrypt.is_secured());
        assert!(!SecurityMode::None.is_secured());
        assert!(!SecurityMode::Invalid.is_secured());
    }

    #[test]
    fn security_mode_names_are_snake_case() {
        assert_eq!(SecurityMode::SignAndEncrypt.name(), "sign_and_encrypt");
        assert_eq!(SecurityMode::None.to_string(), "none");
    }

    #[test]
    fn certificate_chain_links_through_next() {
        let root = CertificateDocument::new(b"root".to_vec());
        let leaf = CertificateDocument::new(b"leaf".to_vec()).with_issuer(root);
        assert!(leaf.has_contents());
        assert_eq!(leaf.next.as_ref().map(|d| d.content.as_slice()), Some(&b"root"[..]));
    }

    #[test]
    fn config_key_round_trips() {
        let key = ConfigKey::from("abc");
        assert_eq!(key.as_str(), "abc");
        assert_eq!(key.to_string(), "abc");
    }
}
