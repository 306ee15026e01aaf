// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the OPC UA connector.
//!
//! Every fallible operation in this crate returns [`UaError`], which
//! categorizes failures by their domain:
//!
//! ```text
//! UaError
//! ├── Validation    - Rejected configuration, no network I/O happened
//! ├── Certificate   - Certificate or private key material problems
//! ├── Discovery     - Endpoint discovery and matching failures
//! ├── Connect       - The session could not be established
//! ├── Disconnect    - The session could not be shut down cleanly
//! ├── Cancelled     - The operation was cancelled before completing
//! └── Subscription  - Subscription and monitored item failures
//! ```
//!
//! Certificate and key errors deliberately carry vague user-facing
//! messages; the precise parse failure is written to the log at the
//! point of failure so that secrets and key structure never leak
//! through error strings.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::Level;

use crate::config::SecurityMode;

/// Convenience alias used throughout the crate.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for connector operations.
#[derive(Debug, Error)]
pub enum UaError {
    /// The server configuration was rejected before any network I/O.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Certificate or private key material could not be used.
    #[error("{0}")]
    Certificate(#[from] CertificateError),

    /// Endpoint discovery or matching failed.
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    /// The session could not be established.
    #[error("cannot connect to '{endpoint_url}': {message}")]
    Connect {
        /// The endpoint the connect attempt targeted.
        endpoint_url: String,
        /// Stack-level failure description.
        message: String,
    },

    /// The session could not be shut down cleanly.
    #[error("cannot disconnect from '{endpoint_url}': {message}")]
    Disconnect {
        /// The endpoint the session was connected to.
        endpoint_url: String,
        /// Stack-level failure description.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A subscription or monitored item operation failed.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),
}

impl UaError {
    /// Creates a connect error.
    pub fn connect(endpoint_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint_url: endpoint_url.into(),
            message: message.into(),
        }
    }

    /// Creates a disconnect error.
    pub fn disconnect(endpoint_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Disconnect {
            endpoint_url: endpoint_url.into(),
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Returns `true` if the caller can fix this error by changing the
    /// configuration, as opposed to transient or server-side failures.
    pub fn is_caller_fixable(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Certificate(e) => e.is_caller_fixable(),
            Self::Discovery(e) => e.is_caller_fixable(),
            Self::Connect { .. } | Self::Disconnect { .. } | Self::Cancelled(_) => false,
            Self::Subscription(e) => e.is_caller_fixable(),
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Certificate(_) => "certificate",
            Self::Discovery(_) => "discovery",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Cancelled(_) => "cancelled",
            Self::Subscription(_) => "subscription",
        }
    }

    /// Returns the tracing level appropriate for this error.
    pub fn tracing_level(&self) -> Level {
        match self {
            Self::Validation(_) => Level::WARN,
            Self::Disconnect { .. } => Level::WARN,
            Self::Cancelled(_) => Level::WARN,
            _ => Level::ERROR,
        }
    }

    /// Logs this error with the appropriate level and context.
    pub fn log(&self, context: &str) {
        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                category = self.category(),
                context = context,
                caller_fixable = self.is_caller_fixable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                category = self.category(),
                context = context,
                caller_fixable = self.is_caller_fixable(),
                "{self}"
            ),
            _ => tracing::debug!(
                category = self.category(),
                context = context,
                caller_fixable = self.is_caller_fixable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ValidationError
// =============================================================================

/// Configuration rejection, raised before any network I/O.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("{field} cannot be empty")]
    Blank {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A timeout field carries a negative value.
    #[error("{field} cannot be negative (got {value} ms)")]
    NegativeTimeout {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value in milliseconds.
        value: i64,
    },

    /// The security mode was never set or is unknown.
    #[error("security mode is not set; choose none, sign or sign_and_encrypt")]
    InvalidSecurityMode,

    /// Certificate or key material required by the security mode is absent.
    #[error("{field} must have content when the security mode is {mode}")]
    MissingCertificateMaterial {
        /// Name of the offending field.
        field: &'static str,
        /// The security mode requiring the material.
        mode: SecurityMode,
    },

    /// A field required by the chosen identity token is absent.
    #[error("{field} is required for a {token} identity token")]
    IncompleteIdentityToken {
        /// Name of the offending field.
        field: &'static str,
        /// Token variant name.
        token: &'static str,
    },
}

impl ValidationError {
    /// Creates a blank-field error.
    pub fn blank(field: &'static str) -> Self {
        Self::Blank { field }
    }

    /// Creates a negative-timeout error.
    pub fn negative_timeout(field: &'static str, value: i64) -> Self {
        Self::NegativeTimeout { field, value }
    }

    /// Creates a missing-certificate-material error.
    pub fn missing_certificate_material(field: &'static str, mode: SecurityMode) -> Self {
        Self::MissingCertificateMaterial { field, mode }
    }

    /// Creates an incomplete-identity-token error.
    pub fn incomplete_identity_token(field: &'static str, token: &'static str) -> Self {
        Self::IncompleteIdentityToken { field, token }
    }
}

// =============================================================================
// CertificateError
// =============================================================================

/// Certificate and private key errors.
///
/// User-facing messages stay vague on purpose; the detailed cause is
/// logged where the failure happens.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The certificate bytes are not valid PEM or DER X.509.
    #[error("the certificate is not in a valid format; see the log for details")]
    InvalidCertificateFormat,

    /// The private key is in a format the connector does not support.
    #[error("the private key format is not supported; see the log for details")]
    UnsupportedKeyFormat,

    /// The private key could not be decrypted, usually a wrong password.
    #[error("the private key could not be decrypted; see the log for details")]
    DecryptionFailed,

    /// The certificate is not in the trust list.
    #[error("certificate {thumbprint} is not trusted")]
    Untrusted {
        /// SHA-1 thumbprint of the rejected certificate.
        thumbprint: String,
    },

    /// The certificate is outside its validity period.
    #[error("certificate {thumbprint} is outside its validity period")]
    Expired {
        /// SHA-1 thumbprint of the rejected certificate.
        thumbprint: String,
    },

    /// The trust store directory could not be read or written.
    #[error("trust store '{path}': {message}")]
    Store {
        /// Trust store location.
        path: PathBuf,
        /// Failure description.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: Option<io::Error>,
    },
}

impl CertificateError {
    /// Creates an untrusted-certificate error.
    pub fn untrusted(thumbprint: impl Into<String>) -> Self {
        Self::Untrusted {
            thumbprint: thumbprint.into(),
        }
    }

    /// Creates an expired-certificate error.
    pub fn expired(thumbprint: impl Into<String>) -> Self {
        Self::Expired {
            thumbprint: thumbprint.into(),
        }
    }

    /// Creates a trust store error.
    pub fn store(path: impl Into<PathBuf>, message: impl Into<String>, source: io::Error) -> Self {
        Self::Store {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Returns `true` if the caller can fix this error.
    pub fn is_caller_fixable(&self) -> bool {
        !matches!(self, Self::Store { .. })
    }
}

// =============================================================================
// DiscoveryError
// =============================================================================

/// Endpoint discovery and matching errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery request itself failed.
    #[error("cannot get endpoints from '{url}': {message}")]
    RequestFailed {
        /// Discovery URL.
        url: String,
        /// Failure description.
        message: String,
    },

    /// No advertised endpoint matched the configured security settings.
    #[error(
        "cannot find an endpoint on '{url}' matching security mode {mode} and policy '{policy_uri}'"
    )]
    NoMatchingEndpoint {
        /// Discovery URL.
        url: String,
        /// Requested security mode.
        mode: SecurityMode,
        /// Requested security policy URI.
        policy_uri: String,
    },

    /// An endpoint URL could not be parsed.
    #[error("invalid endpoint URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Failure description.
        message: String,
    },
}

impl DiscoveryError {
    /// Creates a request-failed error.
    pub fn request_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a no-matching-endpoint error.
    pub fn no_matching_endpoint(
        url: impl Into<String>,
        mode: SecurityMode,
        policy_uri: impl Into<String>,
    ) -> Self {
        Self::NoMatchingEndpoint {
            url: url.into(),
            mode,
            policy_uri: policy_uri.into(),
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the caller can fix this error.
    pub fn is_caller_fixable(&self) -> bool {
        matches!(
            self,
            Self::NoMatchingEndpoint { .. } | Self::InvalidUrl { .. }
        )
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The subscription is not registered with this session.
    #[error("subscription {id} is not initialized and can therefore not be used")]
    Unknown {
        /// Server-assigned subscription identifier.
        id: u32,
    },

    /// The subscription could not be created.
    #[error("cannot create subscription: {message}")]
    CreateFailed {
        /// Failure description.
        message: String,
    },

    /// A monitored item service call failed.
    #[error("monitored item service failed for subscription {id}: {message}")]
    ServiceFailed {
        /// Server-assigned subscription identifier.
        id: u32,
        /// Failure description.
        message: String,
    },
}

impl SubscriptionError {
    /// Creates an unknown-subscription error.
    pub fn unknown(id: u32) -> Self {
        Self::Unknown { id }
    }

    /// Creates a create-failed error.
    pub fn create_failed(message: impl Into<String>) -> Self {
        Self::CreateFailed {
            message: message.into(),
        }
    }

    /// Creates a service-failed error.
    pub fn service_failed(id: u32, message: impl Into<String>) -> Self {
        Self::ServiceFailed {
            id,
            message: message.into(),
        }
    }

    /// Returns `true` if the caller can fix this error.
    pub fn is_caller_fixable(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_caller_fixable() {
        let error = UaError::from(ValidationError::blank("endpoint URL"));
        assert!(error.is_caller_fixable());
        assert_eq!(error.category(), "validation");
    }

    #[test]
    fn connect_errors_are_not_caller_fixable() {
        let error = UaError::connect("opc.tcp://localhost:4840", "connection refused");
        assert!(!error.is_caller_fixable());
        assert_eq!(error.category(), "connect");
    }

    #[test]
    fn certificate_messages_stay_vague() {
        let message = UaError::from(CertificateError::DecryptionFailed).to_string();
        assert!(message.contains("see the log"));
        assert!(!message.to_lowercase().contains("password"));
    }

    #[test]
    fn unknown_subscription_names_the_id() {
        let error = UaError::from(SubscriptionError::unknown(7));
        assert!(error.to_string().contains('7'));
        assert!(error.is_caller_fixable());
    }

    #[test]
    fn no_matching_endpoint_names_mode_and_policy() {
        let error = DiscoveryError::no_matching_endpoint(
            "opc.tcp://plc:4840",
            SecurityMode::SignAndEncrypt,
            "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
        );
        let message = error.to_string();
        assert!(message.contains("sign_and_encrypt"));
        assert!(message.contains("Basic256Sha256"));
    }
}
