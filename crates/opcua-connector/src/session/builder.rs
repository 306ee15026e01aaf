// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session configuration assembly.
//!
//! [`SessionBuilder`] turns a [`ServerConfig`] into a fully resolved
//! [`SessionConfig`]: validation first, then certificate material, trust
//! validator, endpoint resolution, identity provider and timeouts. The
//! validation step is deliberately exhaustive and runs before any network
//! I/O so that a broken configuration never produces a half-open channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::certificate::parse::{
    parse_certificate, parse_private_key, Certificate, KeyPair, PrivateKey,
};
use crate::certificate::trust::TrustValidator;
use crate::config::{
    ApplicationIdentity, CertificateHolder, IdentityToken, SecurityMode, ServerConfig,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SESSION_TIMEOUT_MS,
};
use crate::discovery::EndpointResolver;
use crate::error::{UaResult, ValidationError};
use crate::transport::{EndpointDescription, UaStack};

// =============================================================================
// IdentityProvider
// =============================================================================

/// Resolved user identity, with key material already decrypted.
pub enum IdentityProvider {
    /// No user authentication.
    Anonymous,
    /// Username and password.
    Username {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// X.509 user certificate and its decrypted key.
    X509 {
        /// User certificate.
        certificate: Certificate,
        /// Decrypted private key.
        private_key: PrivateKey,
    },
}

// Secrets stay out of Debug and Display output.
impl fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Username { username, .. } => write!(f, "Username({username})"),
            Self::X509 { certificate, .. } => write!(f, "X509({})", certificate.subject()),
        }
    }
}

// =============================================================================
// SessionConfig
// =============================================================================

/// Everything the stack needs to create and activate one session.
pub struct SessionConfig {
    /// Display name of the session, from the server configuration.
    pub session_name: String,
    /// Client application name.
    pub application_name: String,
    /// Client application URI.
    pub application_uri: String,
    /// Application instance certificate for secured modes.
    pub certificate: Option<Certificate>,
    /// Certificate chain in leaf-to-root order; empty for mode `None`.
    pub certificate_chain: Vec<Certificate>,
    /// Server certificate validator; absent for mode `None`.
    pub validator: Option<Arc<TrustValidator>>,
    /// The resolved endpoint to connect to.
    pub endpoint: EndpointDescription,
    /// User identity presented at activation.
    pub identity: IdentityProvider,
    /// Application key pair for secured modes.
    pub key_pair: Option<KeyPair>,
    /// Timeout for individual service requests.
    pub request_timeout: Duration,
    /// Requested session lifetime.
    pub session_timeout: Duration,
}

// Key material and passwords stay out of Debug output; the identity
// field already redacts itself.
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_name", &self.session_name)
            .field("application_name", &self.application_name)
            .field("application_uri", &self.application_uri)
            .field("endpoint_url", &self.endpoint.endpoint_url)
            .field("security_mode", &self.endpoint.security_mode)
            .field("identity", &self.identity)
            .field("has_key_pair", &self.key_pair.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("session_timeout", &self.session_timeout)
            .finish()
    }
}

// =============================================================================
// SessionBuilder
// =============================================================================

/// Validates server configurations and assembles session configurations.
pub struct SessionBuilder {
    stack: Arc<dyn UaStack>,
    identity: ApplicationIdentity,
    validator: Arc<TrustValidator>,
}

impl SessionBuilder {
    /// Creates a builder with the client's own identity and validator.
    pub fn new(
        stack: Arc<dyn UaStack>,
        identity: ApplicationIdentity,
        validator: Arc<TrustValidator>,
    ) -> Self {
        Self {
            stack,
            identity,
            validator,
        }
    }

    /// Rejects incomplete or inconsistent configurations.
    ///
    /// Checks run in a fixed order so error messages are stable: names
    /// and URL first, then security mode, timeouts, identity token and
    /// finally the certificate material the mode requires.
    pub fn validate(&self, config: &ServerConfig) -> UaResult<()> {
        if config.name.trim().is_empty() {
            return Err(ValidationError::blank("server configuration name").into());
        }
        if self.identity.application_name.trim().is_empty() {
            return Err(ValidationError::blank("application name").into());
        }
        if self.identity.application_uri.trim().is_empty() {
            return Err(ValidationError::blank("application URI").into());
        }
        if config.endpoint_url.trim().is_empty() {
            return Err(ValidationError::blank("endpoint URL").into());
        }
        if config.security_mode == SecurityMode::Invalid {
            return Err(ValidationError::InvalidSecurityMode.into());
        }
        if let Some(ms) = config.session_timeout_ms {
            if ms < 0 {
                return Err(ValidationError::negative_timeout("session timeout", ms).into());
            }
        }
        if let Some(ms) = config.request_timeout_ms {
            if ms < 0 {
                return Err(ValidationError::negative_timeout("request timeout", ms).into());
            }
        }
        Self::validate_identity(&config.identity)?;
        Self::validate_certificate_material(config)?;
        debug!(config = %config.key, "configuration passed validation");
        Ok(())
    }

    fn validate_identity(identity: &IdentityToken) -> UaResult<()> {
        match identity {
            IdentityToken::Anonymous => Ok(()),
            IdentityToken::UsernamePassword { username, password } => {
                if username.trim().is_empty() {
                    return Err(ValidationError::incomplete_identity_token(
                        "username",
                        "username_password",
                    )
                    .into());
                }
                if password.trim().is_empty() {
                    return Err(ValidationError::incomplete_identity_token(
                        "password",
                        "username_password",
                    )
                    .into());
                }
                Ok(())
            }
            IdentityToken::X509 {
                certificate,
                private_key,
            } => {
                if !certificate.has_contents() {
                    return Err(
                        ValidationError::incomplete_identity_token("certificate", "x509").into(),
                    );
                }
                if !private_key.has_contents() {
                    return Err(
                        ValidationError::incomplete_identity_token("private key", "x509").into(),
                    );
                }
                if private_key.password.is_none() {
                    return Err(ValidationError::incomplete_identity_token(
                        "private key password",
                        "x509",
                    )
                    .into());
                }
                Ok(())
            }
        }
    }

    fn validate_certificate_material(config: &ServerConfig) -> UaResult<()> {
        if !config.security_mode.is_secured() {
            return Ok(());
        }
        let mode = config.security_mode;
        let Some(holder) = config.certificate.as_ref() else {
            return Err(
                ValidationError::missing_certificate_material("application certificate", mode)
                    .into(),
            );
        };
        if !holder.certificate.has_contents() {
            return Err(
                ValidationError::missing_certificate_material("application certificate", mode)
                    .into(),
            );
        }
        if !holder.private_key.has_contents() {
            return Err(ValidationError::missing_certificate_material(
                "application private key",
                mode,
            )
            .into());
        }
        if holder.private_key.password.is_none() {
            return Err(ValidationError::missing_certificate_material(
                "application private key password",
                mode,
            )
            .into());
        }
        Ok(())
    }

    /// Builds a session configuration from a validated server config.
    ///
    /// Assembly order: validation, application certificate, chain,
    /// validator, endpoint, identity, key pair, timeouts. The only
    /// network call is the endpoint resolution.
    pub async fn build(&self, config: &ServerConfig) -> UaResult<SessionConfig> {
        self.validate(config)?;
        debug!(
            config = %config.key,
            endpoint_url = config.endpoint_url,
            mode = %config.security_mode,
            "building session configuration"
        );

        let certificate = self.application_certificate(config)?;
        let certificate_chain = Self::certificate_chain(config, certificate.as_ref())?;
        let validator = config
            .security_mode
            .is_secured()
            .then(|| self.validator.clone());

        let endpoint = EndpointResolver::new(self.stack.clone())
            .resolve(
                &config.endpoint_url,
                config.security_mode,
                &config.security_policy_uri,
                config.manual_endpoint,
            )
            .await?;

        let identity = Self::identity_provider(&config.identity)?;
        let key_pair = Self::key_pair(config, certificate.as_ref())?;

        Ok(SessionConfig {
            session_name: config.name.clone(),
            application_name: self.identity.application_name.clone(),
            application_uri: self.identity.application_uri.clone(),
            certificate,
            certificate_chain,
            validator,
            endpoint,
            identity,
            key_pair,
            request_timeout: Duration::from_millis(
                config.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS) as u64,
            ),
            session_timeout: Duration::from_millis(
                config.session_timeout_ms.unwrap_or(DEFAULT_SESSION_TIMEOUT_MS) as u64,
            ),
        })
    }

    fn application_certificate(&self, config: &ServerConfig) -> UaResult<Option<Certificate>> {
        if !config.security_mode.is_secured() {
            return Ok(None);
        }
        let holder = Self::holder(config)?;
        Ok(Some(parse_certificate(&holder.certificate.content)?))
    }

    /// Walks the issuer links of the configured certificate, yielding
    /// the chain in leaf-to-root order.
    fn certificate_chain(
        config: &ServerConfig,
        leaf: Option<&Certificate>,
    ) -> UaResult<Vec<Certificate>> {
        let Some(leaf) = leaf else {
            return Ok(Vec::new());
        };
        let holder = Self::holder(config)?;
        let mut chain = vec![leaf.clone()];
        let mut link = holder.certificate.next.as_deref();
        while let Some(document) = link {
            chain.push(parse_certificate(&document.content)?);
            link = document.next.as_deref();
        }
        Ok(chain)
    }

    fn identity_provider(identity: &IdentityToken) -> UaResult<IdentityProvider> {
        match identity {
            IdentityToken::Anonymous => Ok(IdentityProvider::Anonymous),
            IdentityToken::UsernamePassword { username, password } => {
                Ok(IdentityProvider::Username {
                    username: username.clone(),
                    password: password.clone(),
                })
            }
            IdentityToken::X509 {
                certificate,
                private_key,
            } => {
                let password = private_key.password.as_deref().unwrap_or_default();
                Ok(IdentityProvider::X509 {
                    certificate: parse_certificate(&certificate.content)?,
                    private_key: parse_private_key(&private_key.content, password)?,
                })
            }
        }
    }

    fn key_pair(config: &ServerConfig, leaf: Option<&Certificate>) -> UaResult<Option<KeyPair>> {
        let Some(leaf) = leaf else {
            return Ok(None);
        };
        let holder = Self::holder(config)?;
        let password = holder.private_key.password.as_deref().unwrap_or_default();
        let private_key = parse_private_key(&holder.private_key.content, password)?;
        Ok(Some(KeyPair {
            certificate: leaf.clone(),
            private_key,
        }))
    }

    fn holder(config: &ServerConfig) -> UaResult<&CertificateHolder> {
        config.certificate.as_ref().ok_or_else(|| {
            ValidationError::missing_certificate_material(
                "application certificate",
                config.security_mode,
            )
            .into()
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::trust::TrustStore;
    use crate::config::{CertificateDocument, PrivateKeyDocument};
    use crate::error::UaError;
    use crate::transport::{ApplicationDescription, StackSession};
    use async_trait::async_trait;

    const CERT_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/cert.pem"));
    const KEY_PKCS8_ENC: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/pkcs8_enc.pem"
    ));

    struct FixedStack {
        endpoints: Vec<EndpointDescription>,
    }

    #[async_trait]
    impl UaStack for FixedStack {
        async fn get_endpoints(&self, _url: &str) -> UaResult<Vec<EndpointDescription>> {
            Ok(self.endpoints.clone())
        }

        async fn find_servers(&self, _url: &str) -> UaResult<Vec<ApplicationDescription>> {
            Ok(Vec::new())
        }

        async fn create_session(&self, _config: &SessionConfig) -> UaResult<Box<dyn StackSession>> {
            unimplemented!("not used by builder tests")
        }
    }

    async fn builder_with(endpoints: Vec<EndpointDescription>) -> (tempfile::TempDir, SessionBuilder) {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path()).await.unwrap();
        let builder = SessionBuilder::new(
            Arc::new(FixedStack { endpoints }),
            ApplicationIdentity::new("connector-test", "urn:test:connector:client"),
            Arc::new(TrustValidator::new(store)),
        );
        (dir, builder)
    }

    fn none_endpoint() -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://plc7:4840".to_string(),
            security_mode: SecurityMode::None,
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".to_string(),
            security_level: 0,
            server_certificate: None,
        }
    }

    fn sign_endpoint() -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://plc7:4840".to_string(),
            security_mode: SecurityMode::Sign,
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
                .to_string(),
            security_level: 2,
            server_certificate: None,
        }
    }

    fn anonymous_config() -> ServerConfig {
        ServerConfig::builder("k1", "Test server")
            .endpoint_url("opc.tcp://plc7:4840")
            .no_security()
            .build()
    }

    fn secured_config() -> ServerConfig {
        ServerConfig::builder("k2", "Secured server")
            .endpoint_url("opc.tcp://plc7:4840")
            .security_mode(SecurityMode::Sign)
            .security_policy_uri("http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256")
            .certificate(CertificateHolder {
                certificate: CertificateDocument::new(CERT_PEM.to_vec()),
                private_key: PrivateKeyDocument::new(KEY_PKCS8_ENC.to_vec(), "opcua-test"),
            })
            .build()
    }

    #[tokio::test]
    async fn validate_rejects_blank_name_first() {
        let (_dir, builder) = builder_with(vec![]).await;
        let mut config = anonymous_config();
        config.name = "  ".to_string();
        config.endpoint_url = String::new();
        let error = builder.validate(&config).unwrap_err();
        assert!(error.to_string().contains("server configuration name"));
    }

    #[tokio::test]
    async fn validate_rejects_unset_security_mode() {
        let (_dir, builder) = builder_with(vec![]).await;
        let config = ServerConfig::builder("k1", "Test server")
            .endpoint_url("opc.tcp://plc7:4840")
            .build();
        let error = builder.validate(&config).unwrap_err();
        assert!(matches!(
            error,
            UaError::Validation(ValidationError::InvalidSecurityMode)
        ));
    }

    #[tokio::test]
    async fn validate_rejects_negative_timeouts() {
        let (_dir, builder) = builder_with(vec![]).await;
        let mut config = anonymous_config();
        config.session_timeout_ms = Some(-1);
        let error = builder.validate(&config).unwrap_err();
        assert!(matches!(
            error,
            UaError::Validation(ValidationError::NegativeTimeout { value: -1, .. })
        ));
    }

    #[tokio::test]
    async fn validate_rejects_blank_username() {
        let (_dir, builder) = builder_with(vec![]).await;
        let mut config = anonymous_config();
        config.identity = IdentityToken::UsernamePassword {
            username: " ".to_string(),
            password: "secret".to_string(),
        };
        let error = builder.validate(&config).unwrap_err();
        assert!(error.to_string().contains("username"));
    }

    #[tokio::test]
    async fn validate_rejects_whitespace_only_password() {
        let (_dir, builder) = builder_with(vec![]).await;
        let mut config = anonymous_config();
        config.identity = IdentityToken::UsernamePassword {
            username: "operator".to_string(),
            password: "   ".to_string(),
        };
        let error = builder.validate(&config).unwrap_err();
        assert!(matches!(
            error,
            UaError::Validation(ValidationError::IncompleteIdentityToken { .. })
        ));
        assert!(error.to_string().contains("password"));
    }

    #[tokio::test]
    async fn validate_requires_certificate_for_secured_modes() {
        let (_dir, builder) = builder_with(vec![]).await;
        let mut config = secured_config();
        config.certificate = None;
        let error = builder.validate(&config).unwrap_err();
        assert!(matches!(
            error,
            UaError::Validation(ValidationError::MissingCertificateMaterial { .. })
        ));
    }

    #[tokio::test]
    async fn validate_requires_a_key_password_for_secured_modes() {
        let (_dir, builder) = builder_with(vec![]).await;
        let mut config = secured_config();
        if let Some(holder) = config.certificate.as_mut() {
            holder.private_key.password = None;
        }
        let error = builder.validate(&config).unwrap_err();
        assert!(error.to_string().contains("password"));
    }

    #[tokio::test]
    async fn build_without_security_skips_certificate_material() {
        let (_dir, builder) = builder_with(vec![none_endpoint()]).await;
        let session = builder.build(&anonymous_config()).await.unwrap();
        assert!(session.certificate.is_none());
        assert!(session.certificate_chain.is_empty());
        assert!(session.validator.is_none());
        assert!(session.key_pair.is_none());
        assert!(matches!(session.identity, IdentityProvider::Anonymous));
    }

    #[tokio::test]
    async fn build_applies_default_timeouts() {
        let (_dir, builder) = builder_with(vec![none_endpoint()]).await;
        let session = builder.build(&anonymous_config()).await.unwrap();
        assert_eq!(session.request_timeout, Duration::from_millis(3_000));
        assert_eq!(session.session_timeout, Duration::from_millis(120_000));
    }

    #[tokio::test]
    async fn build_for_secured_mode_decrypts_the_key_pair() {
        let (_dir, builder) = builder_with(vec![sign_endpoint()]).await;
        let session = builder.build(&secured_config()).await.unwrap();
        let certificate = session.certificate.as_ref().unwrap();
        assert!(certificate.subject().contains("connector-test"));
        assert_eq!(session.certificate_chain.len(), 1);
        assert!(session.validator.is_some());
        let key_pair = session.key_pair.as_ref().unwrap();
        assert_eq!(key_pair.private_key.bit_size(), 2048);
        assert_eq!(key_pair.certificate.thumbprint(), certificate.thumbprint());
    }

    #[tokio::test]
    async fn session_config_debug_carries_no_secrets() {
        let (_dir, builder) = builder_with(vec![none_endpoint()]).await;
        let mut config = anonymous_config();
        config.identity = IdentityToken::UsernamePassword {
            username: "operator".to_string(),
            password: "s3cret".to_string(),
        };
        let session = builder.build(&config).await.unwrap();
        let debug = format!("{session:?}");
        assert!(debug.contains("operator"));
        assert!(!debug.contains("s3cret"));
    }

    #[tokio::test]
    async fn build_fails_when_no_endpoint_matches() {
        let (_dir, builder) = builder_with(vec![none_endpoint()]).await;
        let error = builder.build(&secured_config()).await.unwrap_err();
        assert_eq!(error.category(), "discovery");
    }

    #[tokio::test]
    async fn chain_follows_issuer_links() {
        let (_dir, builder) = builder_with(vec![sign_endpoint()]).await;
        let mut config = secured_config();
        if let Some(holder) = config.certificate.as_mut() {
            holder.certificate = holder
                .certificate
                .clone()
                .with_issuer(CertificateDocument::new(CERT_PEM.to_vec()));
        }
        let session = builder.build(&config).await.unwrap();
        assert_eq!(session.certificate_chain.len(), 2);
    }
}
