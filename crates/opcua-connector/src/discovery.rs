// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoint discovery and matching.
//!
//! Servers advertise their endpoints through a discovery request; the
//! [`EndpointResolver`] picks the first advertised endpoint whose security
//! mode and policy match the configuration. Servers behind NAT often
//! advertise an internal hostname, so the resolver can optionally rewrite
//! the matched endpoint's host and port with the configured ones while
//! keeping the advertised path.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::SecurityMode;
use crate::error::{DiscoveryError, UaResult};
use crate::transport::{ApplicationDescription, EndpointDescription, UaStack};

/// Default port of the `opc.tcp` scheme.
pub const DEFAULT_OPC_TCP_PORT: u16 = 4840;

const OPC_TCP_SCHEME: &str = "opc.tcp://";

// =============================================================================
// EndpointUrl
// =============================================================================

/// A parsed `opc.tcp://host[:port][/path]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    /// Hostname, IPv4 address or IPv6 address without brackets.
    pub host: String,
    /// TCP port, defaulted to [`DEFAULT_OPC_TCP_PORT`] when absent.
    pub port: u16,
    /// Path including the leading slash, or empty.
    pub path: String,
}

impl EndpointUrl {
    /// Parses an `opc.tcp` URL.
    pub fn parse(url: &str) -> UaResult<Self> {
        let rest = url
            .strip_prefix(OPC_TCP_SCHEME)
            .ok_or_else(|| DiscoveryError::invalid_url(url, "the scheme must be opc.tcp://"))?;

        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(DiscoveryError::invalid_url(url, "the host is missing").into());
        }

        let (host, port_text) = if let Some(stripped) = authority.strip_prefix('[') {
            // IPv6 literal, e.g. [fe80::1]:4840
            let (host, after) = stripped
                .split_once(']')
                .ok_or_else(|| DiscoveryError::invalid_url(url, "unterminated IPv6 literal"))?;
            (host, after.strip_prefix(':'))
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        if host.is_empty() {
            return Err(DiscoveryError::invalid_url(url, "the host is missing").into());
        }

        let port = match port_text {
            Some(text) => text
                .parse::<u16>()
                .map_err(|_| DiscoveryError::invalid_url(url, "the port is not a valid number"))?,
            None => DEFAULT_OPC_TCP_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Returns the host formatted for use inside a URL, re-adding the
    /// brackets for IPv6 literals.
    pub fn host_for_url(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{OPC_TCP_SCHEME}{}:{}{}",
            self.host_for_url(),
            self.port,
            self.path
        )
    }
}

// =============================================================================
// EndpointResolver
// =============================================================================

/// Discovers endpoints and picks the one matching the configuration.
pub struct EndpointResolver {
    stack: Arc<dyn UaStack>,
}

impl EndpointResolver {
    /// Creates a resolver over the given stack.
    pub fn new(stack: Arc<dyn UaStack>) -> Self {
        Self { stack }
    }

    /// Fetches the endpoints advertised by the server at `endpoint_url`.
    pub async fn get_endpoints(&self, endpoint_url: &str) -> UaResult<Vec<EndpointDescription>> {
        debug!(endpoint_url, "requesting endpoints");
        let endpoints = self.stack.get_endpoints(endpoint_url).await?;
        debug!(endpoint_url, count = endpoints.len(), "received endpoints");
        Ok(endpoints)
    }

    /// Fetches the servers known to the discovery server at `endpoint_url`.
    pub async fn find_servers(&self, endpoint_url: &str) -> UaResult<Vec<ApplicationDescription>> {
        debug!(endpoint_url, "requesting servers");
        let servers = self.stack.find_servers(endpoint_url).await?;
        debug!(endpoint_url, count = servers.len(), "received servers");
        Ok(servers)
    }

    /// Picks the first advertised endpoint matching `mode` and `policy_uri`.
    ///
    /// The policy comparison is case-insensitive; an empty `policy_uri`
    /// matches any policy. With `manual_override` set, the matched
    /// endpoint's host and port are replaced with the ones from
    /// `endpoint_url` while the advertised path is kept.
    pub async fn resolve(
        &self,
        endpoint_url: &str,
        mode: SecurityMode,
        policy_uri: &str,
        manual_override: bool,
    ) -> UaResult<EndpointDescription> {
        let endpoints = self.get_endpoints(endpoint_url).await?;
        for endpoint in endpoints {
            if endpoint.security_mode != mode || !policy_matches(policy_uri, &endpoint) {
                continue;
            }
            debug!(
                endpoint_url = %endpoint.endpoint_url,
                mode = %endpoint.security_mode,
                policy = %endpoint.security_policy_uri,
                "matched endpoint"
            );
            if manual_override {
                return override_host(endpoint, endpoint_url);
            }
            return Ok(endpoint);
        }
        Err(DiscoveryError::no_matching_endpoint(endpoint_url, mode, policy_uri).into())
    }
}

fn policy_matches(requested: &str, endpoint: &EndpointDescription) -> bool {
    requested.is_empty() || endpoint.security_policy_uri.eq_ignore_ascii_case(requested)
}

/// Rewrites `endpoint`'s host and port with the ones from `configured_url`.
fn override_host(
    mut endpoint: EndpointDescription,
    configured_url: &str,
) -> UaResult<EndpointDescription> {
    let configured = EndpointUrl::parse(configured_url)?;
    let advertised = EndpointUrl::parse(&endpoint.endpoint_url)?;
    let rewritten = EndpointUrl {
        host: configured.host,
        port: configured.port,
        path: advertised.path,
    };
    debug!(
        advertised = %endpoint.endpoint_url,
        rewritten = %rewritten,
        "overriding advertised endpoint host"
    );
    endpoint.endpoint_url = rewritten.to_string();
    Ok(endpoint)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_default_port() {
        let url = EndpointUrl::parse("opc.tcp://plc7").unwrap();
        assert_eq!(url.host, "plc7");
        assert_eq!(url.port, DEFAULT_OPC_TCP_PORT);
        assert_eq!(url.path, "");
    }

    #[test]
    fn parse_keeps_explicit_port_and_path() {
        let url = EndpointUrl::parse("opc.tcp://10.0.0.5:48010/ua/server").unwrap();
        assert_eq!(url.host, "10.0.0.5");
        assert_eq!(url.port, 48010);
        assert_eq!(url.path, "/ua/server");
        assert_eq!(url.to_string(), "opc.tcp://10.0.0.5:48010/ua/server");
    }

    #[test]
    fn parse_handles_ipv6_literals() {
        let url = EndpointUrl::parse("opc.tcp://[fe80::1]:4841/x").unwrap();
        assert_eq!(url.host, "fe80::1");
        assert_eq!(url.port, 4841);
        assert_eq!(url.to_string(), "opc.tcp://[fe80::1]:4841/x");
    }

    #[test]
    fn parse_rejects_wrong_scheme() {
        assert!(EndpointUrl::parse("http://plc7:4840").is_err());
        assert!(EndpointUrl::parse("opc.tcp://").is_err());
        assert!(EndpointUrl::parse("opc.tcp://plc7:notaport").is_err());
    }

    #[test]
    fn blank_policy_matches_any() {
        let endpoint = EndpointDescription {
            endpoint_url: "opc.tcp://plc7:4840".to_string(),
            security_mode: SecurityMode::None,
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".to_string(),
            security_level: 0,
            server_certificate: None,
        };
        assert!(policy_matches("", &endpoint));
        assert!(policy_matches(
            "HTTP://OPCFOUNDATION.ORG/UA/SECURITYPOLICY#NONE",
            &endpoint
        ));
        assert!(!policy_matches("something-else", &endpoint));
    }

    #[test]
    fn override_host_keeps_advertised_path() {
        let endpoint = EndpointDescription {
            endpoint_url: "opc.tcp://internal-name:4840/ua/server".to_string(),
            security_mode: SecurityMode::None,
            security_policy_uri: String::new(),
            security_level: 0,
            server_certificate: None,
        };
        let rewritten = override_host(endpoint, "opc.tcp://10.0.0.5:4840").unwrap();
        assert_eq!(rewritten.endpoint_url, "opc.tcp://10.0.0.5:4840/ua/server");
    }
}
