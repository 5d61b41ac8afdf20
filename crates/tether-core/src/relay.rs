//! Relay identifiers and the values derived from them.

use crate::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

// ============================================================================
// Scheme
// ============================================================================

/// Default port for a proxy address that does not name one.
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Transport scheme carried by every normalized relay identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// `http://` - the default for unprefixed relay list entries.
    Http,
    /// `socks5://`
    Socks5,
}

impl Scheme {
    /// Returns the scheme name without the `://` separator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks5 => "socks5",
        }
    }

    /// Returns the scheme prefix including the `://` separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Http => "http://",
            Self::Socks5 => "socks5://",
        }
    }

    /// Matches a scheme name case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("http") {
            Some(Self::Http)
        } else if name.eq_ignore_ascii_case("socks5") {
            Some(Self::Socks5)
        } else {
            None
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Relay Identifier
// ============================================================================

/// Normalized identifier of one upstream relay (a forward proxy address).
///
/// Always carries an explicit `http://` or `socks5://` prefix. Equality,
/// hashing and ordering use the normalized string, so `1.2.3.4:8080` and
/// `http://1.2.3.4:8080` name the same relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelayId(String);

impl RelayId {
    /// Normalizes and validates a relay address.
    ///
    /// Unprefixed input gets the `http://` prefix. Any explicit scheme other
    /// than `http` or `socks5` is rejected, as is input without a host.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyRelayAddress);
        }

        let normalized = match trimmed.split_once("://") {
            Some((name, rest)) => {
                let scheme = Scheme::from_name(name).ok_or_else(|| DomainError::UnsupportedScheme {
                    address: trimmed.to_string(),
                    scheme: name.to_string(),
                })?;
                format!("{}{}", scheme.prefix(), rest)
            }
            None => format!("{}{}", Scheme::Http.prefix(), trimmed),
        };

        let url = parse_url(&normalized)?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(DomainError::InvalidRelayAddress {
                address: normalized,
                reason: "missing host".to_string(),
            });
        }

        Ok(Self(normalized))
    }

    /// Returns the normalized string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the scheme this identifier was normalized to.
    pub fn scheme(&self) -> Scheme {
        if self.0.starts_with(Scheme::Socks5.prefix()) {
            Scheme::Socks5
        } else {
            Scheme::Http
        }
    }

    /// Extracts the proxy host, port and credentials.
    ///
    /// Every relay is dialed as SOCKS5, so the port defaults to
    /// [`DEFAULT_SOCKS_PORT`] regardless of the written scheme.
    pub fn proxy_endpoint(&self) -> DomainResult<ProxyEndpoint> {
        let rest = self
            .0
            .split_once("://")
            .map_or(self.0.as_str(), |(_, rest)| rest);
        let url = parse_url(&format!("{}{}", Scheme::Socks5.prefix(), rest))?;

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DomainError::InvalidRelayAddress {
                address: self.0.clone(),
                reason: "missing host".to_string(),
            })?;

        let port = url.port().unwrap_or(DEFAULT_SOCKS_PORT);

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(ProxyCredentials {
                username: decode_component(url.username()),
                password: decode_component(url.password().unwrap_or_default()),
            })
        };

        Ok(ProxyEndpoint {
            host,
            port,
            credentials,
        })
    }

    /// Derives the stable device identity for this relay.
    pub fn device_id(&self) -> DeviceId {
        DeviceId::derive(self)
    }
}

fn parse_url(address: &str) -> DomainResult<Url> {
    Url::parse(address).map_err(|e| DomainError::InvalidRelayAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelayId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RelayId> for String {
    fn from(id: RelayId) -> Self {
        id.0
    }
}

impl AsRef<str> for RelayId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Proxy Endpoint
// ============================================================================

/// Username/password pair for proxy authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where to dial for a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Host name or IP literal (IPv6 without brackets)
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyEndpoint {
    /// Returns `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

// ============================================================================
// Device Identifier
// ============================================================================

/// Device identity presented to the upstream for one relay.
///
/// A UUIDv3 over the normalized relay identifier in the DNS namespace, so
/// every reconnect of the same relay presents the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn derive(relay: &RelayId) -> Self {
        Self(Uuid::new_v3(&Uuid::NAMESPACE_DNS, relay.as_str().as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
