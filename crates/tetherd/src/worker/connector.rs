//! Opening a relay session: SOCKS5 through the relay, then TLS + websocket
//! to the upstream endpoint.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use thiserror::Error;
use tracing::debug;
use url::Url;

use tether_core::{DomainError, RelayId};

// ============================================================================
// Types
// ============================================================================

/// Byte stream a relay session runs over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// A live websocket to the upstream, carried over some [`Transport`].
pub type RelaySocket = WebSocketStream<MaybeTlsStream<Box<dyn Transport>>>;

/// Errors while establishing a relay session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The relay identifier does not yield a dialable proxy address
    #[error("invalid relay: {0}")]
    InvalidRelay(#[from] DomainError),

    /// The configured upstream endpoint is unusable
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// SOCKS5 negotiation with the proxy failed
    #[error("proxy error: {0}")]
    Proxy(#[from] tokio_socks::Error),

    /// TLS or websocket handshake failed, or the socket errored
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid user agent: {0}")]
    UserAgent(#[from] InvalidHeaderValue),

    #[error("TLS setup error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens sessions for relays.
///
/// The worker only depends on this trait, so tests can hand it in-memory
/// sockets instead of dialing real proxies.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, relay: &RelayId) -> Result<RelaySocket, ConnectError>;
}

// ============================================================================
// SOCKS5 Connector
// ============================================================================

/// Dials every relay as a SOCKS5 proxy.
///
/// `http://` relays are dialed the same way; the scheme only labels how the
/// address was written in the relay list.
pub struct SocksConnector {
    endpoint: Url,
    target_host: String,
    target_port: u16,
    user_agent: HeaderValue,
    tls: native_tls::TlsConnector,
}

impl SocksConnector {
    /// Creates a connector for the given upstream websocket endpoint.
    pub fn new(
        endpoint: &str,
        user_agent: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self, ConnectError> {
        let invalid = |reason: String| ConnectError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "wss" && url.scheme() != "ws" {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        let target_host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let target_port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .danger_accept_invalid_hostnames(accept_invalid_certs)
            .build()?;

        Ok(Self {
            endpoint: url,
            target_host,
            target_port,
            user_agent: HeaderValue::from_str(user_agent)?,
            tls,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RelayConnector for SocksConnector {
    async fn connect(&self, relay: &RelayId) -> Result<RelaySocket, ConnectError> {
        let proxy = relay.proxy_endpoint()?;
        let proxy_addr = proxy.authority();
        let target = (self.target_host.as_str(), self.target_port);

        debug!(relay = %relay, proxy = %proxy_addr, "Dialing proxy");

        let tunnel = match &proxy.credentials {
            Some(creds) => {
                Socks5Stream::connect_with_password(
                    proxy_addr.as_str(),
                    target,
                    &creds.username,
                    &creds.password,
                )
                .await?
            }
            None => Socks5Stream::connect(proxy_addr.as_str(), target).await?,
        };

        let mut request = self.endpoint.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(USER_AGENT, self.user_agent.clone());

        let transport: Box<dyn Transport> = Box::new(tunnel);
        let (socket, response) = client_async_tls_with_config(
            request,
            transport,
            None,
            Some(Connector::NativeTls(self.tls.clone())),
        )
        .await?;

        debug!(relay = %relay, status = %response.status(), "Websocket handshake complete");
        Ok(socket)
    }
}
