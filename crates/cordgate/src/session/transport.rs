//! Gateway transports.
//!
//! A [`Connector`] opens one [`Transport`] per connection attempt. The driver
//! drops a transport before asking for the next one, so frames of an old
//! socket are never observed after a reconnect begins.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::config::ProxyConfig;

/// Upper bound on a proxy's CONNECT response head.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// The socket is gone. Carries the close frame's code when one arrived.
    Closed(Option<u16>),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),

    #[error("gateway url has no host: {0}")]
    MissingHost(String),

    #[error("proxy refused tunnel: {0}")]
    Proxy(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// One open gateway connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound event. Returns [`TransportEvent::Closed`] once the socket
    /// is gone and must not be polled after that.
    async fn recv(&mut self) -> TransportEvent;

    async fn close(&mut self);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

// ============================================================================
// WebSocket
// ============================================================================

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    socket: Socket,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    return TransportEvent::Closed(code);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "Ignoring binary gateway frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Gateway socket error");
                    return TransportEvent::Closed(None);
                }
                None => return TransportEvent::Closed(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(error = %e, "Error closing gateway socket");
        }
    }
}

/// Connects to the gateway URL, tunnelling through an HTTP proxy when one
/// is configured.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    proxy: Option<ProxyConfig>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, proxy: Option<ProxyConfig>) -> Self {
        Self {
            url: url.into(),
            proxy,
        }
    }

    async fn connect_via_proxy(&self, proxy: &ProxyConfig) -> Result<Socket, TransportError> {
        let url = Url::parse(&self.url)?;
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::MissingHost(self.url.clone()))?;
        let port = url.port_or_known_default().unwrap_or(443);
        let target = format!("{host}:{port}");

        let mut stream = TcpStream::connect(proxy.authority()).await?;
        let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;

        let head = read_response_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or_default();
        if status_line.split_whitespace().nth(1) != Some("200") {
            return Err(TransportError::Proxy(status_line.to_string()));
        }
        debug!(proxy = %proxy.authority(), target = %target, "Proxy tunnel established");

        let (socket, _) = tokio_tungstenite::client_async_tls(self.url.as_str(), stream).await?;
        Ok(socket)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let socket = match &self.proxy {
            Some(proxy) => self.connect_via_proxy(proxy).await?,
            None => tokio_tungstenite::connect_async(self.url.as_str()).await?.0,
        };
        debug!(url = %self.url, "Gateway socket open");
        Ok(Box::new(WebSocketTransport { socket }))
    }
}

/// Read up to the blank line ending an HTTP response head. Reads byte by
/// byte so nothing past the head is consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, TransportError> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_PROXY_RESPONSE {
            return Err(TransportError::Proxy("response head too large".to_string()));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(TransportError::Proxy("connection closed".to_string()));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
