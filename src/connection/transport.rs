//! WebSocket Transport Layer
//!
//! Single responsibility: Open one physical WebSocket and report its events.
//! No knowledge of connection state, request correlation, or retry policy.
//!
//! `Connector::open` starts the handshake and returns immediately; everything
//! that happens afterwards is reported through the `SocketListener` it was
//! given. `PhysicalSocket::cancel` aborts the socket without a closing
//! handshake, so teardown is bounded in time.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderValue},
        protocol::Message,
        Error as WsError,
    },
    Connector as TlsConnector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use super::socket::SocketListener;
use crate::error::SocketError;

/// Close code reported when the peer vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Everything needed to start one handshake.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub url: String,
    /// `Authorization` header value, rendered fresh for this attempt
    pub authorization: String,
    pub user_agent: String,
}

/// Why a physical socket failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFailure {
    /// Upgrade rejected with an HTTP status
    Http { status: u16 },
    /// Host name did not resolve
    UnknownHost(String),
    /// Aborted by the caller
    Canceled,
    /// Any other I/O or protocol failure
    Transport(String),
}

/// One live physical socket.
pub trait PhysicalSocket: Send + Sync {
    /// Queue a binary message. Returns false when the socket can no longer send.
    fn send_binary(&self, data: Vec<u8>) -> bool;

    /// Abort immediately, without a closing handshake.
    fn cancel(&self);
}

/// Factory for physical sockets.
pub trait Connector: Send + Sync {
    /// Start an asynchronous handshake.
    ///
    /// Implementations must not invoke `listener` before returning.
    fn open(&self, request: HandshakeRequest, listener: SocketListener) -> Box<dyn PhysicalSocket>;
}

/// TLS client configuration restricted to TLS 1.2 and 1.3 with webpki roots.
pub fn restricted_tls_config() -> Result<rustls::ClientConfig, SocketError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
    .map_err(|e| SocketError::Tls(format!("Failed to build TLS config: {}", e)))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(config)
}

/// Production connector backed by tokio-tungstenite.
///
/// Sockets run on the ambient tokio runtime, so `open` must be called from
/// within one.
#[derive(Clone)]
pub struct WsConnector {
    tls: Arc<rustls::ClientConfig>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self, SocketError> {
        Ok(Self {
            tls: Arc::new(restricted_tls_config()?),
            connect_timeout,
        })
    }
}

impl Connector for WsConnector {
    fn open(&self, request: HandshakeRequest, listener: SocketListener) -> Box<dyn PhysicalSocket> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            request,
            Arc::clone(&self.tls),
            self.connect_timeout,
            listener,
            outbound_rx,
        ));
        Box::new(WsSocket {
            outbound: outbound_tx,
            task,
        })
    }
}

struct WsSocket {
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl PhysicalSocket for WsSocket {
    fn send_binary(&self, data: Vec<u8>) -> bool {
        !self.task.is_finished() && self.outbound.send(Message::Binary(data)).is_ok()
    }

    fn cancel(&self) {
        self.task.abort();
    }
}

/// Socket task: handshake, then pump outbound messages and inbound events
/// until the socket ends or the task is aborted.
async fn run_socket(
    request: HandshakeRequest,
    tls: Arc<rustls::ClientConfig>,
    connect_timeout: Duration,
    listener: SocketListener,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let ws = match tokio::time::timeout(connect_timeout, handshake(&request, tls)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(failure)) => {
            listener.on_failure(failure);
            return;
        }
        Err(_) => {
            listener.on_failure(SocketFailure::Transport(format!(
                "Connect timed out after {:?}",
                connect_timeout
            )));
            return;
        }
    };

    listener.on_open();
    let (mut sink, mut stream) = ws.split();
    let mut close: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            Some(message) = outbound.recv() => {
                if let Err(e) = sink.send(message).await {
                    listener.on_failure(SocketFailure::Transport(format!("Failed to send: {}", e)));
                    return;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Binary(data))) => listener.on_message(data),
                Some(Ok(Message::Text(text))) => listener.on_text(text),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                    debug!(code = code, reason = %reason, "Peer is closing the socket");
                    listener.on_closing(code, &reason);
                    close = Some((code, reason));
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by tungstenite
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    let (code, reason) = close.take().unwrap_or((ABNORMAL_CLOSURE, String::new()));
                    listener.on_closed(code, &reason);
                    return;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    listener.on_failure(SocketFailure::Transport(e.to_string()));
                    return;
                }
            }
        }
    }
}

async fn handshake(
    request: &HandshakeRequest,
    tls: Arc<rustls::ClientConfig>,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, SocketFailure> {
    let url = Url::parse(&request.url)
        .map_err(|e| SocketFailure::Transport(format!("Invalid URL {}: {}", request.url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| SocketFailure::Transport(format!("URL has no host: {}", request.url)))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SocketFailure::Transport(format!("URL has no port: {}", request.url)))?;

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| SocketFailure::UnknownHost(format!("{}: {}", host, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(SocketFailure::UnknownHost(host));
    }

    let stream = TcpStream::connect(&addrs[..])
        .await
        .map_err(|e| SocketFailure::Transport(format!("TCP connect to {} failed: {}", host, e)))?;

    let mut ws_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| SocketFailure::Transport(format!("Failed to build request: {}", e)))?;
    let headers = ws_request.headers_mut();
    headers.insert(header::AUTHORIZATION, header_value(&request.authorization)?);
    headers.insert(header::USER_AGENT, header_value(&request.user_agent)?);

    let connector = if url.scheme() == "wss" {
        TlsConnector::Rustls(tls)
    } else {
        TlsConnector::Plain
    };

    let (ws, _) = client_async_tls_with_config(ws_request, stream, None, Some(connector))
        .await
        .map_err(classify_handshake_error)?;
    Ok(ws)
}

fn header_value(value: &str) -> Result<HeaderValue, SocketFailure> {
    HeaderValue::from_str(value)
        .map_err(|e| SocketFailure::Transport(format!("Invalid header value: {}", e)))
}

fn classify_handshake_error(error: WsError) -> SocketFailure {
    match error {
        WsError::Http(response) => SocketFailure::Http {
            status: response.status().as_u16(),
        },
        other => SocketFailure::Transport(other.to_string()),
    }
}
