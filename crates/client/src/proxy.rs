//! HTTP CONNECT proxy (CONNECT only, NO AUTH)
//!
//! Listens for local clients, reads one request head per connection and,
//! for `CONNECT host:port`, dials the relay with that destination. Once the
//! relay has upgraded, the client gets `200 Connection Established` and the
//! connection is piped through a [`RelaySession`].
//!
//! Anything other than CONNECT is answered with 503.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use sockbridge_core::{RelaySession, SessionId, SessionOptions, Target, DEFAULT_SECRET};

use crate::{dial_relay, ClientError, Result};

/// Largest request head accepted from a local client
const MAX_HEAD_SIZE: usize = 8 * 1024;

const RESPONSE_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const RESPONSE_BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_UNAVAILABLE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// CONNECT proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Relay WebSocket URL (`ws://` or `wss://`)
    pub relay_url: String,
    /// Shared secret sent as `X-Password`
    pub password: String,
    /// Bound on the relay handshake
    pub dial_timeout: Duration,
    /// Pipe tuning
    pub session: SessionOptions,
}

impl ProxyConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            password: DEFAULT_SECRET.to_string(),
            dial_timeout: Duration::from_secs(30),
            session: SessionOptions::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }
}

/// What the local client asked for
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProxyRequest {
    Connect(Target),
    Unsupported(String),
}

/// Local HTTP CONNECT proxy
pub struct ConnectProxy {
    listen_addr: SocketAddr,
    config: Arc<ProxyConfig>,
    /// Handle for the listener task
    handle: Option<JoinHandle<()>>,
}

impl ConnectProxy {
    pub fn new(listen_addr: SocketAddr, config: ProxyConfig) -> Self {
        Self {
            listen_addr,
            config: Arc::new(config),
            handle: None,
        }
    }

    /// Start listening for proxy clients.
    ///
    /// Returns immediately; the proxy runs in a background task.
    pub async fn start(&mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        let actual_addr = listener.local_addr()?;
        info!("CONNECT proxy listening on {} via {}", actual_addr, self.config.relay_url);
        self.listen_addr = actual_addr;

        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!("Proxy connection from {}", peer_addr);
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, config).await {
                                debug!("Proxy connection from {} ended: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Proxy accept error: {}", e);
                    }
                }
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the proxy
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("CONNECT proxy stopped");
        }
    }

    /// Get the listening address
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

impl Drop for ConnectProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle a single proxy connection
async fn handle_connection(mut stream: TcpStream, config: Arc<ProxyConfig>) -> Result<()> {
    let (head, early_data) = match read_request_head(&mut stream).await {
        Ok(parts) => parts,
        Err(e @ ClientError::InvalidRequest(_)) => {
            let _ = stream.write_all(RESPONSE_BAD_REQUEST).await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let target = match parse_request_line(&head) {
        Ok(ProxyRequest::Connect(target)) => target,
        Ok(ProxyRequest::Unsupported(method)) => {
            stream.write_all(RESPONSE_UNAVAILABLE).await?;
            return Err(ClientError::InvalidRequest(format!("Unsupported method: {}", method)));
        }
        Err(e) => {
            stream.write_all(RESPONSE_BAD_REQUEST).await?;
            return Err(e);
        }
    };

    info!("CONNECT {}", target);

    let mut socket = match dial_relay(&config.relay_url, &config.password, &target, config.dial_timeout).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("Relay refused {}: {}", target, e);
            stream.write_all(RESPONSE_BAD_GATEWAY).await?;
            return Err(e);
        }
    };

    stream.write_all(RESPONSE_ESTABLISHED).await?;

    // Bytes the client sent right behind the request head
    if !early_data.is_empty() {
        socket.send(Message::binary(early_data)).await?;
    }

    let id = SessionId::random();
    let report = RelaySession::new(id, socket, stream, config.session.clone())
        .run()
        .await;

    if let Some(e) = &report.error {
        debug!("Tunnel {} to {} ended with error: {}", id, target, e);
    }
    debug!(
        "Tunnel {} to {} closed ({:?}): {} bytes up, {} bytes down",
        id, target, report.ended_by, report.bytes_to_ws, report.bytes_to_tcp
    );

    Ok(())
}

/// Read up to the end of the request head.
///
/// Returns the head (without the blank line) and any bytes after it.
async fn read_request_head(stream: &mut TcpStream) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ClientError::InvalidRequest(
                "Connection closed before request head".to_string(),
            ));
        }

        // Resume the search a few bytes back in case the terminator straddles reads
        let search_from = buf.len().saturating_sub(3);
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_head_end(&buf[search_from..]) {
            let end = search_from + pos;
            let rest = buf.split_off(end + 4);
            buf.truncate(end);
            return Ok((buf, rest));
        }

        if buf.len() > MAX_HEAD_SIZE {
            return Err(ClientError::InvalidRequest(format!(
                "Request head exceeds {} bytes",
                MAX_HEAD_SIZE
            )));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse `METHOD authority VERSION` from the first line of the head
fn parse_request_line(head: &[u8]) -> Result<ProxyRequest> {
    let head = std::str::from_utf8(head)
        .map_err(|_| ClientError::InvalidRequest("Request head is not UTF-8".to_string()))?;
    let line = head.split("\r\n").next().unwrap_or_default();

    let mut parts = line.split_whitespace();
    let (method, authority, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(authority), Some(version), None) => (method, authority, version),
        _ => {
            return Err(ClientError::InvalidRequest(format!("Malformed request line: {}", line)));
        }
    };

    if !version.starts_with("HTTP/") {
        return Err(ClientError::InvalidRequest(format!("Unsupported version: {}", version)));
    }

    if !method.eq_ignore_ascii_case("CONNECT") {
        return Ok(ProxyRequest::Unsupported(method.to_string()));
    }

    let target = authority
        .parse::<Target>()
        .map_err(|e| ClientError::InvalidRequest(format!("Bad CONNECT target {}: {}", authority, e)))?;
    Ok(ProxyRequest::Connect(target))
}
