//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use sockbridge_core::{PASSWORD_HEADER, TARGET_HEADER};
use sockbridge_relay::{RelayConfig, RelayServer};

pub const SECRET: &str = "integration-secret";

/// Upper bound for anything that should happen "promptly"
pub const PROMPT: Duration = Duration::from_secs(5);

/// Start a relay on an ephemeral loopback port
pub async fn start_relay() -> RelayServer {
    start_relay_with(RelayConfig::default().with_secret(SECRET)).await
}

pub async fn start_relay_with(config: RelayConfig) -> RelayServer {
    sockbridge_logging::try_init_logging(true);

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut server = RelayServer::new(addr, config);
    server.start().await.expect("relay should bind");
    server
}

/// TCP service that echoes every connection back to itself
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// TCP service that accepts one connection and reports every read
pub async fn start_recording_server() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    (addr, rx)
}

/// TCP service that accepts one connection and reports everything read
/// once the peer shuts down its write side
pub async fn start_draining_server() -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let _ = stream.read_to_end(&mut received).await;
        let _ = tx.send(received);
    });
    (addr, rx)
}

/// TCP service that writes `payload` to the first connection and closes it
pub async fn start_closing_server(payload: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = stream.write_all(payload).await;
        let _ = stream.shutdown().await;
    });
    addr
}

/// A loopback address nothing listens on
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// WebSocket handshake request with optional relay headers
pub fn ws_request(relay: SocketAddr, password: Option<&str>, target: Option<&str>) -> Request {
    let mut request = format!("ws://{}/", relay).into_client_request().unwrap();
    let headers = request.headers_mut();
    if let Some(password) = password {
        headers.insert(PASSWORD_HEADER, HeaderValue::from_str(password).unwrap());
    }
    if let Some(target) = target {
        headers.insert(TARGET_HEADER, HeaderValue::from_str(target).unwrap());
    }
    request
}

/// Connect a raw TCP client, used to speak to the CONNECT proxy
pub async fn tcp_connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}
