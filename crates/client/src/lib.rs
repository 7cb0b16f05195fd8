//! Sockbridge Client
//!
//! Client side of the bridge.
//!
//! - [`dial_relay`] opens a WebSocket to the relay with the shared secret
//!   and destination headers set.
//! - [`ConnectProxy`] is a local HTTP `CONNECT` proxy: every accepted
//!   tunnel becomes one relay session.

mod dial;
mod proxy;

pub use dial::{dial_relay, relay_url, RelaySocket};
pub use proxy::{ConnectProxy, ProxyConfig};

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Relay rejected the connection ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[source] tungstenite::Error),

    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Relay dial timed out")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
                body: response
                    .body()
                    .as_deref()
                    .map(|body| String::from_utf8_lossy(body).into_owned())
                    .unwrap_or_default(),
            },
            other => Self::WebSocket(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
