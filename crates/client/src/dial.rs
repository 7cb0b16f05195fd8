//! Relay dialing

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use sockbridge_core::{Target, PASSWORD_HEADER, TARGET_HEADER};

use crate::{ClientError, Result};

/// WebSocket connected to the relay
pub type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the relay URL from `host[:port][/path]`.
///
/// `wss://` unless `insecure` is set. A value that already carries a
/// scheme is used as is.
pub fn relay_url(relay: &str, insecure: bool) -> String {
    if relay.starts_with("ws://") || relay.starts_with("wss://") {
        return relay.to_string();
    }
    let scheme = if insecure { "ws" } else { "wss" };
    format!("{}://{}", scheme, relay)
}

/// Open a relay session to `target`.
///
/// Resolves once the relay has answered 101. Any other answer becomes
/// [`ClientError::Rejected`] with the relay's status and body.
pub async fn dial_relay(
    url: &str,
    password: &str,
    target: &Target,
    timeout: Duration,
) -> Result<RelaySocket> {
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        PASSWORD_HEADER,
        HeaderValue::from_str(password).map_err(|_| ClientError::InvalidHeader(PASSWORD_HEADER))?,
    );
    headers.insert(
        TARGET_HEADER,
        HeaderValue::from_str(&target.to_string())
            .map_err(|_| ClientError::InvalidHeader(TARGET_HEADER))?,
    );

    let (socket, response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| ClientError::Timeout)??;

    debug!("Relay {} accepted {} ({})", url, target, response.status());
    Ok(socket)
}
