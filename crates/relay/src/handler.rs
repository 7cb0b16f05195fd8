//! Relay handler
//!
//! Validates the upgrade request, answers with 101 and runs the relay in
//! the upgraded connection's task.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::SinkExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use sockbridge_core::{
    ConnectionRequest, Lifecycle, RelayError, RelaySession, Result, SessionId, SessionOptions,
    SessionState, Target, DEFAULT_SECRET, PASSWORD_HEADER, TARGET_HEADER,
};

use crate::{ActiveSessions, SessionGuard};

/// Largest WebSocket message accepted from a client (16 MiB)
const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Shared secret expected in `X-Password`
    pub secret: String,
    /// Bound on dialing the destination
    pub connect_timeout: Duration,
    /// Pipe tuning
    pub session: SessionOptions,
    /// Largest inbound WebSocket message
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            secret: DEFAULT_SECRET.to_string(),
            connect_timeout: Duration::from_secs(30),
            session: SessionOptions::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }
}

/// Shared state behind the router
#[derive(Debug)]
pub struct RelayState {
    config: RelayConfig,
    sessions: Arc<ActiveSessions>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(ActiveSessions::default()),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<ActiveSessions> {
        &self.sessions
    }
}

/// HTTP response for a request refused before the upgrade
#[derive(Debug)]
pub struct RelayRejection(pub RelayError);

impl From<RelayError> for RelayRejection {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for RelayRejection {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}

/// Extract the relay headers. Values that are not valid UTF-8 count as absent.
pub fn connection_request(headers: &HeaderMap) -> ConnectionRequest {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    ConnectionRequest::from_headers(
        get(header::UPGRADE.as_str()),
        get(PASSWORD_HEADER),
        get(TARGET_HEADER),
    )
}

/// Handle one upgrade request, on any path and method.
pub async fn handle(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let mut lifecycle = Lifecycle::new(SessionId::random());
    let id = lifecycle.id();

    let target = match connection_request(&headers).validate(&state.config.secret) {
        Ok(target) => target,
        Err(e) => {
            debug!("Session {} rejected: {:?}", id, e);
            lifecycle.advance(SessionState::Closed);
            return RelayRejection(e).into_response();
        }
    };
    lifecycle.advance(SessionState::Authenticated);

    // Headers say websocket but the handshake preconditions failed
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!("Session {} cannot upgrade: {}", id, rejection.body_text());
            lifecycle.advance(SessionState::Closed);
            return RelayRejection(RelayError::Setup(rejection.body_text())).into_response();
        }
    };

    info!("Session {} authorized for {}", id, target);

    // Counted from here so a drain cannot miss a session mid-upgrade
    let guard = state.sessions.enter();

    upgrade
        .max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| warn!("Session {} upgrade failed: {}", id, e))
        .on_upgrade(move |socket| relay(state, guard, lifecycle, socket, target))
}

/// Dial `target` within `timeout`.
pub async fn connect(target: &Target, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(target.socket_addr()))
        .await
        .map_err(|_| RelayError::ConnectTimeout(target.to_string()))?
        .map_err(|e| RelayError::ConnectFailed {
            addr: target.to_string(),
            source: e,
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", target, e);
    }

    Ok(stream)
}

async fn relay(
    state: Arc<RelayState>,
    _guard: SessionGuard,
    mut lifecycle: Lifecycle,
    mut socket: WebSocket,
    target: Target,
) {
    let id = lifecycle.id();

    lifecycle.advance(SessionState::Connecting);
    let tcp = match connect(&target, state.config.connect_timeout).await {
        Ok(tcp) => tcp,
        Err(e) => {
            // The 101 is already out; the client only sees the close
            warn!("Session {} dial failed: {}", id, e);
            let _ = tokio::time::timeout(
                state.config.session.close_grace,
                SinkExt::close(&mut socket),
            )
            .await;
            lifecycle.advance(SessionState::Closed);
            return;
        }
    };

    lifecycle.advance(SessionState::Relaying);
    info!("Session {} relaying to {}", id, target);

    let report = RelaySession::new(id, socket, tcp, state.config.session.clone())
        .run()
        .await;
    lifecycle.advance(SessionState::Closed);

    if let Some(e) = &report.error {
        debug!("Session {} ended with error: {}", id, e);
    }
    info!(
        "Session {} to {} closed ({:?}): {} bytes up, {} bytes down in {:.1?}",
        id, target, report.ended_by, report.bytes_to_tcp, report.bytes_to_ws, report.elapsed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use sockbridge_core::ErrorKind;

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_connection_request_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert("x-password", HeaderValue::from_static("pw"));
        headers.insert("x-target", HeaderValue::from_static("example.com:80"));

        let request = connection_request(&headers);
        assert!(request.upgrade);
        assert_eq!(request.password.as_deref(), Some("pw"));
        assert_eq!(request.target.as_deref(), Some("example.com:80"));
        assert_eq!(request.validate("pw").unwrap(), Target::new("example.com", 80));
    }

    #[test]
    fn test_connection_request_non_utf8_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert("x-password", HeaderValue::from_bytes(b"\xffpw").unwrap());

        let request = connection_request(&headers);
        assert_eq!(request.password, None);
        assert_eq!(request.validate("pw").unwrap_err().kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_rejection_responses() {
        let cases = [
            (RelayError::NotUpgrade, StatusCode::UPGRADE_REQUIRED, "Not WebSocket"),
            (RelayError::Unauthorized, StatusCode::FORBIDDEN, "Unauthorized"),
            (
                RelayError::InvalidTarget(sockbridge_core::TargetError::Empty),
                StatusCode::BAD_REQUEST,
                "Invalid Target",
            ),
            (
                RelayError::Setup("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "boom",
            ),
        ];

        for (err, status, body) in cases {
            let response = RelayRejection(err).into_response();
            assert_eq!(response.status(), status);
            assert_eq!(body_of(response).await, body);
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect(&Target::new("127.0.0.1", port), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ConnectFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::RelayFailure);
    }

    #[tokio::test]
    async fn test_connect_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect(&Target::new("127.0.0.1", port), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[test]
    fn test_config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.secret, DEFAULT_SECRET);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));

        let config = config.with_secret("other");
        assert_eq!(config.secret, "other");
    }
}
