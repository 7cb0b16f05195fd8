//! Relay session: one upgraded WebSocket piped to one TCP stream
//!
//! The session owns both stream handles. Two directions run concurrently
//! inside the session future:
//!
//! - TCP → WS: each read becomes one binary frame; TCP EOF ends the session.
//! - WS → TCP: binary frames are pushed into a bounded channel and a writer
//!   drains it into the TCP socket. Non-binary frames are dropped. A close
//!   frame, stream end, or error closes the channel, the writer flushes what
//!   is queued and shuts down the TCP write side.
//!
//! Whichever direction finishes first ends the session. The WebSocket is
//! then closed (bounded by `close_grace`) and both sockets are dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace, warn};

use crate::{Frame, Inbound, RelayError, Result, SessionId};

/// Bytes read from TCP per outbound frame
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Inbound frames buffered between the WebSocket reader and TCP writer
pub const DEFAULT_CHANNEL_DEPTH: usize = 32;

/// Upper bound on sending the closing handshake once a session ends
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a single relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Authenticated,
    Connecting,
    Relaying,
    Closed,
}

impl SessionState {
    /// Forward-only transitions; any live state may jump to `Closed`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Pending, Authenticated) | (Authenticated, Connecting) | (Connecting, Relaying) => true,
            (Closed, _) => false,
            (_, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Authenticated => "authenticated",
            Self::Connecting => "connecting",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the state of one session
#[derive(Debug)]
pub struct Lifecycle {
    id: SessionId,
    state: SessionState,
}

impl Lifecycle {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Pending,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`. Returns false (and keeps the current state) for a
    /// backwards or repeated transition.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_advance_to(next) {
            warn!(
                "Session {} refused transition {} -> {}",
                self.id, self.state, next
            );
            return false;
        }
        trace!("Session {} {} -> {}", self.id, self.state, next);
        self.state = next;
        true
    }
}

/// Tuning for a relay session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Maximum bytes per TCP read (and so per outbound frame)
    pub chunk_size: usize,
    /// Bounded depth of the inbound frame channel
    pub channel_depth: usize,
    /// Time allowed for sending the WebSocket close once the session ends
    pub close_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_depth: DEFAULT_CHANNEL_DEPTH,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

/// Which side ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// TCP destination reached EOF
    TcpClosed,
    /// WebSocket peer closed or its stream ended
    WebSocketClosed,
    /// Either direction failed; see `SessionReport::error`
    Failed,
}

/// Summary of a finished session
#[derive(Debug)]
pub struct SessionReport {
    pub id: SessionId,
    /// Bytes written to the TCP destination
    pub bytes_to_tcp: u64,
    /// Bytes sent to the WebSocket peer
    pub bytes_to_ws: u64,
    pub ended_by: EndReason,
    /// Suppressed relay failure, if any
    pub error: Option<RelayError>,
    pub elapsed: Duration,
}

/// A WebSocket and a TCP stream owned together for the lifetime of a relay
pub struct RelaySession<W> {
    id: SessionId,
    ws: W,
    tcp: TcpStream,
    options: SessionOptions,
}

impl<W> RelaySession<W> {
    pub fn new(id: SessionId, ws: W, tcp: TcpStream, options: SessionOptions) -> Self {
        Self {
            id,
            ws,
            tcp,
            options,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Pipe both directions until either side finishes, then close both.
    ///
    /// Relay errors are not returned; they end the session and are recorded
    /// in the report.
    pub async fn run<F, E>(self) -> SessionReport
    where
        W: Stream<Item = std::result::Result<F, E>> + Sink<F, Error = E> + Unpin + Send,
        F: Frame,
        E: fmt::Display,
    {
        let Self {
            id,
            ws,
            tcp,
            options,
        } = self;
        let started = Instant::now();

        let (mut ws_tx, ws_rx) = ws.split();
        let (tcp_rx, tcp_tx) = tcp.into_split();

        let to_tcp = AtomicU64::new(0);
        let to_ws = AtomicU64::new(0);

        let (ended_by, error) = tokio::select! {
            result = tcp_to_ws(tcp_rx, &mut ws_tx, options.chunk_size, &to_ws) => match result {
                Ok(()) => (EndReason::TcpClosed, None),
                Err(e) => (EndReason::Failed, Some(e)),
            },
            result = ws_to_tcp(id, ws_rx, tcp_tx, options.channel_depth, &to_tcp) => match result {
                Ok(()) => (EndReason::WebSocketClosed, None),
                Err(e) => (EndReason::Failed, Some(e)),
            },
        };

        // The WebSocket is closed no matter which side finished
        match tokio::time::timeout(options.close_grace, ws_tx.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!("Session {} close after end: {}", id, e),
            Err(_) => debug!("Session {} close handshake timed out", id),
        }

        SessionReport {
            id,
            bytes_to_tcp: to_tcp.load(Ordering::Relaxed),
            bytes_to_ws: to_ws.load(Ordering::Relaxed),
            ended_by,
            error,
            elapsed: started.elapsed(),
        }
    }
}

async fn tcp_to_ws<S, F>(
    mut tcp: OwnedReadHalf,
    ws: &mut S,
    chunk_size: usize,
    counter: &AtomicU64,
) -> Result<()>
where
    S: Sink<F> + Unpin,
    S::Error: fmt::Display,
    F: Frame,
{
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = tcp.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        ws.send(F::binary(Bytes::copy_from_slice(&buf[..n])))
            .await
            .map_err(|e| RelayError::WebSocket(e.to_string()))?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

async fn ws_to_tcp<R, F, E>(
    id: SessionId,
    ws: R,
    tcp: OwnedWriteHalf,
    depth: usize,
    counter: &AtomicU64,
) -> Result<()>
where
    R: Stream<Item = std::result::Result<F, E>> + Unpin,
    F: Frame,
    E: fmt::Display,
{
    let (tx, rx) = mpsc::channel(depth.clamp(1, Semaphore::MAX_PERMITS));

    let drain = drain_to_tcp(rx, tcp, counter);
    tokio::pin!(drain);

    tokio::select! {
        pumped = pump_frames(id, ws, tx) => {
            // Sender is gone, so the writer flushes the queue and shuts down
            let drained = drain.await;
            pumped.and(drained)
        }
        drained = &mut drain => drained,
    }
}

/// Push binary payloads from the WebSocket into the channel
async fn pump_frames<R, F, E>(id: SessionId, mut ws: R, tx: mpsc::Sender<Bytes>) -> Result<()>
where
    R: Stream<Item = std::result::Result<F, E>> + Unpin,
    F: Frame,
    E: fmt::Display,
{
    while let Some(message) = ws.next().await {
        let message = message.map_err(|e| RelayError::WebSocket(e.to_string()))?;
        match message.into_inbound() {
            Inbound::Data(data) => {
                if data.is_empty() {
                    continue;
                }
                if tx.send(data).await.is_err() {
                    // Writer already stopped and reports its own error
                    return Ok(());
                }
            }
            Inbound::Close => {
                trace!("Session {} peer sent close", id);
                return Ok(());
            }
            Inbound::Skip(kind) => {
                trace!("Session {} dropped {} frame", id, kind);
            }
        }
    }
    Ok(())
}

/// Write queued payloads to TCP, then shut down the write side
async fn drain_to_tcp(
    mut rx: mpsc::Receiver<Bytes>,
    mut tcp: OwnedWriteHalf,
    counter: &AtomicU64,
) -> Result<()> {
    while let Some(chunk) = rx.recv().await {
        tcp.write_all(&chunk).await?;
        counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }
    tcp.shutdown().await?;
    Ok(())
}
