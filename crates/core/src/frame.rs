//! WebSocket message abstraction
//!
//! The relay server speaks axum's WebSocket type and the CONNECT proxy
//! speaks tokio-tungstenite's. Both only need to build binary frames and
//! tell binary payloads apart from everything else, so [`RelaySession`]
//! is generic over [`Frame`].
//!
//! [`RelaySession`]: crate::RelaySession

use bytes::Bytes;

/// What an inbound WebSocket message means to the TCP side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Binary payload to write to TCP
    Data(Bytes),
    /// Peer sent a close frame
    Close,
    /// Not forwarded (text, ping, pong, raw frames)
    Skip(&'static str),
}

pub trait Frame: Sized + Send + Unpin + 'static {
    /// Wrap bytes read from TCP as a binary message
    fn binary(data: Bytes) -> Self;

    /// Classify a message received from the WebSocket peer
    fn into_inbound(self) -> Inbound;
}

#[cfg(feature = "axum")]
impl Frame for axum::extract::ws::Message {
    fn binary(data: Bytes) -> Self {
        Self::Binary(data)
    }

    fn into_inbound(self) -> Inbound {
        match self {
            Self::Binary(data) => Inbound::Data(data),
            Self::Close(_) => Inbound::Close,
            Self::Text(_) => Inbound::Skip("text"),
            Self::Ping(_) => Inbound::Skip("ping"),
            Self::Pong(_) => Inbound::Skip("pong"),
        }
    }
}

#[cfg(feature = "tungstenite")]
impl Frame for tokio_tungstenite::tungstenite::Message {
    fn binary(data: Bytes) -> Self {
        Self::Binary(data)
    }

    fn into_inbound(self) -> Inbound {
        match self {
            Self::Binary(data) => Inbound::Data(data),
            Self::Close(_) => Inbound::Close,
            Self::Text(_) => Inbound::Skip("text"),
            Self::Ping(_) => Inbound::Skip("ping"),
            Self::Pong(_) => Inbound::Skip("pong"),
            Self::Frame(_) => Inbound::Skip("frame"),
        }
    }
}
