//! Tunnel destination and session identity
//!
//! A relay session is opened by a WebSocket upgrade request carrying the
//! shared secret in [`PASSWORD_HEADER`] and the destination in
//! [`TARGET_HEADER`]. The relay parses the destination into a [`Target`]
//! and dials it over plain TCP.
//!
//! IPv6 destinations must be bracketed (`[::1]:443`); a bare `::1:443` is
//! rejected since its port would be ambiguous.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

use crate::TargetError;

/// Header carrying the shared secret
pub const PASSWORD_HEADER: &str = "x-password";

/// Header carrying the `host:port` destination
pub const TARGET_HEADER: &str = "x-target";

/// Value the `Upgrade` header must carry
pub const WEBSOCKET_PROTOCOL: &str = "websocket";

/// Secret used when nothing is configured
pub const DEFAULT_SECRET: &str = "testPASSword";

/// Environment variable holding the shared secret
pub const PASSWORD_ENV: &str = "PASSWORD";

/// TCP destination of a relay session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Hostname or IP literal, without IPv6 brackets
    pub host: String,
    /// Destination port, never zero
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address tuple suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    /// Parse `host:port` or `[v6]:port`.
    ///
    /// The port is everything after the last `:` and must be ASCII digits
    /// in `1..=65535`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TargetError::Empty);
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TargetError::MissingPort(s.to_string()))?;

        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner,
            None if host.contains(':') => {
                return Err(TargetError::UnbracketedColon(s.to_string()));
            }
            None => host,
        };

        if host.is_empty() {
            return Err(TargetError::EmptyHost(s.to_string()));
        }

        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TargetError::InvalidPort(port.to_string()));
        }

        // Digit strings too long for u16 are out of range, not malformed
        let port = port
            .parse::<u16>()
            .map_err(|_| TargetError::PortOutOfRange(port.to_string()))?;
        if port == 0 {
            return Err(TargetError::PortOutOfRange("0".to_string()));
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Random identifier used to correlate log lines of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 8]);

impl SessionId {
    pub fn random() -> Self {
        let mut id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
