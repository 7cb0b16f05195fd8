//! Upgrade-request validation
//!
//! Checks run in a fixed order and the first failure wins:
//! upgrade indicator, shared secret, then destination.

use crate::{RelayError, Result, Target, WEBSOCKET_PROTOCOL};

/// The relay-relevant parts of an inbound upgrade request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// `Upgrade: websocket` was present
    pub upgrade: bool,
    /// Raw shared-secret header value
    pub password: Option<String>,
    /// Raw `host:port` header value
    pub target: Option<String>,
}

impl ConnectionRequest {
    /// Build from raw header values. Header lookup itself is left to the
    /// HTTP layer so this crate stays framework-agnostic.
    pub fn from_headers(
        upgrade: Option<&str>,
        password: Option<&str>,
        target: Option<&str>,
    ) -> Self {
        Self {
            upgrade: upgrade == Some(WEBSOCKET_PROTOCOL),
            password: password.map(str::to_string),
            target: target.map(str::to_string),
        }
    }

    /// Validate against the configured secret and return the destination.
    pub fn validate(&self, secret: &str) -> Result<Target> {
        if !self.upgrade {
            return Err(RelayError::NotUpgrade);
        }

        if self.password.as_deref() != Some(secret) {
            return Err(RelayError::Unauthorized);
        }

        let target = self.target.as_deref().unwrap_or_default().parse()?;
        Ok(target)
    }
}
