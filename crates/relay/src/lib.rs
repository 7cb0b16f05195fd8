//! Sockbridge Relay
//!
//! Server side of the bridge: accepts WebSocket upgrade requests carrying a
//! shared secret and a `host:port` destination, dials the destination over
//! TCP and pipes bytes both ways until either side closes.
//!
//! ## Request handling
//!
//! 1. `Upgrade: websocket` must be present, otherwise 426 `Not WebSocket`
//! 2. `X-Password` must match the configured secret, otherwise 403 `Unauthorized`
//! 3. `X-Target` must parse as `host:port`, otherwise 400 `Invalid Target`
//! 4. The connection is upgraded (101) and the relay runs in the background
//!
//! Dial failures after the upgrade close the WebSocket without a diagnostic.

mod handler;
mod server;
mod tracker;

pub use handler::{connect, connection_request, handle, RelayConfig, RelayRejection, RelayState};
pub use server::{router, RelayServer};
pub use tracker::{ActiveSessions, SessionGuard};
