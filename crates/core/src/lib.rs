//! Sockbridge Core Types
//!
//! Shared building blocks for the WebSocket ⇄ TCP relay: destination
//! parsing, upgrade-request validation, the error taxonomy, and the
//! [`RelaySession`] that pipes an upgraded socket to a TCP stream.

mod error;
mod frame;
mod request;
mod session;
mod tunnel;

pub use error::*;
pub use frame::{Frame, Inbound};
pub use request::*;
pub use session::*;
pub use tunnel::*;
