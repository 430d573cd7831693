//! Realtime connection.
//!
//! A single WebSocket speaking the Socket.IO text framing, authenticated
//! with the session's access credential and reconnected whenever the
//! credential rotates.

mod bridge;
pub mod packet;

pub use bridge::{ConnectionState, RealtimeBridge, RealtimeEvent, RealtimeStatus};
