//! Framed TCP transport with heartbeat liveness
//!
//! - [`frame`]: marker-search framing with additive checksums
//! - [`Connection`]: one non-blocking peer with its queues
//! - [`Server`]: many peers, drops silent ones
//! - [`Client`]: one peer, reconnects automatically

pub mod client;
pub mod connection;
pub mod frame;
pub mod server;
pub mod timer;

pub use client::{Client, ClientConfig, ConnectionState};
pub use connection::{Connection, Poll, Role};
pub use frame::{DEFAULT_MAX_FRAME_LEN, Frame, FrameDecoder};
pub use server::{Server, ServerConfig};
pub use timer::LoopTimer;

/// Common foreground surface of [`Server`] and [`Client`]
///
/// Lets application loops run the same request/reply handling on either end
/// of the link.
pub trait Endpoint: Send + Sync {
    /// Queue `data` to the peer(s) and write
    fn send(&self, data: &[u8]);

    /// Read, pass every decoded frame to `handler`, queue replies, write
    fn interact(&self, handler: &mut dyn FnMut(&[u8]) -> Option<Vec<u8>>);

    /// True if at least one peer is connected
    fn is_connected(&self) -> bool;
}
