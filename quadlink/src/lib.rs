//! quadlink - telemetry and control link for a legged robot
//!
//! Connects a monitoring application to a robot controller over TCP:
//!
//! - [`transport`]: checksummed framing, heartbeat liveness, a multi-client
//!   [`Server`](transport::Server) and an auto-reconnecting
//!   [`Client`](transport::Client)
//! - [`protocol`]: 3-byte versioned envelope and the Sensor, State, Command
//!   and Parameter payloads
//! - [`archive`]: per-field sensor buffers, append-only logs and a rolling
//!   display window
//! - [`config`]: TOML configuration for the `quadlink` daemon

pub mod archive;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use protocol::{PayloadType, Protocol};
pub use transport::{Client, Endpoint, Server};
