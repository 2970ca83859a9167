//! Error types for quadlink

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// quadlink error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (fatal for the connection it occurred on)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection (orderly EOF)
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Peer stayed silent past the liveness timeout
    #[error("Liveness timeout")]
    Timeout,

    /// Malformed envelope or payload body
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Payload body length does not match what its header implies
    #[error("Length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Length implied by the header/flags
        expected: usize,
        /// Length actually received
        actual: usize,
    },

    /// Sensor field buffer is at capacity and must be flushed or shifted first
    #[error("Buffer full: {0}")]
    BufferFull(&'static str),

    /// Parameter file names a tuple that does not exist
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
