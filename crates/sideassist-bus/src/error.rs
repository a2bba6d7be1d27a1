use std::path::PathBuf;

/// Errors raised while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The packet header contains an invalid magic number.
    #[error("invalid packet magic (expected 0x5341 \"SA\")")]
    InvalidMagic,

    /// The packet body exceeds the configured maximum size.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// The packet kind byte is not known.
    #[error("unknown packet kind {0:#04x}")]
    UnknownKind(u8),

    /// The packet body does not match its kind.
    #[error("malformed {kind} packet: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

/// Errors that can occur on the bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// An I/O error occurred on the socket.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet-level error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failed to bind the broker socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the broker socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The handshake did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The broker refused the connection.
    #[error("connection rejected by broker: {0}")]
    Rejected(String),

    /// Topic name or filter is not valid.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The other side closed the connection.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, BusError>;
