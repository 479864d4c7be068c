/// Errors that can occur while encoding, decoding, or transporting
/// protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4D4E \"MN\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload carried a type tag no message variant claims.
    ///
    /// Recoverable: the frame is fully consumed, the stream stays in
    /// sync, and the caller decides whether to skip or fail.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    /// The payload ended before the variant body was complete.
    #[error("truncated message body (tag {tag})")]
    Truncated { tag: u32 },

    /// A string field was not valid UTF-8.
    #[error("invalid string field: {0}")]
    InvalidString(#[from] std::str::Utf8Error),

    /// An I/O error occurred while reading or writing.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was
    /// received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ProtoError>;
