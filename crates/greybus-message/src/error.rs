/// Errors that can occur while building, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload buffer could not be allocated.
    #[error("out of memory allocating {size} byte payload")]
    OutOfMemory { size: usize },

    /// The payload does not fit in a single operation.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The header declares a size smaller than the header itself.
    #[error("invalid message size {declared} (minimum {min})")]
    InvalidSize { declared: usize, min: usize },

    /// An I/O error occurred while reading or writing messages.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, MessageError>;
