use std::path::PathBuf;

use greybus_message::MessageError;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Encoding or decoding a message failed.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The receiving side refused a message for this cport.
    #[error("cport {0} rejected")]
    InvalidCport(u16),

    /// The cport is not being listened on.
    #[error("cport {0} is not listening")]
    NotListening(u16),

    /// No peer is connected.
    #[error("no peer connected")]
    NotConnected,

    /// The transport has not been initialised.
    #[error("transport not initialised")]
    NotInitialized,

    /// The transport cannot perform the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
