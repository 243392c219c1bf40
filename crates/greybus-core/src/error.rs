use std::io::ErrorKind;

use greybus_message::{MessageError, OperationResult};
use greybus_transport::TransportError;

/// Errors returned by the engine.
#[derive(Debug, thiserror::Error)]
pub enum GreybusError {
    /// A caller passed an argument the engine cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The cport index is outside the configured table.
    #[error("cport {0} out of range")]
    InvalidCport(u16),

    /// A driver is already bound to the cport.
    #[error("cport {cport} already bound to {driver}")]
    AlreadyBound { cport: u16, driver: &'static str },

    /// No driver is bound to the cport.
    #[error("no driver bound to cport {0}")]
    NotBound(u16),

    /// The cport has no driver to receive a connection event.
    #[error("cport {0} not connected")]
    NotConnected(u16),

    /// A driver callback failed.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message construction failed.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// The dispatch worker could not be started.
    #[error("failed to start dispatch worker: {0}")]
    Worker(std::io::Error),

    /// The engine has been shut down or was never started.
    #[error("engine not initialised")]
    NotInitialized,

    /// The configuration table is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GreybusError {
    /// Whether this is a rejected caller contract (bad index, unbound cport,
    /// mismatched arguments).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::InvalidCport(_) | Self::NotBound(_)
        )
    }

    /// Result code reported to the host when this error ends a request.
    pub fn result(&self) -> OperationResult {
        match self {
            Self::Driver(err) => err.result(),
            Self::Message(MessageError::OutOfMemory { .. }) => OperationResult::NoMemory,
            Self::Message(MessageError::PayloadTooLarge { .. }) => OperationResult::Overflow,
            Self::InvalidArgument(_)
            | Self::InvalidCport(_)
            | Self::NotBound(_)
            | Self::NotConnected(_)
            | Self::AlreadyBound { .. } => OperationResult::Invalid,
            Self::NotInitialized => OperationResult::Nonexistent,
            Self::Transport(_) | Self::Message(_) | Self::Worker(_) | Self::Config(_) => {
                OperationResult::UnknownError
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, GreybusError>;

/// Failure reported by a driver callback or a peripheral capability.
///
/// Each variant corresponds to one wire result code, see [`DriverError::result`].
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("out of memory")]
    NoMemory,

    #[error("interrupted")]
    Interrupted,

    #[error("timed out")]
    Timeout,

    #[error("operation not supported")]
    Unsupported,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("overflow")]
    Overflow,

    #[error("no such device")]
    NoDevice,

    #[error("device busy")]
    Busy,

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Wire result code for this failure.
    pub fn result(&self) -> OperationResult {
        match self {
            Self::NoMemory => OperationResult::NoMemory,
            Self::Interrupted => OperationResult::Interrupted,
            Self::Timeout => OperationResult::Timeout,
            Self::Unsupported => OperationResult::ProtocolBad,
            Self::InvalidArgument(_) => OperationResult::Invalid,
            Self::Overflow => OperationResult::Overflow,
            Self::NoDevice => OperationResult::Nonexistent,
            Self::Busy => OperationResult::Retry,
            Self::Io(_) | Self::Other(_) => OperationResult::UnknownError,
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::OutOfMemory => Self::NoMemory,
            ErrorKind::Interrupted => Self::Interrupted,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout,
            ErrorKind::Unsupported => Self::Unsupported,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                Self::InvalidArgument(err.to_string())
            }
            ErrorKind::NotFound | ErrorKind::NotConnected => Self::NoDevice,
            _ => Self::Io(err),
        }
    }
}

impl From<MessageError> for DriverError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::OutOfMemory { .. } => Self::NoMemory,
            MessageError::PayloadTooLarge { .. } => Self::Overflow,
            MessageError::Io(io) => Self::from(io),
            other => Self::Other(other.to_string()),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;
