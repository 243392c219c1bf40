//! Transport abstraction for the Greybus engine.
//!
//! A transport moves framed operations between this node and the remote
//! host. The engine only sees the [`Transport`] trait; received messages
//! flow back in through the [`InboundSink`] handed over at `init`.
//!
//! Two implementations ship here:
//! - [`MemoryTransport`]: in-process link that records sent messages, used by
//!   tests and embedders
//! - [`SocketTransport`] (unix): Unix domain socket link carrying the cport id
//!   in the header pad bytes, with [`SocketClient`] for the host side

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod socket;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::{InboundSink, Transport};

#[cfg(unix)]
pub use socket::{SocketClient, SocketTransport};
