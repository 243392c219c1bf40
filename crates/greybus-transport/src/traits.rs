use std::sync::Arc;

use greybus_message::Message;

use crate::error::Result;

/// Receiving side of a transport: where decoded inbound messages go.
///
/// Implementations may be called from any thread the transport owns and may
/// block to apply backpressure.
pub trait InboundSink: Send + Sync {
    /// Hand a received message for `cport` to the engine.
    fn deliver(&self, cport: u16, message: Message) -> Result<()>;
}

/// Byte-level link to the remote host.
///
/// `send` borrows the message; the caller keeps ownership and drops it once
/// the call returns.
pub trait Transport: Send + Sync {
    /// Start the link. Inbound traffic is delivered to `sink` from here on.
    fn init(&self, sink: Arc<dyn InboundSink>) -> Result<()>;

    /// Stop the link and release the sink.
    fn exit(&self);

    /// Start accepting traffic for `cport`.
    fn listen(&self, cport: u16) -> Result<()>;

    /// Stop accepting traffic for `cport`.
    fn stop_listening(&self, cport: u16) -> Result<()>;

    /// Transmit a framed message on `cport`.
    fn send(&self, cport: u16, message: &Message) -> Result<()>;

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str {
        "transport"
    }
}
