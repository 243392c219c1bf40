use greybus_message::Message;

use crate::bus::Bus;
use crate::error::{DriverResult, Result};

/// Connection event delivered through [`Bus::notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Connected,
    Disconnected,
}

/// A protocol implementation bound to one cport.
///
/// One driver value is registered per cport and serves as that cport's
/// private state; implementations keep mutable state behind their own locks.
/// All callbacks except `handle` are optional.
///
/// `handle` runs on the dispatch worker. It owns the request and is
/// expected to answer it through `bus` (see [`Bus::respond`]). A returned
/// error is logged by the engine; it is not reported to the host.
pub trait Driver: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Called once when the driver is bound. Failing aborts the binding.
    fn init(&self, _bus: &Bus, _cport: u16) -> DriverResult<()> {
        Ok(())
    }

    /// Called once when the driver is unbound.
    fn exit(&self, _bus: &Bus, _cport: u16) {}

    fn connected(&self, _bus: &Bus, _cport: u16) -> DriverResult<()> {
        Ok(())
    }

    fn disconnected(&self, _bus: &Bus, _cport: u16) -> DriverResult<()> {
        Ok(())
    }

    /// Process one inbound operation.
    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()>;
}
