use std::sync::{Mutex, MutexGuard};

use bytes::{BufMut, BytesMut};
use greybus_core::{Bus, Driver, DriverResult, GreybusError, Result};
use greybus_message::{Message, OperationResult, RESPONSE_FLAG};
use tracing::debug;

use crate::op::Operation;

pub const TYPE_SEND_LOG: u8 = 0x02;

/// Send `text` as a log record on `cport`. Returns the operation id.
pub fn send_log(bus: &Bus, cport: u16, text: &str) -> Result<u16> {
    let len = u16::try_from(text.len()).map_err(|_| {
        GreybusError::InvalidArgument(format!("log record of {} bytes too long", text.len()))
    })?;
    let mut payload = BytesMut::with_capacity(2 + text.len());
    payload.put_u16_le(len);
    payload.put_slice(text.as_bytes());
    bus.request(cport, TYPE_SEND_LOG, &payload, false)
}

/// Log protocol driver.
///
/// The node only originates log records; the host's responses to them are
/// accepted and anything else is refused.
#[derive(Default)]
pub struct LogDriver {
    binding: Mutex<Option<(Bus, u16)>>,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `text` on the cport this driver is bound to.
    pub fn log(&self, text: &str) -> Result<u16> {
        let (bus, cport) = self
            .binding()
            .clone()
            .ok_or(GreybusError::NotInitialized)?;
        send_log(&bus, cport, text)
    }

    fn binding(&self) -> MutexGuard<'_, Option<(Bus, u16)>> {
        self.binding.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Driver for LogDriver {
    fn name(&self) -> &'static str {
        "log"
    }

    fn init(&self, bus: &Bus, cport: u16) -> DriverResult<()> {
        *self.binding() = Some((bus.clone(), cport));
        Ok(())
    }

    fn exit(&self, _bus: &Bus, _cport: u16) {
        self.binding().take();
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        if message.op_type() == TYPE_SEND_LOG | RESPONSE_FLAG {
            debug!(
                cport,
                operation_id = message.operation_id(),
                result = %message.result(),
                "log record acknowledged"
            );
            return Ok(());
        }
        Operation::new(bus, cport, message).unknown(OperationResult::ProtocolBad)
    }
}
