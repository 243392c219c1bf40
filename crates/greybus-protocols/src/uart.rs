use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use greybus_core::{Bus, Driver, DriverResult, Result};
use greybus_message::{Message, OperationResult};
use tracing::{debug, error, warn};

use crate::hal::{FlowControl, LineCoding, Parity, RxHandler, StopBits, UartPort};
use crate::op::Operation;

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;

pub const TYPE_PROTOCOL_VERSION: u8 = 0x01;
pub const TYPE_SEND_DATA: u8 = 0x02;
pub const TYPE_RECEIVE_DATA: u8 = 0x03;
pub const TYPE_SET_LINE_CODING: u8 = 0x04;
pub const TYPE_SET_CONTROL_LINE_STATE: u8 = 0x05;
pub const TYPE_SEND_BREAK: u8 = 0x06;

pub const CTRL_DTR: u8 = 0x01;
pub const CTRL_RTS: u8 = 0x02;

/// Most bytes forwarded in one receive-data request.
pub const MAX_RX_CHUNK: usize = 64;

const LINE_CODING_SIZE: usize = 8;

/// Decode a set-line-coding request body. `None` if any field is out of range.
pub fn line_coding_from_wire(mut body: &[u8]) -> Option<LineCoding> {
    if body.len() < LINE_CODING_SIZE {
        return None;
    }
    let baud_rate = body.get_u32_le();
    let stop_bits = match body.get_u8() {
        0 => StopBits::One,
        1 => StopBits::OneAndHalf,
        2 => StopBits::Two,
        _ => return None,
    };
    let parity = match body.get_u8() {
        0 => Parity::None,
        1 => Parity::Odd,
        2 => Parity::Even,
        3 => Parity::Mark,
        4 => Parity::Space,
        _ => return None,
    };
    let data_bits = match body.get_u8() {
        bits @ 5..=9 => bits,
        _ => return None,
    };
    let flow_control = match body.get_u8() {
        0 => FlowControl::None,
        1 => FlowControl::RtsCts,
        _ => return None,
    };
    Some(LineCoding {
        baud_rate,
        stop_bits,
        parity,
        data_bits,
        flow_control,
    })
}

/// UART protocol driver.
///
/// Received bytes are pushed to the host as one-shot receive-data requests
/// from the port's RX callback, in chunks of at most [`MAX_RX_CHUNK`] bytes.
pub struct UartDriver {
    port: Arc<dyn UartPort>,
}

impl UartDriver {
    pub fn new(port: Arc<dyn UartPort>) -> Self {
        Self { port }
    }

    fn send_data(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(2)? else {
            return Ok(());
        };
        let size = usize::from(body.get_u16_le());
        if body.len() < size {
            error!(
                cport = op.cport(),
                size,
                available = body.len(),
                "send-data shorter than declared"
            );
            return op.status(OperationResult::Invalid);
        }
        op.complete(self.port.write(&body[..size]))
    }

    fn set_line_coding(&self, op: &Operation<'_>) -> Result<()> {
        let Some(body) = op.body(LINE_CODING_SIZE)? else {
            return Ok(());
        };
        let Some(coding) = line_coding_from_wire(body) else {
            warn!(cport = op.cport(), "unsupported line coding");
            return op.status(OperationResult::Invalid);
        };
        debug!(cport = op.cport(), ?coding, "set line coding");
        op.complete(self.port.configure(&coding))
    }

    fn set_control_line_state(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(1)? else {
            return Ok(());
        };
        let control = body.get_u8();
        if let Err(err) = self.port.set_dtr(control & CTRL_DTR != 0) {
            return op.complete(Err(err));
        }
        op.complete(self.port.set_rts(control & CTRL_RTS != 0))
    }
}

impl Driver for UartDriver {
    fn name(&self) -> &'static str {
        "uart"
    }

    fn init(&self, bus: &Bus, cport: u16) -> DriverResult<()> {
        let bus = bus.clone();
        let port = Arc::downgrade(&self.port);
        let handler: RxHandler = Arc::new(move || {
            if let Some(port) = port.upgrade() {
                forward_rx(&bus, cport, port.as_ref());
            }
        });
        self.port.set_rx_handler(Some(handler))?;
        self.port.enable_rx()
    }

    fn exit(&self, _bus: &Bus, cport: u16) {
        if let Err(err) = self.port.disable_rx() {
            warn!(cport, error = %err, "failed to disable rx");
        }
        if let Err(err) = self.port.set_rx_handler(None) {
            warn!(cport, error = %err, "failed to remove rx handler");
        }
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        let op = Operation::new(bus, cport, message);
        match op.op_type() {
            TYPE_PROTOCOL_VERSION => op.reply(&[VERSION_MAJOR, VERSION_MINOR]),
            TYPE_SEND_DATA => self.send_data(&op),
            TYPE_SET_LINE_CODING => self.set_line_coding(&op),
            TYPE_SET_CONTROL_LINE_STATE => self.set_control_line_state(&op),
            TYPE_SEND_BREAK => op.complete(self.port.send_break()),
            _ => op.unknown(OperationResult::ProtocolBad),
        }
    }
}

fn forward_rx(bus: &Bus, cport: u16, port: &dyn UartPort) {
    let mut chunk = [0u8; MAX_RX_CHUNK];
    let len = port.read(&mut chunk);
    if len == 0 {
        return;
    }
    let mut payload = BytesMut::with_capacity(3 + len);
    payload.put_u16_le(len as u16);
    payload.put_u8(0);
    payload.put_slice(&chunk[..len]);
    if let Err(err) = bus.request(cport, TYPE_RECEIVE_DATA, &payload, true) {
        warn!(cport, len, error = %err, "failed to forward rx data");
    }
}
