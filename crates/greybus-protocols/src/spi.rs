use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use greybus_core::{Bus, Driver, DriverResult, Result};
use greybus_message::{Message, OperationResult};
use tracing::{error, warn};

use crate::hal::{SpiConfig, SpiController, SpiSegment};
use crate::op::Operation;

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;

pub const TYPE_PROTOCOL_VERSION: u8 = 0x01;
pub const TYPE_MASTER_CONFIG: u8 = 0x02;
pub const TYPE_DEVICE_CONFIG: u8 = 0x03;
pub const TYPE_TRANSFER: u8 = 0x04;

pub const XFER_READ: u8 = 0x01;
pub const XFER_WRITE: u8 = 0x02;

/// Length of the device name field in a device-config response.
pub const DEVICE_NAME_LEN: usize = 32;

const TRANSFER_HEADER_SIZE: usize = 4;
const TRANSFER_DESCRIPTOR_SIZE: usize = 13;

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    speed_hz: u32,
    len: usize,
    cs_change: u8,
    bits_per_word: u8,
    rdwr: u8,
}

impl Descriptor {
    fn reads(&self) -> bool {
        self.rdwr & XFER_READ != 0
    }

    fn writes(&self) -> bool {
        self.rdwr & XFER_WRITE != 0
    }
}

/// SPI master protocol driver.
///
/// A transfer batch runs with one bus configuration: every descriptor must
/// use the same word size, and chip-select toggling between descriptors is
/// not supported. The clock of the first descriptor applies to the batch.
pub struct SpiDriver {
    controller: Arc<dyn SpiController>,
}

impl SpiDriver {
    pub fn new(controller: Arc<dyn SpiController>) -> Self {
        Self { controller }
    }

    fn master_config(&self, op: &Operation<'_>) -> Result<()> {
        let config = match self.controller.master_config() {
            Ok(config) => config,
            Err(err) => return op.complete(Err(err)),
        };
        let mut out = BytesMut::with_capacity(18);
        out.put_u32_le(config.bits_per_word_mask);
        out.put_u32_le(config.min_speed_hz);
        out.put_u32_le(config.max_speed_hz);
        out.put_u16_le(config.mode);
        out.put_u16_le(config.flags);
        out.put_u16_le(config.num_chipselect);
        op.reply(&out)
    }

    fn device_config(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(1)? else {
            return Ok(());
        };
        let chip_select = body.get_u8();
        let device = match self.controller.device_config(chip_select) {
            Ok(device) => device,
            Err(err) => return op.complete(Err(err)),
        };

        let mut out = BytesMut::with_capacity(8 + DEVICE_NAME_LEN);
        out.put_u16_le(device.mode);
        out.put_u8(device.bits_per_word);
        out.put_u32_le(device.max_speed_hz);
        out.put_u8(device.device_type);
        let mut name = [0u8; DEVICE_NAME_LEN];
        let len = device.name.len().min(DEVICE_NAME_LEN);
        name[..len].copy_from_slice(&device.name.as_bytes()[..len]);
        out.put_slice(&name);
        op.reply(&out)
    }

    fn transfer(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(TRANSFER_HEADER_SIZE)? else {
            return Ok(());
        };
        let chip_select = body.get_u8();
        let mode = body.get_u8();
        let count = usize::from(body.get_u16_le());
        if count == 0 {
            return op.status(OperationResult::Success);
        }
        if body.len() < count * TRANSFER_DESCRIPTOR_SIZE {
            error!(cport = op.cport(), count, "dropping short message");
            return op.status(OperationResult::Invalid);
        }

        let descriptors: Vec<Descriptor> = (0..count)
            .map(|_| {
                let speed_hz = body.get_u32_le();
                let len = body.get_u32_le() as usize;
                let _delay_usecs = body.get_u16_le();
                Descriptor {
                    speed_hz,
                    len,
                    cs_change: body.get_u8(),
                    bits_per_word: body.get_u8(),
                    rdwr: body.get_u8(),
                }
            })
            .collect();

        let bits_per_word = descriptors[0].bits_per_word;
        for desc in &descriptors {
            if desc.rdwr == 0 || desc.rdwr & !(XFER_READ | XFER_WRITE) != 0 {
                error!(cport = op.cport(), rdwr = desc.rdwr, "invalid transfer flags");
                return op.status(OperationResult::Invalid);
            }
            if desc.reads() && desc.len == 0 {
                error!(cport = op.cport(), "read of length 0 is invalid");
                return op.status(OperationResult::Invalid);
            }
            if desc.bits_per_word != bits_per_word {
                error!(cport = op.cport(), "only one bits-per-word setting supported");
                return op.status(OperationResult::Invalid);
            }
            if desc.cs_change != 0 {
                error!(cport = op.cport(), "cs_change not supported");
                return op.status(OperationResult::Invalid);
            }
        }

        let write_total = descriptors
            .iter()
            .filter(|d| d.writes())
            .fold(0usize, |total, d| total.saturating_add(d.len));
        if body.len() < write_total {
            warn!(
                cport = op.cport(),
                write_total,
                available = body.len(),
                "write data truncated"
            );
            return op.status(OperationResult::Invalid);
        }
        let read_total = descriptors
            .iter()
            .filter(|d| d.reads())
            .fold(0usize, |total, d| total.saturating_add(d.len));
        if !op.reserve(read_total)? {
            return Ok(());
        }

        let config = SpiConfig {
            chip_select,
            mode,
            bits_per_word,
            speed_hz: descriptors[0].speed_hz,
        };
        let mut response = vec![0u8; read_total];
        if let Err(err) = self.run(&config, &descriptors, body, &mut response) {
            return op.complete(Err(err));
        }
        op.reply(&response)
    }

    fn run(
        &self,
        config: &SpiConfig,
        descriptors: &[Descriptor],
        mut writes: &[u8],
        response: &mut [u8],
    ) -> DriverResult<()> {
        let mut reads = response;
        let mut segments = Vec::with_capacity(descriptors.len());
        for desc in descriptors {
            let tx = if desc.writes() {
                let (head, tail) = writes.split_at(desc.len);
                writes = tail;
                Some(head)
            } else {
                None
            };
            let rx = if desc.reads() {
                let (head, tail) = std::mem::take(&mut reads).split_at_mut(desc.len);
                reads = tail;
                Some(head)
            } else {
                None
            };
            segments.push(SpiSegment { tx, rx });
        }
        self.controller.transceive(config, &mut segments)
    }
}

impl Driver for SpiDriver {
    fn name(&self) -> &'static str {
        "spi"
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        let op = Operation::new(bus, cport, message);
        match op.op_type() {
            TYPE_PROTOCOL_VERSION => op.reply(&[VERSION_MAJOR, VERSION_MINOR]),
            TYPE_MASTER_CONFIG => self.master_config(&op),
            TYPE_DEVICE_CONFIG => self.device_config(&op),
            TYPE_TRANSFER => self.transfer(&op),
            _ => op.unknown(OperationResult::Invalid),
        }
    }
}
