use std::sync::Arc;

use bytes::Buf;
use greybus_core::{Bus, Driver, DriverResult, Result};
use greybus_message::{Message, OperationResult};
use tracing::{debug, warn};

use crate::hal::{I2cBus, I2cOperation};
use crate::op::Operation;

pub const TYPE_FUNCTIONALITY: u8 = 0x02;
pub const TYPE_TRANSFER: u8 = 0x05;

/// Sub-operation flag: read from the device.
pub const FLAG_READ: u16 = 0x0001;

pub const FUNC_I2C: u32 = 0x0000_0001;
pub const FUNC_SMBUS_READ_BYTE: u32 = 0x0002_0000;
pub const FUNC_SMBUS_WRITE_BYTE: u32 = 0x0004_0000;
pub const FUNC_SMBUS_READ_BYTE_DATA: u32 = 0x0008_0000;
pub const FUNC_SMBUS_WRITE_BYTE_DATA: u32 = 0x0010_0000;
pub const FUNC_SMBUS_READ_WORD_DATA: u32 = 0x0020_0000;
pub const FUNC_SMBUS_WRITE_WORD_DATA: u32 = 0x0040_0000;
pub const FUNC_SMBUS_READ_I2C_BLOCK: u32 = 0x0400_0000;
pub const FUNC_SMBUS_WRITE_I2C_BLOCK: u32 = 0x0800_0000;

/// Bitmask answered to `functionality`.
pub const FUNCTIONALITY: u32 = FUNC_I2C
    | FUNC_SMBUS_READ_BYTE
    | FUNC_SMBUS_WRITE_BYTE
    | FUNC_SMBUS_READ_BYTE_DATA
    | FUNC_SMBUS_WRITE_BYTE_DATA
    | FUNC_SMBUS_READ_WORD_DATA
    | FUNC_SMBUS_WRITE_WORD_DATA
    | FUNC_SMBUS_READ_I2C_BLOCK
    | FUNC_SMBUS_WRITE_I2C_BLOCK;

const OP_DESCRIPTOR_SIZE: usize = 6;

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    addr: u16,
    read: bool,
    size: usize,
}

/// I2C protocol driver.
///
/// A transfer is split into runs of consecutive sub-operations on the same
/// address; each run is one capability transaction, issued in order.
pub struct I2cDriver {
    bus: Arc<dyn I2cBus>,
}

impl I2cDriver {
    pub fn new(bus: Arc<dyn I2cBus>) -> Self {
        Self { bus }
    }

    fn transfer(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(2)? else {
            return Ok(());
        };
        let op_count = usize::from(body.get_u16_le());
        if body.len() < op_count * OP_DESCRIPTOR_SIZE {
            warn!(cport = op.cport(), op_count, "descriptor table truncated");
            return op.status(OperationResult::Invalid);
        }

        let descriptors: Vec<Descriptor> = (0..op_count)
            .map(|_| {
                let addr = body.get_u16_le();
                let flags = body.get_u16_le();
                let size = usize::from(body.get_u16_le());
                Descriptor {
                    addr,
                    read: flags & FLAG_READ != 0,
                    size,
                }
            })
            .collect();

        let write_total: usize = descriptors.iter().filter(|d| !d.read).map(|d| d.size).sum();
        if body.len() < write_total {
            warn!(
                cport = op.cport(),
                write_total,
                available = body.len(),
                "write data truncated"
            );
            return op.status(OperationResult::Invalid);
        }
        let read_total: usize = descriptors.iter().filter(|d| d.read).map(|d| d.size).sum();
        if !op.reserve(read_total)? {
            return Ok(());
        }

        let mut response = vec![0u8; read_total];
        if let Err(err) = self.run(&descriptors, body, &mut response) {
            return op.complete(Err(err));
        }
        op.reply(&response)
    }

    fn run(
        &self,
        descriptors: &[Descriptor],
        mut writes: &[u8],
        response: &mut [u8],
    ) -> DriverResult<()> {
        let mut reads = response;
        for segment in descriptors.chunk_by(|a, b| a.addr == b.addr) {
            let mut ops = Vec::with_capacity(segment.len());
            for desc in segment {
                if desc.read {
                    let (head, tail) = std::mem::take(&mut reads).split_at_mut(desc.size);
                    reads = tail;
                    ops.push(I2cOperation::Read(head));
                } else {
                    let (head, tail) = writes.split_at(desc.size);
                    writes = tail;
                    ops.push(I2cOperation::Write(head));
                }
            }
            let addr = segment[0].addr;
            debug!(addr, ops = ops.len(), "i2c segment");
            self.bus.transfer(addr, &mut ops)?;
        }
        Ok(())
    }
}

impl Driver for I2cDriver {
    fn name(&self) -> &'static str {
        "i2c"
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        let op = Operation::new(bus, cport, message);
        match op.op_type() {
            TYPE_FUNCTIONALITY => op.reply(&FUNCTIONALITY.to_le_bytes()),
            TYPE_TRANSFER => self.transfer(&op),
            _ => op.unknown(OperationResult::Invalid),
        }
    }
}
