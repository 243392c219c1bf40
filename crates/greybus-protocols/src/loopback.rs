use bytes::Buf;
use greybus_core::{Bus, Driver, Result};
use greybus_message::{Message, OperationResult};
use tracing::error;

use crate::op::Operation;

pub const TYPE_PING: u8 = 0x02;
pub const TYPE_TRANSFER: u8 = 0x03;
pub const TYPE_SINK: u8 = 0x04;

/// `len` plus two reserved words.
pub const TRANSFER_HEADER_SIZE: usize = 12;

/// Loopback protocol driver: answers pings, echoes transfers and swallows
/// sink requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackDriver;

impl LoopbackDriver {
    pub fn new() -> Self {
        Self
    }

    /// Validate a transfer or sink request; answers `Invalid` and returns
    /// `false` when the declared length does not fit the payload.
    fn check(op: &Operation<'_>) -> Result<bool> {
        let Some(mut body) = op.body(TRANSFER_HEADER_SIZE)? else {
            return Ok(false);
        };
        let len = body.get_u32_le() as usize;
        let fits = TRANSFER_HEADER_SIZE
            .checked_add(len)
            .is_some_and(|needed| needed <= op.payload().len());
        if !fits {
            error!(
                cport = op.cport(),
                len,
                payload = op.payload().len(),
                "loopback length exceeds payload"
            );
            op.status(OperationResult::Invalid)?;
            return Ok(false);
        }
        Ok(true)
    }
}

impl Driver for LoopbackDriver {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        let op = Operation::new(bus, cport, message);
        match op.op_type() {
            TYPE_PING => op.status(OperationResult::Success),
            TYPE_TRANSFER => {
                if Self::check(&op)? {
                    op.reply(op.payload())?;
                }
                Ok(())
            }
            TYPE_SINK => {
                if Self::check(&op)? {
                    op.status(OperationResult::Success)?;
                }
                Ok(())
            }
            _ => op.unknown(OperationResult::Invalid),
        }
    }
}
