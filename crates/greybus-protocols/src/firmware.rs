use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use greybus_core::{Bus, Driver, Result};
use greybus_message::{Message, OperationResult};
use tracing::error;

use crate::hal::FirmwareInfo;
use crate::op::Operation;

pub const TYPE_INTERFACE_FW_VERSION: u8 = 0x01;

/// Length of the firmware tag field.
pub const FIRMWARE_TAG_LEN: usize = 10;

/// Firmware management driver. Only reports the running firmware version.
pub struct FirmwareManagementDriver {
    info: Arc<dyn FirmwareInfo>,
}

impl FirmwareManagementDriver {
    pub fn new(info: Arc<dyn FirmwareInfo>) -> Self {
        Self { info }
    }

    fn interface_fw_version(&self, op: &Operation<'_>) -> Result<()> {
        let version = match self.info.running_version() {
            Ok(version) => version,
            Err(err) => {
                error!(cport = op.cport(), error = %err, "cannot read firmware version");
                return op.status(OperationResult::Internal);
            }
        };
        let mut tag = [0u8; FIRMWARE_TAG_LEN];
        let len = version.tag.len().min(FIRMWARE_TAG_LEN);
        tag[..len].copy_from_slice(&version.tag.as_bytes()[..len]);

        let mut out = BytesMut::with_capacity(FIRMWARE_TAG_LEN + 4);
        out.put_slice(&tag);
        out.put_u16_le(version.major);
        out.put_u16_le(version.minor);
        op.reply(&out)
    }
}

impl Driver for FirmwareManagementDriver {
    fn name(&self) -> &'static str {
        "fw-management"
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        let op = Operation::new(bus, cport, message);
        match op.op_type() {
            TYPE_INTERFACE_FW_VERSION => self.interface_fw_version(&op),
            _ => op.unknown(OperationResult::ProtocolBad),
        }
    }
}

/// Firmware download driver. Downloads are not supported; every request is
/// refused with `ProtocolBad`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirmwareDownloadDriver;

impl Driver for FirmwareDownloadDriver {
    fn name(&self) -> &'static str {
        "fw-download"
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        Operation::new(bus, cport, message).unknown(OperationResult::ProtocolBad)
    }
}
