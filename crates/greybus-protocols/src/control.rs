use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use greybus_core::{Bus, Driver, Event, Result};
use greybus_message::{Message, OperationResult, MAX_PAYLOAD_SIZE};
use tracing::{error, info, warn};

use crate::hal::{NoTimesync, Timesync, TIMESYNC_MAX_STROBES};
use crate::op::Operation;

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;
pub const INTERFACE_VERSION_MAJOR: u16 = 0;
pub const INTERFACE_VERSION_MINOR: u16 = 1;

pub const TYPE_PROTOCOL_VERSION: u8 = 0x01;
pub const TYPE_GET_MANIFEST_SIZE: u8 = 0x03;
pub const TYPE_GET_MANIFEST: u8 = 0x04;
pub const TYPE_CONNECTED: u8 = 0x05;
pub const TYPE_DISCONNECTED: u8 = 0x06;
pub const TYPE_TIMESYNC_ENABLE: u8 = 0x07;
pub const TYPE_TIMESYNC_DISABLE: u8 = 0x08;
pub const TYPE_TIMESYNC_AUTHORITATIVE: u8 = 0x09;
pub const TYPE_INTERFACE_VERSION: u8 = 0x0a;
pub const TYPE_DISCONNECTING: u8 = 0x0c;
pub const TYPE_TIMESYNC_GET_LAST_EVENT: u8 = 0x0d;
pub const TYPE_BUNDLE_SUSPEND: u8 = 0x0f;
pub const TYPE_BUNDLE_RESUME: u8 = 0x10;
pub const TYPE_BUNDLE_DEACTIVATE: u8 = 0x11;
pub const TYPE_BUNDLE_ACTIVATE: u8 = 0x12;
pub const TYPE_INTF_SUSPEND_PREPARE: u8 = 0x13;
pub const TYPE_INTF_DEACTIVATE_PREPARE: u8 = 0x14;

/// Status byte answered by the power-management stubs.
pub const BUNDLE_PM_OK: u8 = 0x00;

const TIMESYNC_ENABLE_SIZE: usize = 17;

/// Control protocol driver, normally bound to cport 0.
///
/// Connected and disconnected requests name the cport they apply to; the
/// driver starts or stops traffic on that cport and notifies its driver.
pub struct ControlDriver {
    manifest: Arc<[u8]>,
    timesync: Arc<dyn Timesync>,
}

impl ControlDriver {
    pub fn new(manifest: impl Into<Arc<[u8]>>) -> Self {
        Self {
            manifest: manifest.into(),
            timesync: Arc::new(NoTimesync),
        }
    }

    pub fn with_timesync(mut self, timesync: Arc<dyn Timesync>) -> Self {
        self.timesync = timesync;
        self
    }

    pub fn manifest(&self) -> &[u8] {
        &self.manifest
    }

    fn manifest_size(&self, op: &Operation<'_>) -> Result<()> {
        if self.manifest.len() > MAX_PAYLOAD_SIZE {
            return op.status(OperationResult::Overflow);
        }
        op.reply(&(self.manifest.len() as u16).to_le_bytes())
    }

    fn get_manifest(&self, op: &Operation<'_>) -> Result<()> {
        if self.manifest.len() > MAX_PAYLOAD_SIZE {
            return op.status(OperationResult::Overflow);
        }
        op.reply(&self.manifest)
    }

    fn connected(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(2)? else {
            return Ok(());
        };
        let target = body.get_u16_le();
        let bus = op.bus();

        if let Err(err) = bus.listen(target) {
            error!(cport = target, error = %err, "cannot connect cport");
            return op.status(OperationResult::Invalid);
        }
        if let Err(err) = bus.notify(target, Event::Connected) {
            if let Err(stop) = bus.stop_listening(target) {
                warn!(cport = target, error = %stop, "failed to stop listening");
            }
            return op.fail(&err);
        }
        info!(cport = target, "cport connected");
        op.status(OperationResult::Success)
    }

    fn disconnected(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(2)? else {
            return Ok(());
        };
        let target = body.get_u16_le();
        let bus = op.bus();

        if let Err(err) = bus.notify(target, Event::Disconnected) {
            warn!(cport = target, error = %err, "cannot notify driver of disconnect");
        }
        match bus.stop_listening(target) {
            Ok(()) => {
                info!(cport = target, "cport disconnected");
                op.status(OperationResult::Success)
            }
            Err(err) => {
                error!(cport = target, error = %err, "cannot disconnect cport");
                op.status(err.result())
            }
        }
    }

    fn interface_version(&self, op: &Operation<'_>) -> Result<()> {
        let mut out = BytesMut::with_capacity(4);
        out.put_u16_le(INTERFACE_VERSION_MAJOR);
        out.put_u16_le(INTERFACE_VERSION_MINOR);
        op.reply(&out)
    }

    fn timesync_enable(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(TIMESYNC_ENABLE_SIZE)? else {
            return Ok(());
        };
        let count = body.get_u8();
        let frame_time = body.get_u64_le();
        let strobe_delay = body.get_u32_le();
        let refclk = body.get_u32_le();
        op.complete(
            self.timesync
                .enable(count, frame_time, strobe_delay, refclk),
        )
    }

    fn timesync_authoritative(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(8 * TIMESYNC_MAX_STROBES)? else {
            return Ok(());
        };
        let mut frame_times = [0u64; TIMESYNC_MAX_STROBES];
        for slot in &mut frame_times {
            *slot = body.get_u64_le();
        }
        op.complete(self.timesync.authoritative(&frame_times))
    }

    fn timesync_last_event(&self, op: &Operation<'_>) -> Result<()> {
        match self.timesync.last_event() {
            Ok(frame_time) => op.reply(&frame_time.to_le_bytes()),
            Err(err) => op.complete(Err(err)),
        }
    }
}

impl Driver for ControlDriver {
    fn name(&self) -> &'static str {
        "control"
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        let op = Operation::new(bus, cport, message);
        match op.op_type() {
            TYPE_PROTOCOL_VERSION => op.reply(&[VERSION_MAJOR, VERSION_MINOR]),
            TYPE_GET_MANIFEST_SIZE => self.manifest_size(&op),
            TYPE_GET_MANIFEST => self.get_manifest(&op),
            TYPE_CONNECTED => self.connected(&op),
            TYPE_DISCONNECTED => self.disconnected(&op),
            TYPE_INTERFACE_VERSION => self.interface_version(&op),
            TYPE_DISCONNECTING => op.status(OperationResult::Success),
            TYPE_BUNDLE_ACTIVATE
            | TYPE_BUNDLE_SUSPEND
            | TYPE_BUNDLE_RESUME
            | TYPE_BUNDLE_DEACTIVATE
            | TYPE_INTF_SUSPEND_PREPARE
            | TYPE_INTF_DEACTIVATE_PREPARE => op.reply(&[BUNDLE_PM_OK]),
            TYPE_TIMESYNC_ENABLE => self.timesync_enable(&op),
            TYPE_TIMESYNC_DISABLE => op.complete(self.timesync.disable()),
            TYPE_TIMESYNC_AUTHORITATIVE => self.timesync_authoritative(&op),
            TYPE_TIMESYNC_GET_LAST_EVENT => self.timesync_last_event(&op),
            _ => op.unknown(OperationResult::Invalid),
        }
    }
}
