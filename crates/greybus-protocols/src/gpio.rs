use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Buf;
use greybus_core::{Bus, Driver, DriverResult, Result};
use greybus_message::{Message, OperationResult};
use tracing::{debug, warn};

use crate::hal::{Direction, GpioController, IrqHandler, Trigger};
use crate::op::Operation;

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;

pub const TYPE_PROTOCOL_VERSION: u8 = 0x01;
pub const TYPE_LINE_COUNT: u8 = 0x02;
pub const TYPE_ACTIVATE: u8 = 0x03;
pub const TYPE_DEACTIVATE: u8 = 0x04;
pub const TYPE_GET_DIRECTION: u8 = 0x05;
pub const TYPE_DIRECTION_IN: u8 = 0x06;
pub const TYPE_DIRECTION_OUT: u8 = 0x07;
pub const TYPE_GET_VALUE: u8 = 0x08;
pub const TYPE_SET_VALUE: u8 = 0x09;
pub const TYPE_SET_DEBOUNCE: u8 = 0x0a;
pub const TYPE_IRQ_TYPE: u8 = 0x0b;
pub const TYPE_IRQ_MASK: u8 = 0x0c;
pub const TYPE_IRQ_UNMASK: u8 = 0x0d;
pub const TYPE_IRQ_EVENT: u8 = 0x0e;

pub const IRQ_TYPE_NONE: u8 = 0x00;
pub const IRQ_TYPE_EDGE_RISING: u8 = 0x01;
pub const IRQ_TYPE_EDGE_FALLING: u8 = 0x02;
pub const IRQ_TYPE_EDGE_BOTH: u8 = 0x03;
pub const IRQ_TYPE_LEVEL_HIGH: u8 = 0x04;
pub const IRQ_TYPE_LEVEL_LOW: u8 = 0x08;

/// Wire value of `get-direction` for an output line.
const DIRECTION_OUT: u8 = 0;
/// Wire value of `get-direction` for an input line.
const DIRECTION_IN: u8 = 1;

/// Map an `irq-type` request value to a trigger.
pub fn trigger_from_wire(irq_type: u8) -> Option<Trigger> {
    match irq_type {
        IRQ_TYPE_NONE => Some(Trigger::Disabled),
        IRQ_TYPE_EDGE_RISING => Some(Trigger::EdgeRising),
        IRQ_TYPE_EDGE_FALLING => Some(Trigger::EdgeFalling),
        IRQ_TYPE_EDGE_BOTH => Some(Trigger::EdgeBoth),
        IRQ_TYPE_LEVEL_HIGH => Some(Trigger::LevelHigh),
        IRQ_TYPE_LEVEL_LOW => Some(Trigger::LevelLow),
        _ => None,
    }
}

/// GPIO protocol driver.
///
/// Interrupts are one-shot: when a line fires, its interrupt is disabled
/// and an `irq-event` request is sent to the host. Nothing re-arms the line
/// until the host sends `irq-unmask`.
pub struct GpioDriver {
    controller: Arc<dyn GpioController>,
    /// Trigger last configured through `irq-type`, per line.
    triggers: Mutex<HashMap<u8, Trigger>>,
}

impl GpioDriver {
    pub fn new(controller: Arc<dyn GpioController>) -> Self {
        Self {
            controller,
            triggers: Mutex::new(HashMap::new()),
        }
    }

    fn line_count(&self, op: &Operation<'_>) -> Result<()> {
        match self.controller.line_count() {
            0 => op.status(OperationResult::UnknownError),
            count => op.reply(&[count]),
        }
    }

    fn get_direction(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(1)? else {
            return Ok(());
        };
        let line = body.get_u8();
        match self.controller.direction(line) {
            Ok(Direction::Input) => op.reply(&[DIRECTION_IN]),
            Ok(Direction::Output) => op.reply(&[DIRECTION_OUT]),
            Err(err) => op.complete(Err(err)),
        }
    }

    fn direction_in(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(1)? else {
            return Ok(());
        };
        op.complete(self.controller.set_input(body.get_u8()))
    }

    fn direction_out(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(2)? else {
            return Ok(());
        };
        let line = body.get_u8();
        let high = body.get_u8() != 0;
        op.complete(self.controller.set_output(line, high))
    }

    fn get_value(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(1)? else {
            return Ok(());
        };
        match self.controller.get_value(body.get_u8()) {
            Ok(high) => op.reply(&[u8::from(high)]),
            Err(err) => op.complete(Err(err)),
        }
    }

    fn set_value(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(2)? else {
            return Ok(());
        };
        let line = body.get_u8();
        let high = body.get_u8() != 0;
        op.complete(self.controller.set_value(line, high))
    }

    fn set_debounce(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(3)? else {
            return Ok(());
        };
        let line = body.get_u8();
        let usec = body.get_u16_le();
        if usec == 0 {
            return op.status(OperationResult::Success);
        }
        op.complete(self.controller.set_debounce(line, usec))
    }

    fn irq_type(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(2)? else {
            return Ok(());
        };
        let line = body.get_u8();
        let irq_type = body.get_u8();
        let Some(trigger) = trigger_from_wire(irq_type) else {
            warn!(cport = op.cport(), line, irq_type, "unknown irq type");
            return op.status(OperationResult::Invalid);
        };

        let outcome = self.controller.configure_interrupt(line, trigger);
        if outcome.is_ok() {
            let mut triggers = self.triggers();
            if trigger == Trigger::Disabled {
                triggers.remove(&line);
            } else {
                triggers.insert(line, trigger);
            }
        }
        op.complete(outcome)
    }

    fn irq_mask(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(1)? else {
            return Ok(());
        };
        op.complete(
            self.controller
                .configure_interrupt(body.get_u8(), Trigger::Disabled),
        )
    }

    fn irq_unmask(&self, op: &Operation<'_>) -> Result<()> {
        let Some(mut body) = op.body(1)? else {
            return Ok(());
        };
        let line = body.get_u8();
        let trigger = self
            .triggers()
            .get(&line)
            .copied()
            .unwrap_or(Trigger::EdgeRising);
        op.complete(self.controller.configure_interrupt(line, trigger))
    }

    fn triggers(&self) -> std::sync::MutexGuard<'_, HashMap<u8, Trigger>> {
        self.triggers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Driver for GpioDriver {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn init(&self, bus: &Bus, cport: u16) -> DriverResult<()> {
        let bus = bus.clone();
        let controller = Arc::downgrade(&self.controller);
        let handler: IrqHandler = Arc::new(move |line| {
            if let Some(controller) = controller.upgrade() {
                raise_irq(&bus, cport, controller.as_ref(), line);
            }
        });
        self.controller.set_irq_handler(Some(handler))
    }

    fn exit(&self, _bus: &Bus, cport: u16) {
        if let Err(err) = self.controller.set_irq_handler(None) {
            warn!(cport, error = %err, "failed to remove irq handler");
        }
    }

    fn handle(&self, bus: &Bus, cport: u16, message: Message) -> Result<()> {
        let op = Operation::new(bus, cport, message);
        match op.op_type() {
            TYPE_PROTOCOL_VERSION => op.reply(&[VERSION_MAJOR, VERSION_MINOR]),
            TYPE_LINE_COUNT => self.line_count(&op),
            TYPE_ACTIVATE | TYPE_DEACTIVATE => match op.body(1)? {
                Some(_) => op.status(OperationResult::Success),
                None => Ok(()),
            },
            TYPE_GET_DIRECTION => self.get_direction(&op),
            TYPE_DIRECTION_IN => self.direction_in(&op),
            TYPE_DIRECTION_OUT => self.direction_out(&op),
            TYPE_GET_VALUE => self.get_value(&op),
            TYPE_SET_VALUE => self.set_value(&op),
            TYPE_SET_DEBOUNCE => self.set_debounce(&op),
            TYPE_IRQ_TYPE => self.irq_type(&op),
            TYPE_IRQ_MASK => self.irq_mask(&op),
            TYPE_IRQ_UNMASK => self.irq_unmask(&op),
            _ => op.unknown(OperationResult::Invalid),
        }
    }
}

/// Disarm `line` and tell the host it fired.
fn raise_irq(bus: &Bus, cport: u16, controller: &dyn GpioController, line: u8) {
    if let Err(err) = controller.configure_interrupt(line, Trigger::Disabled) {
        warn!(cport, line, error = %err, "failed to disarm interrupt");
    }
    match bus.request(cport, TYPE_IRQ_EVENT, &[line], true) {
        Ok(_) => debug!(cport, line, "irq event sent"),
        Err(err) => warn!(cport, line, error = %err, "failed to send irq event"),
    }
}
