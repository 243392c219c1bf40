//! In-memory peripherals.
//!
//! Used by the `serve` command and by tests. Each simulator records what the
//! drivers asked of it so callers can inspect the effect of host requests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use greybus_core::{DriverError, DriverResult};

use crate::hal::{
    Direction, FirmwareInfo, FirmwareVersion, GpioController, I2cBus, I2cOperation, IrqHandler,
    LineCoding, RxHandler, SpiConfig, SpiController, SpiDeviceConfig, SpiMasterConfig,
    SpiSegment, Trigger, UartPort,
};
use crate::Peripherals;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// State of one simulated GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimLine {
    pub direction: Direction,
    pub high: bool,
    pub debounce_usec: u16,
    pub trigger: Trigger,
}

impl Default for SimLine {
    fn default() -> Self {
        Self {
            direction: Direction::Input,
            high: false,
            debounce_usec: 0,
            trigger: Trigger::Disabled,
        }
    }
}

/// GPIO bank with a fixed number of lines, all inputs at reset.
pub struct SimGpio {
    lines: Mutex<Vec<SimLine>>,
    handler: Mutex<Option<IrqHandler>>,
}

impl SimGpio {
    pub fn new(line_count: u8) -> Self {
        Self {
            lines: Mutex::new(vec![SimLine::default(); usize::from(line_count)]),
            handler: Mutex::new(None),
        }
    }

    pub fn line(&self, line: u8) -> Option<SimLine> {
        lock(&self.lines).get(usize::from(line)).copied()
    }

    /// Drive the level seen on an input line.
    pub fn set_level(&self, line: u8, high: bool) -> DriverResult<()> {
        self.with_line(line, |l| l.high = high)
    }

    /// Fire the interrupt of `line` if it is armed.
    ///
    /// Returns whether a handler ran.
    pub fn trigger(&self, line: u8) -> bool {
        let armed = self
            .line(line)
            .is_some_and(|l| l.trigger != Trigger::Disabled);
        if !armed {
            return false;
        }
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => {
                handler(line);
                true
            }
            None => false,
        }
    }

    pub fn has_irq_handler(&self) -> bool {
        lock(&self.handler).is_some()
    }

    fn with_line<R>(&self, line: u8, f: impl FnOnce(&mut SimLine) -> R) -> DriverResult<R> {
        let mut lines = lock(&self.lines);
        let count = lines.len();
        lines
            .get_mut(usize::from(line))
            .map(f)
            .ok_or_else(|| DriverError::invalid(format!("line {line} out of range ({count} lines)")))
    }
}

impl GpioController for SimGpio {
    fn line_count(&self) -> u8 {
        lock(&self.lines).len() as u8
    }

    fn direction(&self, line: u8) -> DriverResult<Direction> {
        self.with_line(line, |l| l.direction)
    }

    fn set_input(&self, line: u8) -> DriverResult<()> {
        self.with_line(line, |l| l.direction = Direction::Input)
    }

    fn set_output(&self, line: u8, high: bool) -> DriverResult<()> {
        self.with_line(line, |l| {
            l.direction = Direction::Output;
            l.high = high;
        })
    }

    fn get_value(&self, line: u8) -> DriverResult<bool> {
        self.with_line(line, |l| l.high)
    }

    fn set_value(&self, line: u8, high: bool) -> DriverResult<()> {
        self.with_line(line, |l| l.high = high)
    }

    fn set_debounce(&self, line: u8, usec: u16) -> DriverResult<()> {
        self.with_line(line, |l| l.debounce_usec = usec)
    }

    fn configure_interrupt(&self, line: u8, trigger: Trigger) -> DriverResult<()> {
        self.with_line(line, |l| l.trigger = trigger)
    }

    fn set_irq_handler(&self, handler: Option<IrqHandler>) -> DriverResult<()> {
        *lock(&self.handler) = handler;
        Ok(())
    }
}

/// I2C bus with a byte store per device address.
///
/// Writes append to the device's store; reads copy from the start of the
/// store and zero-fill past its end.
#[derive(Default)]
pub struct SimI2c {
    devices: Mutex<HashMap<u16, Vec<u8>>>,
    absent: Mutex<HashSet<u16>>,
    transactions: Mutex<Vec<u16>>,
}

impl SimI2c {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload the store of `address`.
    pub fn load(&self, address: u16, data: &[u8]) {
        lock(&self.devices).insert(address, data.to_vec());
    }

    pub fn contents(&self, address: u16) -> Vec<u8> {
        lock(&self.devices).get(&address).cloned().unwrap_or_default()
    }

    /// Make transactions on `address` fail as if nothing answered.
    pub fn remove_device(&self, address: u16) {
        lock(&self.absent).insert(address);
    }

    /// Addresses of every transaction run so far, in order.
    pub fn transactions(&self) -> Vec<u16> {
        lock(&self.transactions).clone()
    }
}

impl I2cBus for SimI2c {
    fn transfer(&self, address: u16, operations: &mut [I2cOperation<'_>]) -> DriverResult<()> {
        if lock(&self.absent).contains(&address) {
            return Err(DriverError::NoDevice);
        }
        lock(&self.transactions).push(address);

        let mut devices = lock(&self.devices);
        let store = devices.entry(address).or_default();
        for operation in operations.iter_mut() {
            match operation {
                I2cOperation::Write(data) => store.extend_from_slice(data),
                I2cOperation::Read(buf) => {
                    let len = store.len().min(buf.len());
                    buf[..len].copy_from_slice(&store[..len]);
                    buf[len..].fill(0);
                }
            }
        }
        Ok(())
    }
}

/// SPI controller wired in loopback: received bytes mirror transmitted ones,
/// and read-only segments receive `0, 1, 2, ...`.
pub struct SimSpi {
    num_chipselect: u16,
    transfers: Mutex<Vec<SpiConfig>>,
    written: Mutex<Vec<u8>>,
}

impl SimSpi {
    pub const BITS_PER_WORD_MASK: u32 = 1 << 7;
    pub const MIN_SPEED_HZ: u32 = 400_000;
    pub const MAX_SPEED_HZ: u32 = 48_000_000;

    pub fn new(num_chipselect: u16) -> Self {
        Self {
            num_chipselect,
            transfers: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Bus settings of every batch run so far.
    pub fn transfers(&self) -> Vec<SpiConfig> {
        lock(&self.transfers).clone()
    }

    /// Every byte transmitted so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }
}

impl SpiController for SimSpi {
    fn master_config(&self) -> DriverResult<SpiMasterConfig> {
        Ok(SpiMasterConfig {
            bits_per_word_mask: Self::BITS_PER_WORD_MASK,
            min_speed_hz: Self::MIN_SPEED_HZ,
            max_speed_hz: Self::MAX_SPEED_HZ,
            mode: 0,
            flags: 0,
            num_chipselect: self.num_chipselect,
        })
    }

    fn device_config(&self, chip_select: u8) -> DriverResult<SpiDeviceConfig> {
        if u16::from(chip_select) >= self.num_chipselect {
            return Err(DriverError::invalid(format!(
                "chip select {chip_select} out of range"
            )));
        }
        Ok(SpiDeviceConfig {
            mode: 0,
            bits_per_word: 8,
            max_speed_hz: 1_000_000,
            device_type: 0,
            name: "spidev".to_string(),
        })
    }

    fn transceive(&self, config: &SpiConfig, segments: &mut [SpiSegment<'_>]) -> DriverResult<()> {
        if u16::from(config.chip_select) >= self.num_chipselect {
            return Err(DriverError::invalid(format!(
                "chip select {} out of range",
                config.chip_select
            )));
        }
        lock(&self.transfers).push(*config);

        let mut written = lock(&self.written);
        for segment in segments.iter_mut() {
            if let Some(tx) = segment.tx {
                written.extend_from_slice(tx);
            }
            if let Some(rx) = segment.rx.as_deref_mut() {
                match segment.tx {
                    Some(tx) => {
                        let len = tx.len().min(rx.len());
                        rx[..len].copy_from_slice(&tx[..len]);
                    }
                    None => {
                        for (i, byte) in rx.iter_mut().enumerate() {
                            *byte = i as u8;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct UartState {
    tx: Vec<u8>,
    rx: VecDeque<u8>,
    coding: Option<LineCoding>,
    dtr: bool,
    rts: bool,
    breaks: usize,
    rx_enabled: bool,
}

/// UART that captures transmitted bytes and lets callers inject received
/// ones.
#[derive(Default)]
pub struct SimUart {
    state: Mutex<UartState>,
    handler: Mutex<Option<RxHandler>>,
}

impl SimUart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `data` as received and run the RX callback until it stops
    /// draining the queue.
    pub fn push_rx(&self, data: &[u8]) {
        lock(&self.state).rx.extend(data.iter().copied());
        let handler = lock(&self.handler).clone();
        let Some(handler) = handler else {
            return;
        };
        loop {
            let before = {
                let state = lock(&self.state);
                if !state.rx_enabled {
                    return;
                }
                state.rx.len()
            };
            if before == 0 {
                return;
            }
            handler();
            if lock(&self.state).rx.len() >= before {
                return;
            }
        }
    }

    /// Bytes transmitted so far.
    pub fn transmitted(&self) -> Vec<u8> {
        lock(&self.state).tx.clone()
    }

    pub fn line_coding(&self) -> Option<LineCoding> {
        lock(&self.state).coding
    }

    /// `(dtr, rts)`.
    pub fn control_lines(&self) -> (bool, bool) {
        let state = lock(&self.state);
        (state.dtr, state.rts)
    }

    pub fn breaks_sent(&self) -> usize {
        lock(&self.state).breaks
    }

    pub fn rx_enabled(&self) -> bool {
        lock(&self.state).rx_enabled
    }
}

impl UartPort for SimUart {
    fn write(&self, data: &[u8]) -> DriverResult<()> {
        lock(&self.state).tx.extend_from_slice(data);
        Ok(())
    }

    fn configure(&self, coding: &LineCoding) -> DriverResult<()> {
        lock(&self.state).coding = Some(*coding);
        Ok(())
    }

    fn set_dtr(&self, on: bool) -> DriverResult<()> {
        lock(&self.state).dtr = on;
        Ok(())
    }

    fn set_rts(&self, on: bool) -> DriverResult<()> {
        lock(&self.state).rts = on;
        Ok(())
    }

    fn send_break(&self) -> DriverResult<()> {
        lock(&self.state).breaks += 1;
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let mut state = lock(&self.state);
        let len = state.rx.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..len)) {
            *slot = byte;
        }
        len
    }

    fn set_rx_handler(&self, handler: Option<RxHandler>) -> DriverResult<()> {
        *lock(&self.handler) = handler;
        Ok(())
    }

    fn enable_rx(&self) -> DriverResult<()> {
        lock(&self.state).rx_enabled = true;
        Ok(())
    }

    fn disable_rx(&self) -> DriverResult<()> {
        lock(&self.state).rx_enabled = false;
        Ok(())
    }
}

/// Fixed firmware version.
#[derive(Debug, Clone)]
pub struct StaticFirmware(pub FirmwareVersion);

impl FirmwareInfo for StaticFirmware {
    fn running_version(&self) -> DriverResult<FirmwareVersion> {
        Ok(self.0.clone())
    }
}

/// One of each simulated peripheral.
#[derive(Clone)]
pub struct SimBoard {
    pub gpio: Arc<SimGpio>,
    pub i2c: Arc<SimI2c>,
    pub spi: Arc<SimSpi>,
    pub uart: Arc<SimUart>,
    pub firmware: Arc<StaticFirmware>,
}

impl SimBoard {
    pub const GPIO_LINES: u8 = 16;
    pub const SPI_CHIPSELECTS: u16 = 2;

    pub fn new() -> Self {
        Self {
            gpio: Arc::new(SimGpio::new(Self::GPIO_LINES)),
            i2c: Arc::new(SimI2c::new()),
            spi: Arc::new(SimSpi::new(Self::SPI_CHIPSELECTS)),
            uart: Arc::new(SimUart::new()),
            firmware: Arc::new(StaticFirmware(FirmwareVersion {
                tag: "sim".to_string(),
                major: 0,
                minor: 1,
            })),
        }
    }

    /// Peripheral set backed by this board, serving `manifest`.
    pub fn peripherals(&self, manifest: impl Into<Arc<[u8]>>) -> Peripherals {
        Peripherals::new(manifest)
            .with_gpio(self.gpio.clone())
            .with_i2c(self.i2c.clone())
            .with_spi(self.spi.clone())
            .with_uart(self.uart.clone())
            .with_firmware(self.firmware.clone())
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}
