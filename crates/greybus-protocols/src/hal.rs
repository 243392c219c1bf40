//! Peripheral capabilities the protocol drivers act on.
//!
//! Drivers never touch hardware directly. Each protocol takes one of these
//! traits at construction; [`crate::sim`] provides in-memory implementations.
//! Every method reports failure as a [`DriverError`], which the driver turns
//! into the wire result code of the response.

use std::sync::Arc;

use greybus_core::{DriverError, DriverResult};

/// Logical direction of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Interrupt trigger of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Disabled,
    EdgeRising,
    EdgeFalling,
    EdgeBoth,
    LevelHigh,
    LevelLow,
}

/// Called with the line number when a GPIO interrupt fires.
pub type IrqHandler = Arc<dyn Fn(u8) + Send + Sync>;

pub trait GpioController: Send + Sync {
    /// Number of usable lines.
    fn line_count(&self) -> u8;

    fn direction(&self, line: u8) -> DriverResult<Direction>;

    fn set_input(&self, line: u8) -> DriverResult<()>;

    /// Configure `line` as an output driven to `high`.
    fn set_output(&self, line: u8, high: bool) -> DriverResult<()>;

    fn get_value(&self, line: u8) -> DriverResult<bool>;

    fn set_value(&self, line: u8, high: bool) -> DriverResult<()>;

    fn set_debounce(&self, line: u8, usec: u16) -> DriverResult<()>;

    /// Arm or disarm the interrupt on `line`.
    fn configure_interrupt(&self, line: u8, trigger: Trigger) -> DriverResult<()>;

    /// Install (or with `None`, remove) the interrupt callback for every line.
    fn set_irq_handler(&self, handler: Option<IrqHandler>) -> DriverResult<()>;
}

/// One leg of an I2C transaction.
#[derive(Debug)]
pub enum I2cOperation<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

pub trait I2cBus: Send + Sync {
    /// Run `operations` against `address` as one transaction.
    fn transfer(&self, address: u16, operations: &mut [I2cOperation<'_>]) -> DriverResult<()>;
}

/// Capabilities of an SPI controller as reported by master-config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiMasterConfig {
    pub bits_per_word_mask: u32,
    pub min_speed_hz: u32,
    pub max_speed_hz: u32,
    pub mode: u16,
    pub flags: u16,
    pub num_chipselect: u16,
}

/// One device behind an SPI chip select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiDeviceConfig {
    pub mode: u16,
    pub bits_per_word: u8,
    pub max_speed_hz: u32,
    pub device_type: u8,
    pub name: String,
}

/// Bus settings applied to a whole transfer batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    pub chip_select: u8,
    pub mode: u8,
    pub bits_per_word: u8,
    pub speed_hz: u32,
}

/// One segment of an SPI batch. A segment with `tx` only writes, one with
/// `rx` only clocks out zeros and keeps what it reads.
#[derive(Debug)]
pub struct SpiSegment<'a> {
    pub tx: Option<&'a [u8]>,
    pub rx: Option<&'a mut [u8]>,
}

pub trait SpiController: Send + Sync {
    fn master_config(&self) -> DriverResult<SpiMasterConfig>;

    fn device_config(&self, chip_select: u8) -> DriverResult<SpiDeviceConfig>;

    fn transceive(&self, config: &SpiConfig, segments: &mut [SpiSegment<'_>]) -> DriverResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    OneAndHalf,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    RtsCts,
}

/// Serial line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    pub baud_rate: u32,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// 5 to 9.
    pub data_bits: u8,
    pub flow_control: FlowControl,
}

/// Called when the UART has received bytes.
pub type RxHandler = Arc<dyn Fn() + Send + Sync>;

pub trait UartPort: Send + Sync {
    /// Queue `data` for transmission.
    fn write(&self, data: &[u8]) -> DriverResult<()>;

    fn configure(&self, coding: &LineCoding) -> DriverResult<()>;

    fn set_dtr(&self, on: bool) -> DriverResult<()>;

    fn set_rts(&self, on: bool) -> DriverResult<()>;

    fn send_break(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Move received bytes into `buf`; returns how many were copied.
    fn read(&self, buf: &mut [u8]) -> usize;

    fn set_rx_handler(&self, handler: Option<RxHandler>) -> DriverResult<()>;

    fn enable_rx(&self) -> DriverResult<()>;

    fn disable_rx(&self) -> DriverResult<()>;
}

/// Number of strobe timestamps in a timesync authoritative request.
pub const TIMESYNC_MAX_STROBES: usize = 4;

/// Frame-time synchronisation. Without an implementation every operation
/// reports [`DriverError::Unsupported`].
pub trait Timesync: Send + Sync {
    fn enable(
        &self,
        _count: u8,
        _frame_time: u64,
        _strobe_delay: u32,
        _refclk: u32,
    ) -> DriverResult<()> {
        Err(DriverError::Unsupported)
    }

    fn disable(&self) -> DriverResult<()> {
        Err(DriverError::Unsupported)
    }

    fn authoritative(&self, _frame_times: &[u64; TIMESYNC_MAX_STROBES]) -> DriverResult<()> {
        Err(DriverError::Unsupported)
    }

    fn last_event(&self) -> DriverResult<u64> {
        Err(DriverError::Unsupported)
    }
}

/// Timesync capability of a node without a frame-time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTimesync;

impl Timesync for NoTimesync {}

/// Version of the running firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub tag: String,
    pub major: u16,
    pub minor: u16,
}

pub trait FirmwareInfo: Send + Sync {
    fn running_version(&self) -> DriverResult<FirmwareVersion>;
}
