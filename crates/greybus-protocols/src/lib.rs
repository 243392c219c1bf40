//! Greybus protocol drivers.
//!
//! Each module implements one protocol as a [`greybus_core::Driver`]. Drivers
//! act on peripherals through the capability traits in [`hal`], so the same
//! driver runs against real hardware bindings or the simulators in [`sim`].
//!
//! [`Peripherals`] maps a cport's protocol to a ready driver and plugs
//! straight into [`greybus_core::Greybus::register_from_config`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use greybus_core::{Greybus, GreybusConfig, Protocol};
//! # use greybus_protocols::sim::SimBoard;
//! # fn demo(transport: Arc<dyn greybus_transport::Transport>) -> greybus_core::Result<()> {
//! let config = GreybusConfig::new()
//!     .with_cport(0, Protocol::Control)
//!     .with_cport(1, Protocol::Gpio);
//! let engine = Greybus::init(config, transport)?;
//! let peripherals = SimBoard::new().peripherals(Vec::new());
//! engine.register_from_config(|_, entry| peripherals.driver_for(entry.protocol));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use greybus_core::{Driver, Protocol};

pub mod control;
pub mod firmware;
pub mod gpio;
pub mod hal;
pub mod i2c;
pub mod log;
pub mod loopback;
mod op;
pub mod sim;
pub mod spi;
pub mod uart;

pub use control::ControlDriver;
pub use firmware::{FirmwareDownloadDriver, FirmwareManagementDriver};
pub use gpio::GpioDriver;
pub use i2c::I2cDriver;
pub use log::{send_log, LogDriver};
pub use loopback::LoopbackDriver;
pub use spi::SpiDriver;
pub use uart::UartDriver;

use hal::{FirmwareInfo, GpioController, I2cBus, NoTimesync, SpiController, Timesync, UartPort};

/// The peripherals of a node, and the factory for its protocol drivers.
#[derive(Clone)]
pub struct Peripherals {
    manifest: Arc<[u8]>,
    timesync: Arc<dyn Timesync>,
    gpio: Option<Arc<dyn GpioController>>,
    i2c: Option<Arc<dyn I2cBus>>,
    spi: Option<Arc<dyn SpiController>>,
    uart: Option<Arc<dyn UartPort>>,
    firmware: Option<Arc<dyn FirmwareInfo>>,
}

impl Peripherals {
    /// A node serving `manifest` with no peripherals attached.
    pub fn new(manifest: impl Into<Arc<[u8]>>) -> Self {
        Self {
            manifest: manifest.into(),
            timesync: Arc::new(NoTimesync),
            gpio: None,
            i2c: None,
            spi: None,
            uart: None,
            firmware: None,
        }
    }

    pub fn with_timesync(mut self, timesync: Arc<dyn Timesync>) -> Self {
        self.timesync = timesync;
        self
    }

    pub fn with_gpio(mut self, gpio: Arc<dyn GpioController>) -> Self {
        self.gpio = Some(gpio);
        self
    }

    pub fn with_i2c(mut self, i2c: Arc<dyn I2cBus>) -> Self {
        self.i2c = Some(i2c);
        self
    }

    pub fn with_spi(mut self, spi: Arc<dyn SpiController>) -> Self {
        self.spi = Some(spi);
        self
    }

    pub fn with_uart(mut self, uart: Arc<dyn UartPort>) -> Self {
        self.uart = Some(uart);
        self
    }

    pub fn with_firmware(mut self, firmware: Arc<dyn FirmwareInfo>) -> Self {
        self.firmware = Some(firmware);
        self
    }

    pub fn manifest(&self) -> &[u8] {
        &self.manifest
    }

    /// A fresh driver for `protocol`, or `None` when the protocol is not
    /// implemented or its peripheral is missing.
    pub fn driver_for(&self, protocol: Protocol) -> Option<Arc<dyn Driver>> {
        let driver: Arc<dyn Driver> = match protocol {
            Protocol::Control => Arc::new(
                ControlDriver::new(Arc::clone(&self.manifest))
                    .with_timesync(Arc::clone(&self.timesync)),
            ),
            Protocol::Gpio => Arc::new(GpioDriver::new(self.gpio.clone()?)),
            Protocol::I2c => Arc::new(I2cDriver::new(self.i2c.clone()?)),
            Protocol::Spi => Arc::new(SpiDriver::new(self.spi.clone()?)),
            Protocol::Uart => Arc::new(UartDriver::new(self.uart.clone()?)),
            Protocol::Log => Arc::new(LogDriver::new()),
            Protocol::Loopback => Arc::new(LoopbackDriver::new()),
            Protocol::FwManagement => {
                Arc::new(FirmwareManagementDriver::new(self.firmware.clone()?))
            }
            Protocol::FwDownload => Arc::new(FirmwareDownloadDriver),
            Protocol::Vendor | Protocol::Unknown(_) => return None,
        };
        Some(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_skips_missing_peripherals() {
        let bare = Peripherals::new(Vec::new());
        assert!(bare.driver_for(Protocol::Control).is_some());
        assert!(bare.driver_for(Protocol::Log).is_some());
        assert!(bare.driver_for(Protocol::Gpio).is_none());
        assert!(bare.driver_for(Protocol::FwManagement).is_none());
        assert!(bare.driver_for(Protocol::Unknown(0x42)).is_none());
    }

    #[test]
    fn factory_names_match_protocols() {
        let peripherals = sim::SimBoard::new().peripherals(Vec::new());
        for protocol in [
            Protocol::Control,
            Protocol::Gpio,
            Protocol::I2c,
            Protocol::Spi,
            Protocol::Uart,
            Protocol::Log,
            Protocol::Loopback,
            Protocol::FwManagement,
            Protocol::FwDownload,
        ] {
            let driver = peripherals.driver_for(protocol).expect("driver");
            assert_eq!(driver.name(), protocol.name());
        }
        assert!(peripherals.driver_for(Protocol::Vendor).is_none());
    }
}
