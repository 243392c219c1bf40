//! Greybus protocol engine for nodes that expose peripherals to a host.
//!
//! # Crate Structure
//!
//! - [`message`]: operation messages, header codec and stream framing
//! - [`transport`]: link abstraction with in-memory and Unix socket transports
//! - [`engine`]: cport registry, driver interface and dispatch engine
//! - [`protocols`]: control, GPIO, I2C, SPI, UART, log, loopback and firmware
//!   drivers plus simulated peripherals (behind `protocols` feature)

/// Re-export message types.
pub mod message {
    pub use greybus_message::*;
}

/// Re-export transport types.
pub mod transport {
    pub use greybus_transport::*;
}

/// Re-export engine types.
pub mod engine {
    pub use greybus_core::*;
}

/// Re-export protocol drivers (requires `protocols` feature).
#[cfg(feature = "protocols")]
pub mod protocols {
    pub use greybus_protocols::*;
}

pub use greybus_core::{Bus, Driver, Greybus, GreybusConfig, GreybusError, Protocol, Result};
