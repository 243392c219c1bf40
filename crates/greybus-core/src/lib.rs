//! Greybus protocol engine.
//!
//! The engine owns a fixed table of cports built from [`GreybusConfig`],
//! binds at most one [`Driver`] per cport and routes received operations to
//! them:
//!
//! ```text
//! transport ──deliver──▶ receive ──▶ bounded queue ──▶ worker ──▶ Driver::handle
//!                                                         │
//!                                     ping (type 0) ◀─────┘ answered directly
//! ```
//!
//! Drivers answer through the [`Bus`] handle they are given, which also lets
//! them originate requests and drive connection events on other cports.

pub mod bus;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod registry;

pub use bus::{Bus, EngineStats};
pub use config::{CportConfig, GreybusConfig, Protocol, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_NAME};
pub use driver::{Driver, Event};
pub use engine::Greybus;
pub use error::{DriverError, DriverResult, GreybusError, Result};
pub use registry::{CportInfo, Registry};

pub use greybus_message::{Message, OperationResult};
