use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GreybusError, Result};

/// Default capacity of the receive queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default name of the dispatch worker thread.
pub const DEFAULT_WORKER_NAME: &str = "greybus-rx";

/// Greybus protocol carried by a cport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ProtocolRepr", into = "ProtocolRepr")]
pub enum Protocol {
    Control,
    Gpio,
    I2c,
    Uart,
    Spi,
    Loopback,
    FwDownload,
    FwManagement,
    Log,
    Vendor,
    Unknown(u8),
}

impl Protocol {
    const NAMED: [Protocol; 10] = [
        Protocol::Control,
        Protocol::Gpio,
        Protocol::I2c,
        Protocol::Uart,
        Protocol::Spi,
        Protocol::Loopback,
        Protocol::FwDownload,
        Protocol::FwManagement,
        Protocol::Log,
        Protocol::Vendor,
    ];

    /// Protocol id as it appears in the manifest.
    pub fn id(self) -> u8 {
        match self {
            Self::Control => 0x00,
            Self::Gpio => 0x02,
            Self::I2c => 0x03,
            Self::Uart => 0x04,
            Self::Spi => 0x0b,
            Self::Loopback => 0x11,
            Self::FwDownload => 0x17,
            Self::FwManagement => 0x18,
            Self::Log => 0x1a,
            Self::Vendor => 0xff,
            Self::Unknown(id) => id,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Gpio => "gpio",
            Self::I2c => "i2c",
            Self::Uart => "uart",
            Self::Spi => "spi",
            Self::Loopback => "loopback",
            Self::FwDownload => "fw-download",
            Self::FwManagement => "fw-management",
            Self::Log => "log",
            Self::Vendor => "vendor",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Parse a protocol name as accepted in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::NAMED.into_iter().find(|p| p.name() == normalized)
    }
}

impl From<u8> for Protocol {
    fn from(id: u8) -> Self {
        Self::NAMED
            .into_iter()
            .find(|p| p.id() == id)
            .unwrap_or(Self::Unknown(id))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "unknown(0x{id:02x})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Configuration-file form of a protocol: a name or a numeric id.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ProtocolRepr {
    Id(u8),
    Name(String),
}

impl TryFrom<ProtocolRepr> for Protocol {
    type Error = String;

    fn try_from(repr: ProtocolRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ProtocolRepr::Id(id) => Ok(Protocol::from(id)),
            ProtocolRepr::Name(name) => {
                Protocol::from_name(&name).ok_or_else(|| format!("unknown protocol '{name}'"))
            }
        }
    }
}

impl From<Protocol> for ProtocolRepr {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Unknown(id) => ProtocolRepr::Id(id),
            named => ProtocolRepr::Name(named.name().to_string()),
        }
    }
}

/// One row of the cport table. The row's position is the cport number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CportConfig {
    pub bundle: u8,
    pub protocol: Protocol,
}

/// Engine configuration: the static cport table plus worker sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GreybusConfig {
    /// Cport table; index is the cport number.
    pub cports: Vec<CportConfig>,
    /// Receive queue capacity. Producers block once it is full.
    pub queue_capacity: usize,
    /// Name of the dispatch worker thread.
    pub worker_name: String,
    /// Stack size of the dispatch worker thread, platform default when unset.
    pub worker_stack_size: Option<usize>,
    /// Manifest blob served by the control protocol.
    pub manifest: Option<PathBuf>,
}

impl Default for GreybusConfig {
    fn default() -> Self {
        Self {
            cports: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            worker_stack_size: None,
            manifest: None,
        }
    }
}

impl GreybusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cport to the table.
    pub fn with_cport(mut self, bundle: u8, protocol: Protocol) -> Self {
        self.cports.push(CportConfig { bundle, protocol });
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn with_worker_stack_size(mut self, size: usize) -> Self {
        self.worker_stack_size = Some(size);
        self
    }

    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest = Some(path.into());
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| GreybusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GreybusError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| GreybusError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cports.is_empty() {
            return Err(GreybusError::Config("cport table is empty".into()));
        }
        if self.cports.len() > usize::from(u16::MAX) + 1 {
            return Err(GreybusError::Config(format!(
                "cport table has {} entries (max {})",
                self.cports.len(),
                usize::from(u16::MAX) + 1
            )));
        }
        if self.queue_capacity == 0 {
            return Err(GreybusError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.worker_name.trim().is_empty() {
            return Err(GreybusError::Config("worker_name must not be empty".into()));
        }
        if self.cports[0].protocol != Protocol::Control {
            warn!(
                protocol = %self.cports[0].protocol,
                "cport 0 is not the control protocol"
            );
        }
        Ok(())
    }

    /// Number of cports in the table.
    pub fn cport_count(&self) -> usize {
        self.cports.len()
    }

    pub fn cport(&self, cport: u16) -> Option<&CportConfig> {
        self.cports.get(usize::from(cport))
    }
}
