use std::fmt;

/// Status code carried in the `result` byte of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationResult {
    Success = 0x00,
    Interrupted = 0x01,
    Timeout = 0x02,
    NoMemory = 0x03,
    ProtocolBad = 0x04,
    Overflow = 0x05,
    Invalid = 0x06,
    Retry = 0x07,
    Nonexistent = 0x08,
    UnknownError = 0xfe,
    Internal = 0xff,
}

impl OperationResult {
    /// Wire value of this result.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Interrupted => "interrupted",
            Self::Timeout => "timeout",
            Self::NoMemory => "no-memory",
            Self::ProtocolBad => "protocol-bad",
            Self::Overflow => "overflow",
            Self::Invalid => "invalid",
            Self::Retry => "retry",
            Self::Nonexistent => "nonexistent",
            Self::UnknownError => "unknown-error",
            Self::Internal => "internal",
        }
    }
}

/// Unassigned codes collapse to `UnknownError`.
impl From<u8> for OperationResult {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            0x01 => Self::Interrupted,
            0x02 => Self::Timeout,
            0x03 => Self::NoMemory,
            0x04 => Self::ProtocolBad,
            0x05 => Self::Overflow,
            0x06 => Self::Invalid,
            0x07 => Self::Retry,
            0x08 => Self::Nonexistent,
            0xff => Self::Internal,
            _ => Self::UnknownError,
        }
    }
}

impl From<OperationResult> for u8 {
    fn from(result: OperationResult) -> Self {
        result.code()
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.code())
    }
}
