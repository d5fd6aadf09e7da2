use thiserror::Error;

use crate::completion::ErrorClass;
use crate::trb::CompletionCode;

pub type Result<T> = std::result::Result<T, XusbError>;

/// Errors reported by the XUSB host driver.
///
/// Transfer-level variants (`Stalled`, `Retry`, `Timeout`, `NotReady`, `DeviceResponse`,
/// `Completion`) come out of a single submission; the remaining variants describe setup or
/// bring-up failures that no retry can recover.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum XusbError {
    #[error("endpoint stalled")]
    Stalled,

    #[error("transient transfer failure")]
    Retry,

    #[error("controller did not respond before the poll budget expired")]
    Timeout,

    #[error("endpoint remained not-ready")]
    NotReady,

    #[error("device responded with an operation error")]
    DeviceResponse,

    #[error("transfer completed with code {0:?}")]
    Completion(CompletionCode),

    #[error("unsupported device request bRequest={0:#04x}")]
    InvalidRequest(u8),

    #[error("descriptor parse error: {0}")]
    ParseError(&'static str),

    #[error("no device attached to the root port")]
    NotAttached,

    #[error("boot port {0} has no controller port")]
    UnsupportedPort(u8),

    #[error("port reset did not complete")]
    PortResetTimeout,

    #[error("transfer ring is full")]
    RingFull,

    #[error("buffer of {len} bytes exceeds the {capacity}-byte region")]
    BufferTooLarge { len: usize, capacity: usize },

    #[error("context base {0:#x} is not 256-byte aligned")]
    Misaligned(u64),
}

impl XusbError {
    /// Collapses the error into the transfer-level taxonomy used by retry loops.
    pub fn class(&self) -> ErrorClass {
        match self {
            XusbError::Stalled => ErrorClass::Stalled,
            XusbError::Retry
            | XusbError::Timeout
            | XusbError::NotReady
            | XusbError::DeviceResponse => ErrorClass::Retry,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retry
    }
}
