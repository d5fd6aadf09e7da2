use thiserror::Error;
use xusb_host::{ErrorClass, XusbError};

pub type Result<T> = std::result::Result<T, MscError>;

/// Errors surfaced by the mass-storage client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MscError {
    #[error(transparent)]
    Transport(#[from] XusbError),

    /// The CSW reported command failure (status 1).
    #[error("command {opcode:#04x} failed")]
    CommandFailed { opcode: u8 },

    /// The CSW passed a page transfer but reported bytes not transferred.
    #[error("command {opcode:#04x} left {residue} bytes untransferred")]
    ShortTransfer { opcode: u8, residue: u32 },

    /// Phase error or an invalid CSW; reset recovery was performed.
    #[error("BOT phase error")]
    PhaseError,

    #[error("unsupported SCSI opcode {0:#04x}")]
    InvalidCommand(u8),

    #[error("page {page} is outside a {pages_per_block}-page block")]
    InvalidPage { page: u32, pages_per_block: u32 },

    #[error("block {block} is beyond the 32-bit LBA range")]
    BlockOutOfRange { block: u32 },

    #[error("invalid transfer length {len} for block length {block_len}")]
    InvalidLength { len: usize, block_len: u32 },

    /// No usable block length has been reported by the device.
    #[error("no media geometry available")]
    NoMedia,
}

impl MscError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MscError::Transport(e) => e.class(),
            MscError::CommandFailed { .. } | MscError::ShortTransfer { .. } => ErrorClass::Retry,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_transport_taxonomy() {
        assert_eq!(MscError::from(XusbError::Stalled).class(), ErrorClass::Stalled);
        assert_eq!(MscError::from(XusbError::Timeout).class(), ErrorClass::Retry);
        assert_eq!(MscError::CommandFailed { opcode: 0x28 }.class(), ErrorClass::Retry);
        assert_eq!(
            MscError::ShortTransfer {
                opcode: 0x28,
                residue: 512
            }
            .class(),
            ErrorClass::Retry
        );
        assert_eq!(MscError::PhaseError.class(), ErrorClass::Fatal);
        assert!(!MscError::NoMedia.is_retryable());
    }
}
