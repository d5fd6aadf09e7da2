//! The SCSI command subset used to bring up and read the boot medium.

use crate::error::{MscError, Result};

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const READ_FORMAT_CAPACITY: u8 = 0x23;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2a;
}

pub const INQUIRY_RESPONSE_LEN: u32 = 36;
pub const REQUEST_SENSE_RESPONSE_LEN: u32 = 18;
pub const READ_CAPACITY_RESPONSE_LEN: u32 = 8;
pub const READ_FORMAT_CAPACITY_RESPONSE_LEN: u32 = 252;

/// Sense keys the driver reports by name.
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x0;
    pub const NOT_READY: u8 = 0x2;
    pub const MEDIUM_ERROR: u8 = 0x3;
    pub const ILLEGAL_REQUEST: u8 = 0x5;
    pub const UNIT_ATTENTION: u8 = 0x6;
}

/// Direction of the BOT data stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataDirection {
    None,
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScsiCommand {
    TestUnitReady,
    RequestSense,
    Inquiry,
    ReadFormatCapacity,
    ReadCapacity10,
    /// `blocks` device blocks of `block_len` bytes starting at `lba`.
    Read10 { lba: u32, blocks: u16, block_len: u32 },
    Write10 { lba: u32, blocks: u16, block_len: u32 },
}

impl ScsiCommand {
    /// Builds a parameterless command from its opcode. READ(10) and WRITE(10) need an address and
    /// are constructed directly.
    pub fn from_opcode(op: u8) -> Result<Self> {
        Ok(match op {
            opcode::TEST_UNIT_READY => ScsiCommand::TestUnitReady,
            opcode::REQUEST_SENSE => ScsiCommand::RequestSense,
            opcode::INQUIRY => ScsiCommand::Inquiry,
            opcode::READ_FORMAT_CAPACITY => ScsiCommand::ReadFormatCapacity,
            opcode::READ_CAPACITY_10 => ScsiCommand::ReadCapacity10,
            other => return Err(MscError::InvalidCommand(other)),
        })
    }

    pub fn opcode(&self) -> u8 {
        match self {
            ScsiCommand::TestUnitReady => opcode::TEST_UNIT_READY,
            ScsiCommand::RequestSense => opcode::REQUEST_SENSE,
            ScsiCommand::Inquiry => opcode::INQUIRY,
            ScsiCommand::ReadFormatCapacity => opcode::READ_FORMAT_CAPACITY,
            ScsiCommand::ReadCapacity10 => opcode::READ_CAPACITY_10,
            ScsiCommand::Read10 { .. } => opcode::READ_10,
            ScsiCommand::Write10 { .. } => opcode::WRITE_10,
        }
    }

    pub fn cdb_len(&self) -> usize {
        match self {
            ScsiCommand::TestUnitReady | ScsiCommand::Inquiry => 6,
            ScsiCommand::RequestSense => 12,
            _ => 10,
        }
    }

    pub fn direction(&self) -> DataDirection {
        match self {
            ScsiCommand::TestUnitReady => DataDirection::None,
            ScsiCommand::Write10 { .. } => DataDirection::Out,
            _ => DataDirection::In,
        }
    }

    /// `dCBWDataTransferLength` for this command.
    pub fn data_len(&self) -> u32 {
        match *self {
            ScsiCommand::TestUnitReady => 0,
            ScsiCommand::RequestSense => REQUEST_SENSE_RESPONSE_LEN,
            ScsiCommand::Inquiry => INQUIRY_RESPONSE_LEN,
            ScsiCommand::ReadFormatCapacity => READ_FORMAT_CAPACITY_RESPONSE_LEN,
            ScsiCommand::ReadCapacity10 => READ_CAPACITY_RESPONSE_LEN,
            ScsiCommand::Read10 {
                blocks, block_len, ..
            }
            | ScsiCommand::Write10 {
                blocks, block_len, ..
            } => u32::from(blocks) * block_len,
        }
    }

    /// The command descriptor block, `cdb_len()` bytes long. Byte 1 carries the LUN in bits 0..=2.
    pub fn cdb(&self, lun: u8) -> [u8; 16] {
        let mut cb = [0u8; 16];
        cb[0] = self.opcode();
        cb[1] = lun & 0x07;
        match *self {
            ScsiCommand::Inquiry => cb[4] = INQUIRY_RESPONSE_LEN as u8,
            ScsiCommand::RequestSense => cb[4] = REQUEST_SENSE_RESPONSE_LEN as u8,
            ScsiCommand::ReadFormatCapacity => {
                cb[7..9].copy_from_slice(&(READ_FORMAT_CAPACITY_RESPONSE_LEN as u16).to_be_bytes());
            }
            ScsiCommand::Read10 { lba, blocks, .. } | ScsiCommand::Write10 { lba, blocks, .. } => {
                cb[2..6].copy_from_slice(&lba.to_be_bytes());
                cb[7..9].copy_from_slice(&blocks.to_be_bytes());
            }
            ScsiCommand::TestUnitReady | ScsiCommand::ReadCapacity10 => {}
        }
        cb
    }
}

/// Peripheral device type from standard INQUIRY data.
pub fn parse_peripheral_type(data: &[u8]) -> u8 {
    data.first().map_or(0, |b| b & 0x1f)
}

/// Sense key from fixed-format sense data.
pub fn parse_sense_key(data: &[u8]) -> u8 {
    data.get(2).map_or(0, |b| b & 0x0f)
}

/// `(last_lba, block_len)` from READ CAPACITY(10) data.
pub fn parse_read_capacity(data: &[u8; 8]) -> (u32, u32) {
    (
        u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
    )
}

/// `(num_blocks, block_len)` from the current-capacity descriptor of READ FORMAT CAPACITIES data.
pub fn parse_format_capacity(data: &[u8; 12]) -> (u32, u32) {
    let blocks = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let block_len = u32::from_be_bytes([0, data[9], data[10], data[11]]);
    (blocks, block_len)
}
