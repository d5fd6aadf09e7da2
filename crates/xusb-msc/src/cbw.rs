//! Bulk-only transport wrappers.

pub const CBW_SIGNATURE: u32 = 0x4342_5355; // 'USBC'
pub const CSW_SIGNATURE: u32 = 0x5342_5355; // 'USBS'

pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;

const CBW_FLAG_DATA_IN: u8 = 0x80;
const CB_MAX_LEN: usize = 16;

/// Command Block Wrapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cbw {
    pub tag: u32,
    pub data_transfer_length: u32,
    pub direction_in: bool,
    pub lun: u8,
    pub cb_length: u8,
    pub cb: [u8; CB_MAX_LEN],
}

impl Cbw {
    pub fn new(
        tag: u32,
        data_transfer_length: u32,
        direction_in: bool,
        lun: u8,
        cdb: &[u8],
    ) -> Self {
        let mut cb = [0u8; CB_MAX_LEN];
        let len = cdb.len().min(CB_MAX_LEN);
        cb[..len].copy_from_slice(&cdb[..len]);
        Self {
            tag,
            data_transfer_length,
            direction_in,
            lun,
            cb_length: len as u8,
            cb,
        }
    }

    pub fn to_bytes(&self) -> [u8; CBW_LEN] {
        let mut out = [0u8; CBW_LEN];
        out[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_transfer_length.to_le_bytes());
        out[12] = if self.direction_in { CBW_FLAG_DATA_IN } else { 0 };
        out[13] = self.lun & 0x0f;
        out[14] = self.cb_length;
        out[15..].copy_from_slice(&self.cb);
        out
    }
}

/// `bCSWStatus` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CswStatus {
    Passed,
    Failed,
    PhaseError,
    Reserved(u8),
}

impl CswStatus {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => CswStatus::Passed,
            1 => CswStatus::Failed,
            2 => CswStatus::PhaseError,
            other => CswStatus::Reserved(other),
        }
    }
}

/// Command Status Wrapper.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Csw {
    pub signature: u32,
    pub tag: u32,
    pub data_residue: u32,
    pub status: u8,
}

impl Csw {
    pub fn from_bytes(data: &[u8; CSW_LEN]) -> Self {
        Self {
            signature: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            tag: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            data_residue: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            status: data[12],
        }
    }

    /// A CSW is meaningful only if it carries the signature and answers the CBW with `tag`.
    pub fn is_valid_for(&self, tag: u32) -> bool {
        self.signature == CSW_SIGNATURE && self.tag == tag
    }

    pub fn status(&self) -> CswStatus {
        CswStatus::from_raw(self.status)
    }
}
