//! Placement of the driver's DMA-visible structures inside the context memory region.

use crate::error::{Result, XusbError};

/// Required alignment of the context base.
pub const CONTEXT_ALIGN: u64 = 0x100;

pub const EP_CONTEXT_OFFSET: u64 = 0x000;
pub const TRB_RING_OFFSET: u64 = 0x100;
pub const TRB_DEQUEUE_OFFSET: u64 = 0x200;
pub const CMD_BUF_OFFSET: u64 = 0x300;
pub const STS_BUF_OFFSET: u64 = 0x400;
pub const DATA_BUF_OFFSET: u64 = 0x500;
pub const BULK_BUF_OFFSET: u64 = 0x600;

/// Bytes reserved for the transfer ring.
pub const TRB_RING_SIZE: usize = 0x100;
/// Bytes reserved for the control/response data buffer.
pub const DATA_BUF_SIZE: usize = 0x100;
/// Bytes reserved for each of the CBW and CSW buffers.
pub const CMD_BUF_SIZE: usize = 0x100;

/// Physical addresses of every region, derived from one aligned base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextLayout {
    base: u64,
    bulk_len: usize,
}

impl ContextLayout {
    pub fn new(base: u64, bulk_len: usize) -> Result<Self> {
        if base % CONTEXT_ALIGN != 0 {
            return Err(XusbError::Misaligned(base));
        }
        Ok(Self { base, bulk_len })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Total size of the region including the bulk buffer.
    pub fn size(&self) -> u64 {
        BULK_BUF_OFFSET + self.bulk_len as u64
    }

    pub fn ep_context(&self) -> u64 {
        self.base + EP_CONTEXT_OFFSET
    }

    pub fn trb_ring(&self) -> u64 {
        self.base + TRB_RING_OFFSET
    }

    pub fn trb_dequeue(&self) -> u64 {
        self.base + TRB_DEQUEUE_OFFSET
    }

    /// Command block wrapper buffer.
    pub fn cmd_buf(&self) -> u64 {
        self.base + CMD_BUF_OFFSET
    }

    /// Command status wrapper buffer.
    pub fn sts_buf(&self) -> u64 {
        self.base + STS_BUF_OFFSET
    }

    pub fn data_buf(&self) -> u64 {
        self.base + DATA_BUF_OFFSET
    }

    pub fn bulk_buf(&self) -> u64 {
        self.base + BULK_BUF_OFFSET
    }

    pub fn bulk_len(&self) -> usize {
        self.bulk_len
    }
}
