//! Page-granular reads and writes of the boot medium.
//!
//! The boot loader addresses the medium in (block, page) pairs. A page is one device block, so
//! the LBA of a page is `(block << (block_size_log2 - page_size_log2)) + page`. Data moves
//! through the bulk page buffer in context memory.

use tracing::{debug, warn};
use xusb_host::retry::{retry, Attempt};
use xusb_host::XusbPlatform;

use crate::config::MscConfig;
use crate::device::MscDevice;
use crate::error::{MscError, Result};
use crate::scsi::ScsiCommand;

/// Logical block address of `page` within boot block `block`.
pub fn page_lba(config: &MscConfig, block: u32, page: u32) -> Result<u32> {
    let pages_per_block = config.pages_per_block();
    if page >= pages_per_block {
        return Err(MscError::InvalidPage {
            page,
            pages_per_block,
        });
    }
    let shift = config.block_size_log2.saturating_sub(config.page_size_log2);
    let lba = (u64::from(block) << shift) + u64::from(page);
    u32::try_from(lba).map_err(|_| MscError::BlockOutOfRange { block })
}

impl<P: XusbPlatform> MscDevice<P> {
    fn page_command(&self, block: u32, page: u32, len: usize, write: bool) -> Result<ScsiCommand> {
        let lba = page_lba(&self.config, block, page)?;
        let block_len = self.block_len()?;
        let invalid = MscError::InvalidLength { len, block_len };
        if len == 0 || len % block_len as usize != 0 || len > self.host.layout().bulk_len() {
            return Err(invalid);
        }
        let blocks = u16::try_from(len / block_len as usize).map_err(|_| invalid)?;
        Ok(if write {
            ScsiCommand::Write10 {
                lba,
                blocks,
                block_len,
            }
        } else {
            ScsiCommand::Read10 {
                lba,
                blocks,
                block_len,
            }
        })
    }

    fn page_transfer(&mut self, cmd: ScsiCommand) -> Result<()> {
        let policy = self.config.page_retry;
        let result = retry(self, policy, |d, _| match d.execute(cmd) {
            Ok(()) => Attempt::Done(Ok(())),
            Err(e) => Attempt::Again(e),
        });
        if let Err(e @ MscError::CommandFailed { .. }) = result {
            // Capture the sense key for the boot loader's diagnostics.
            match self.request_sense() {
                Ok(key) => warn!(%e, sense_key = key, "page transfer failed"),
                Err(sense_err) => warn!(%e, %sense_err, "page transfer failed, no sense data"),
            }
        }
        result
    }

    /// Reads `dest.len()` bytes starting at `page` of `block`.
    ///
    /// `dest.len()` must be a non-zero multiple of the device block length that fits the bulk
    /// buffer.
    pub fn read_page(&mut self, block: u32, page: u32, dest: &mut [u8]) -> Result<()> {
        let result = self.read_page_inner(block, page, dest);
        self.last_error = result.err();
        result
    }

    fn read_page_inner(&mut self, block: u32, page: u32, dest: &mut [u8]) -> Result<()> {
        let cmd = self.page_command(block, page, dest.len(), false)?;
        debug!(block, page, len = dest.len(), "read page");
        self.page_transfer(cmd)?;
        let buf = self.host.layout().bulk_buf();
        self.host.read_mem(buf, dest);
        Ok(())
    }

    /// Writes `src` starting at `page` of `block`. Same length rules as [`MscDevice::read_page`].
    pub fn write_page(&mut self, block: u32, page: u32, src: &[u8]) -> Result<()> {
        let result = self.write_page_inner(block, page, src);
        self.last_error = result.err();
        result
    }

    fn write_page_inner(&mut self, block: u32, page: u32, src: &[u8]) -> Result<()> {
        let cmd = self.page_command(block, page, src.len(), true)?;
        debug!(block, page, len = src.len(), "write page");
        let buf = self.host.layout().bulk_buf();
        self.host.write_mem(buf, src);
        self.page_transfer(cmd)
    }
}
