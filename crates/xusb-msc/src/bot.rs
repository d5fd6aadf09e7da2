//! Bulk-only transport: `CBW → [data] → CSW`, with halt recovery.

use tracing::{debug, trace, warn};
use xusb_host::retry::{retry, Attempt};
use xusb_host::{EndpointKind, XusbError, XusbPlatform};

use crate::cbw::{Cbw, Csw, CswStatus, CBW_LEN, CSW_LEN};
use crate::device::MscDevice;
use crate::error::{MscError, Result};
use crate::scsi::{self, DataDirection, ScsiCommand};

impl<P: XusbPlatform> MscDevice<P> {
    /// DMA address of the data stage: page transfers use the bulk buffer, everything else the
    /// 256-byte response buffer.
    pub(crate) fn data_address(&self, cmd: &ScsiCommand) -> u64 {
        let layout = self.host.layout();
        match cmd {
            ScsiCommand::Read10 { .. } | ScsiCommand::Write10 { .. } => layout.bulk_buf(),
            _ => layout.data_buf(),
        }
    }

    fn send_cbw(&mut self, cbw: &Cbw) -> Result<()> {
        let buf = self.host.layout().cmd_buf();
        self.host.write_mem(buf, &cbw.to_bytes());
        self.last_endpoint = EndpointKind::BulkOut;
        self.host
            .bulk_transfer(EndpointKind::BulkOut, buf, CBW_LEN as u32)?;
        Ok(())
    }

    fn transfer_data(&mut self, cmd: &ScsiCommand) -> Result<()> {
        let kind = match cmd.direction() {
            DataDirection::None => return Ok(()),
            DataDirection::In => EndpointKind::BulkIn,
            DataDirection::Out => EndpointKind::BulkOut,
        };
        let buf = self.data_address(cmd);
        self.last_endpoint = kind;
        self.host.bulk_transfer(kind, buf, cmd.data_len())?;
        Ok(())
    }

    fn receive_csw(&mut self, tag: u32, cmd: &ScsiCommand) -> Result<()> {
        let buf = self.host.layout().sts_buf();
        self.last_endpoint = EndpointKind::BulkIn;
        self.host
            .bulk_transfer(EndpointKind::BulkIn, buf, CSW_LEN as u32)?;

        let mut raw = [0u8; CSW_LEN];
        self.host.read_mem(buf, &mut raw);
        let csw = Csw::from_bytes(&raw);
        if !csw.is_valid_for(tag) {
            warn!(
                signature = csw.signature,
                tag = csw.tag,
                expected = tag,
                "invalid CSW"
            );
            return Err(MscError::PhaseError);
        }

        let status = self.host.status_mut();
        status.csw_status = csw.status;
        status.csw_tag = csw.tag;
        match csw.status() {
            CswStatus::Passed => {
                status.data_residue = csw.data_residue;
                // Page transfers must move every byte; other responses may be shorter than
                // their allocation length.
                let paged = matches!(
                    cmd,
                    ScsiCommand::Read10 { .. } | ScsiCommand::Write10 { .. }
                );
                if paged && csw.data_residue != 0 {
                    warn!(opcode = cmd.opcode(), residue = csw.data_residue, "short transfer");
                    return Err(MscError::ShortTransfer {
                        opcode: cmd.opcode(),
                        residue: csw.data_residue,
                    });
                }
                Ok(())
            }
            CswStatus::Failed => {
                status.data_residue = csw.data_residue;
                Err(MscError::CommandFailed {
                    opcode: cmd.opcode(),
                })
            }
            CswStatus::PhaseError | CswStatus::Reserved(_) => Err(MscError::PhaseError),
        }
    }

    /// One pass of the BOT state machine with a fresh tag.
    fn transport_once(&mut self, cmd: &ScsiCommand) -> Result<()> {
        let tag = self.next_tag();
        // Commands address the highest LUN the device reported.
        let lun = self.host.enumeration().max_lun;
        let cdb = cmd.cdb(lun);
        let cbw = Cbw::new(
            tag,
            cmd.data_len(),
            cmd.direction() == DataDirection::In,
            lun,
            &cdb[..cmd.cdb_len()],
        );
        trace!(opcode = cmd.opcode(), tag, len = cmd.data_len(), "BOT command");

        self.send_cbw(&cbw)?;
        if cmd.data_len() != 0 {
            self.transfer_data(cmd)?;
        }
        self.receive_csw(tag, cmd)
    }

    /// Runs `cmd` to completion, retrying transient failures.
    ///
    /// Responses to INQUIRY, REQUEST SENSE and the capacity commands are decoded into the status
    /// once both the data stage and the CSW succeed. A stalled pipe or a phase error clears the
    /// halt on the last bulk endpoint used and is then returned, even if clearing the halt fails.
    /// A page transfer whose CSW passes with a non-zero residue is a
    /// [`MscError::ShortTransfer`].
    pub fn execute(&mut self, cmd: ScsiCommand) -> Result<()> {
        self.host.clear_ring();
        let policy = self.config.command_retry;
        let result = retry(self, policy, |d, _| {
            Attempt::from_result(d.transport_once(&cmd), MscError::is_retryable)
        });

        match result {
            Ok(()) => {
                self.analyze(&cmd);
                Ok(())
            }
            Err(e @ (MscError::PhaseError | MscError::Transport(XusbError::Stalled))) => {
                let endpoint = self.last_endpoint;
                warn!(opcode = cmd.opcode(), ?endpoint, %e, "BOT reset recovery");
                // The command's own failure is what the caller acts on.
                if let Err(clear) = self.host.clear_endpoint_halt(endpoint) {
                    warn!(?endpoint, %clear, "clearing endpoint halt failed");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn analyze(&mut self, cmd: &ScsiCommand) {
        let buf = self.host.layout().data_buf();
        match cmd {
            ScsiCommand::Inquiry => {
                let mut data = [0u8; 1];
                self.host.read_mem(buf, &mut data);
                let ty = scsi::parse_peripheral_type(&data);
                self.host.status_mut().peripheral_type = ty;
                debug!(peripheral_type = ty, "inquiry");
            }
            ScsiCommand::RequestSense => {
                let mut data = [0u8; 3];
                self.host.read_mem(buf, &mut data);
                let key = scsi::parse_sense_key(&data);
                self.host.status_mut().sense_key = key;
                debug!(sense_key = key, "request sense");
            }
            ScsiCommand::ReadCapacity10 => {
                let mut data = [0u8; 8];
                self.host.read_mem(buf, &mut data);
                let (last_lba, block_len) = scsi::parse_read_capacity(&data);
                let status = self.host.status_mut();
                status.last_lba = last_lba;
                status.block_len = block_len;
                status.num_blocks = last_lba.saturating_add(1);
                debug!(last_lba, block_len, "read capacity");
            }
            ScsiCommand::ReadFormatCapacity => {
                let mut data = [0u8; 12];
                self.host.read_mem(buf, &mut data);
                let (num_blocks, block_len) = scsi::parse_format_capacity(&data);
                let status = self.host.status_mut();
                status.num_blocks = num_blocks;
                status.block_len = block_len;
                status.last_lba = num_blocks.saturating_sub(1);
                debug!(num_blocks, block_len, "read format capacity");
            }
            ScsiCommand::TestUnitReady
            | ScsiCommand::Read10 { .. }
            | ScsiCommand::Write10 { .. } => {}
        }
    }
}
