//! The boot-media handle exposed to the boot loader.

use tracing::{debug, warn};
use xusb_host::{
    BootParams, Delay, EnumerationInfo, EndpointKind, HostConfig, Usb3Status, XusbHost,
    XusbPlatform,
};

use crate::config::MscConfig;
use crate::error::{MscError, Result};
use crate::scsi::ScsiCommand;

/// Geometry reported by the medium.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub last_lba: u32,
    pub block_len: u32,
    pub num_blocks: u32,
    pub peripheral_type: u8,
}

/// A bulk-only mass-storage device behind an initialised [`XusbHost`].
pub struct MscDevice<P> {
    pub(crate) host: XusbHost<P>,
    pub(crate) config: MscConfig,
    next_tag: u32,
    /// Bulk endpoint of the most recent BOT stage; the target of halt recovery.
    pub(crate) last_endpoint: EndpointKind,
    /// Outcome of the last media initialisation or page operation.
    pub(crate) last_error: Option<MscError>,
}

impl<P: XusbPlatform> MscDevice<P> {
    /// Wraps a host whose port is already up. No traffic is generated.
    pub fn new(host: XusbHost<P>, config: MscConfig) -> Self {
        Self {
            host,
            config,
            next_tag: 1,
            last_endpoint: EndpointKind::BulkOut,
            last_error: None,
        }
    }

    /// Brings up the controller and root port, enumerates the device and initialises the medium.
    ///
    /// Whatever step fails, the controller is left shut down before the error is returned: the
    /// port bring-up does this itself, and enumeration or media failures are handled here.
    pub fn init(
        platform: P,
        host_config: HostConfig,
        config: MscConfig,
        params: BootParams,
    ) -> Result<Self> {
        let mut host = XusbHost::new(platform, host_config)?;
        host.init(params)?;

        let mut dev = Self::new(host, config);
        let ready = dev.enumerate().and_then(|_| dev.init_media());
        if let Err(e) = ready {
            warn!(%e, "boot device bring-up failed");
            dev.host.shutdown();
            return Err(e);
        }
        Ok(dev)
    }

    /// Runs USB enumeration on the default control pipe.
    pub fn enumerate(&mut self) -> Result<EnumerationInfo> {
        Ok(self.host.enumerate()?)
    }

    /// INQUIRY, then TEST UNIT READY; a ready unit has its capacity read, and a unit that fails
    /// either step has its sense data fetched.
    ///
    /// Only the INQUIRY result is fatal. A medium that stays not-ready is reported through
    /// [`MscDevice::media`] with a zero block length.
    pub fn init_media(&mut self) -> Result<()> {
        self.last_error = None;
        if let Err(e) = self.inquiry() {
            self.last_error = Some(e);
            return Err(e);
        }

        let ready = match self.test_unit_ready() {
            Ok(()) => self.read_capacity().map(|_| ()),
            Err(e) => Err(e),
        };
        let settled = match ready {
            Ok(()) => self.test_unit_ready(),
            Err(e) => {
                debug!(%e, "unit not ready");
                self.request_sense().map(|_| ())
            }
        };
        if let Err(e) = settled {
            debug!(%e, "media settle step failed");
        }
        self.last_error = ready.err().or(settled.err());

        let media = self.media();
        debug!(
            last_lba = media.last_lba,
            block_len = media.block_len,
            peripheral_type = media.peripheral_type,
            sense_key = self.host.status().sense_key,
            "media initialised"
        );
        Ok(())
    }

    pub fn inquiry(&mut self) -> Result<u8> {
        self.execute(ScsiCommand::Inquiry)?;
        Ok(self.host.status().peripheral_type)
    }

    pub fn test_unit_ready(&mut self) -> Result<()> {
        self.execute(ScsiCommand::TestUnitReady)
    }

    /// Returns the sense key and records it in the status.
    pub fn request_sense(&mut self) -> Result<u8> {
        self.execute(ScsiCommand::RequestSense)?;
        Ok(self.host.status().sense_key)
    }

    /// Returns `(last_lba, block_len)`.
    pub fn read_capacity(&mut self) -> Result<(u32, u32)> {
        self.execute(ScsiCommand::ReadCapacity10)?;
        let s = self.host.status();
        Ok((s.last_lba, s.block_len))
    }

    /// Returns `(num_blocks, block_len)` of the current-capacity descriptor.
    pub fn read_format_capacity(&mut self) -> Result<(u32, u32)> {
        self.execute(ScsiCommand::ReadFormatCapacity)?;
        let s = self.host.status();
        Ok((s.num_blocks, s.block_len))
    }

    pub fn media(&self) -> MediaInfo {
        let s = self.host.status();
        MediaInfo {
            last_lba: s.last_lba,
            block_len: s.block_len,
            num_blocks: s.num_blocks,
            peripheral_type: s.peripheral_type,
        }
    }

    pub(crate) fn block_len(&self) -> Result<u32> {
        match self.host.status().block_len {
            0 => Err(MscError::NoMedia),
            n => Ok(n),
        }
    }

    /// Error of the most recent media initialisation or page read/write, `None` if it succeeded.
    ///
    /// Unlike [`Usb3Status::last_error`] this is not overwritten by the REQUEST SENSE issued
    /// after a failed page transfer.
    pub fn last_error(&self) -> Option<MscError> {
        self.last_error
    }

    pub fn status(&self) -> &Usb3Status {
        self.host.status()
    }

    pub fn enumeration(&self) -> &EnumerationInfo {
        self.host.enumeration()
    }

    pub fn config(&self) -> &MscConfig {
        &self.config
    }

    pub fn host(&self) -> &XusbHost<P> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut XusbHost<P> {
        &mut self.host
    }

    pub(crate) fn next_tag(&mut self) -> u32 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    /// Shuts the controller down and hands the platform back.
    pub fn deinit(self) -> P {
        self.host.deinit()
    }
}

impl<P: XusbPlatform> Delay for MscDevice<P> {
    fn delay_us(&mut self, us: u32) {
        self.host.delay_us(us);
    }
}
