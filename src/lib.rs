//! Boot-time USB mass-storage access over the XUSB host controller.
//!
//! The work is split across two crates, re-exported here:
//!
//! - [`host`] (`xusb-host`): controller bring-up, the transfer ring and work/completion/event
//!   queues, control transfers and enumeration.
//! - [`msc`] (`xusb-msc`): the bulk-only transport and the SCSI commands used to read boot pages.
//!
//! A boot loader normally only needs [`MscDevice`]:
//!
//! ```ignore
//! let mut disk = MscDevice::init(platform, HostConfig::default(), MscConfig::default(), params)?;
//! disk.read_page(block, page, &mut buf)?;
//! let platform = disk.deinit();
//! ```

pub use xusb_host as host;
pub use xusb_msc as msc;

pub use xusb_host::{BootParams, HostConfig, XusbError, XusbHost, XusbPlatform};
pub use xusb_msc::{MediaInfo, MscConfig, MscDevice, MscError};
