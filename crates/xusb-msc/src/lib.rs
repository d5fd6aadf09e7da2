//! USB mass-storage (bulk-only transport) client for the XUSB boot driver.
//!
//! [`MscDevice`] sits on top of an [`xusb_host::XusbHost`] and speaks the SCSI subset a boot
//! loader needs: INQUIRY, TEST UNIT READY, REQUEST SENSE, the two capacity commands, READ(10)
//! and WRITE(10). Each command is one `CBW → data → CSW` exchange on the device's bulk pipes,
//! retried on transient failures; stalls and phase errors clear the halted endpoint before they
//! are reported.

pub mod bot;
pub mod cbw;
pub mod config;
pub mod device;
pub mod error;
pub mod page_io;
pub mod scsi;

pub use cbw::{Cbw, Csw, CswStatus};
pub use config::MscConfig;
pub use device::{MediaInfo, MscDevice};
pub use error::{MscError, Result};
pub use page_io::page_lba;
pub use scsi::ScsiCommand;
