//! A software model of the XUSB host controller and of a bulk-only mass-storage device.
//!
//! [`SimXusb`] implements every platform trait the driver consumes. It decodes the paged CSB
//! window, executes the transfer ring referenced by the endpoint context whenever the work queue is
//! posted, and reports the outcome through the endpoint-context status, the completion queue and
//! the event queue the same way the hardware does. Faults can be queued per submission.
//!
//! The attached device is any [`SimDevice`]; [`SimMassStorage`] is a RAM disk speaking BOT and the
//! small SCSI subset the boot driver issues.

mod controller;
mod device;
mod mass_storage;

pub use controller::{Fault, SimTransfer, SimXusb, SocEvent};
pub use device::{ControlResponse, SimDevice, UsbInResult, UsbOutResult};
pub use mass_storage::{CswFault, SimMassStorage, BULK_IN_EP, BULK_OUT_EP, INTERFACE_NUMBER};
