//! Polling-mode driver for the XUSB host controller as seen by a boot loader.
//!
//! The controller is driven through a single scratch endpoint context that lives in DMA-visible
//! memory, a 16-slot transfer ring that is rewound after every submission (one Normal TRB or the
//! up to three stages of a control request, then an end marker) and three hardware queues
//! reached through the paged CSB register window:
//!
//! - the **work queue**, written once per submission with a pointer to the endpoint context,
//! - the **completion queue**, which reports a sub-kind for every finished submission,
//! - the **event queue**, which carries a transfer event TRB with a detailed completion code when
//!   the completion queue reports an endpoint error.
//!
//! There are no interrupts and no allocations on the transfer path. Every wait is a bounded
//! busy-poll expressed through [`retry::poll_until`] / [`retry::retry`].
//!
//! The [`XusbHost`] handle owns the platform (register window, DMA memory, SoC clock/reset
//! control and delay source) by value, which makes it the only way to reach the endpoint context
//! while the driver is live.

pub mod completion;
pub mod config;
pub mod context;
pub mod control;
pub mod descriptor;
pub mod enumeration;
pub mod error;
pub mod host;
pub mod memory;
pub mod platform;
pub mod port;
pub mod regs;
pub mod retry;
pub mod ring;
pub mod status;
pub mod trb;

pub use completion::{Completion, ErrorClass, SequenceNumbers};
pub use config::{BootParams, HostConfig};
pub use context::{EndpointKind, EndpointState, EndpointType};
pub use control::DeviceRequest;
pub use descriptor::BulkEndpoint;
pub use enumeration::EnumerationInfo;
pub use error::{Result, XusbError};
pub use host::XusbHost;
pub use memory::ContextLayout;
pub use platform::{ClockGate, ConfigSpace, Delay, ResetLine, SocControl, XusbPlatform};
pub use port::ControllerPort;
pub use status::{DriverPhase, Usb3Status};

/// DMA-visible memory shared with the controller.
///
/// Addresses are physical addresses as seen by the controller. Implementations used on real
/// hardware are plain volatile copies; the simulated controller backs them with a byte vector.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    fn read_u32(&mut self, paddr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_u32(&mut self, paddr: u64, value: u32) {
        self.write_physical(paddr, &value.to_le_bytes());
    }

    /// Fills `len` bytes at `paddr` with `value`.
    fn fill_physical(&mut self, paddr: u64, len: usize, value: u8) {
        let chunk = [value; 64];
        let mut off = 0usize;
        while off < len {
            let n = (len - off).min(chunk.len());
            self.write_physical(paddr + off as u64, &chunk[..n]);
            off += n;
        }
    }
}
