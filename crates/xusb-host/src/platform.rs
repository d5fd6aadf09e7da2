//! Capabilities the driver consumes from the surrounding boot environment.
//!
//! The driver never touches SoC registers outside the XUSB configuration space directly. Clock,
//! reset, pad and VBUS programming is delegated to [`SocControl`] so the same transfer engine runs
//! against real hardware and against the simulated controller used by the tests.

use crate::regs;
use crate::MemoryBus;

/// Indirect access to the XUSB FPCI configuration space.
pub trait ConfigSpace {
    fn cfg_read(&mut self, offset: u32) -> u32;
    fn cfg_write(&mut self, offset: u32, value: u32);

    /// Moves the CSB window to `page`.
    fn page_select(&mut self, page: u32) {
        self.cfg_write(regs::cfg::ARU_C11_CSBRANGE, page);
    }
}

/// Busy-wait delay source.
pub trait Delay {
    fn delay_us(&mut self, us: u32);

    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1000);
        }
    }
}

/// Reset lines owned by the XUSB block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResetLine {
    /// XUSB host partition.
    Host,
    /// Shared XUSB core (pads and PLL consumers).
    Xusb,
}

/// Clock gates owned by the XUSB block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockGate {
    Host,
    Xusb,
}

/// SoC-level clock, reset, pad and VBUS control.
pub trait SocControl {
    fn set_reset(&mut self, line: ResetLine, asserted: bool);
    fn set_clock(&mut self, gate: ClockGate, enabled: bool);

    /// Programs the host clock source dividers.
    fn configure_clock_divider(&mut self, divider: u8);

    /// Sets `EN_FPCI` in the host configuration register so config-space accesses reach the
    /// controller.
    fn enable_fpci(&mut self);

    /// Routes over-current pin `pin` to the VBUS controller.
    fn configure_oc_pin(&mut self, pin: u8);

    /// Configures the pad driving VBUS enable line `vbus`.
    fn configure_vbus_pad(&mut self, vbus: u8);

    /// Brings up the UTMI/ULPI/HSIC pads of a controller port.
    fn init_port_pads(&mut self, port: u8);

    fn set_vbus(&mut self, vbus: u8, enabled: bool);
}

/// Everything an [`crate::XusbHost`] needs from its environment.
pub trait XusbPlatform: ConfigSpace + MemoryBus + SocControl + Delay {}

impl<T> XusbPlatform for T where T: ConfigSpace + MemoryBus + SocControl + Delay {}
