//! XUSB register offsets and bit definitions.
//!
//! Two address spaces are involved:
//!
//! - the FPCI configuration space, accessed directly through [`crate::ConfigSpace`],
//! - the controller's internal CSB register space, which is only reachable through a 512-byte
//!   window in configuration space. The window is moved by writing the page number to
//!   [`cfg::ARU_C11_CSBRANGE`]; [`CsbWindow`] caches the selected page so consecutive accesses to
//!   the same page cost one config-space access each.
//!
//! Only the registers the boot driver touches are listed here.

use bitflags::bitflags;

use crate::platform::ConfigSpace;

/// FPCI configuration-space offsets.
pub mod cfg {
    /// XUSB_CFG_1: command register (IO/memory space enable, bus master).
    pub const CFG_1: u32 = 0x04;
    pub const CFG_1_MEMORY_SPACE: u32 = 1 << 1;
    pub const CFG_1_BUS_MASTER: u32 = 1 << 2;

    /// XUSB_CFG_4: BAR0. Bits 0..=14 are read-only.
    pub const CFG_4: u32 = 0x10;
    /// Value programmed into BAR0 during bring-up.
    pub const CFG_4_BAR0: u32 = 0x7009_0000;

    /// Page select register for the CSB window.
    pub const ARU_C11_CSBRANGE: u32 = 0x41c;
    /// Base of the 512-byte CSB window.
    pub const CSB_ADDR: u32 = 0x800;
}

/// Size of one CSB page as exposed through the config-space window.
pub const CSB_PAGE_SIZE: u32 = 0x200;

/// CSB register addresses.
pub mod csb {
    /// Frame counter and controller run control.
    pub const ARU_CTRL: u32 = 0x10_0100;

    pub const EVENTQ_CNTRL1: u32 = 0x10_2004;
    pub const EVENTQ_TRBDWRD0: u32 = 0x10_2010;
    pub const EVENTQ_TRBDWRD1: u32 = 0x10_2014;
    pub const EVENTQ_TRBDWRD2: u32 = 0x10_2018;
    pub const EVENTQ_TRBDWRD3: u32 = 0x10_201c;

    pub const HS_BI_WORKQ_DWRD0: u32 = 0x11_0000;
    pub const HS_BI_WORKQ_DWRD1: u32 = 0x11_0004;
    pub const HS_BI_WORKQ_DWRD2: u32 = 0x11_0008;
    pub const HS_BI_WORKQ_DWRD3: u32 = 0x11_000c;
    pub const HS_BI_WORKQ_DWRD4: u32 = 0x11_0010;

    pub const HS_BI_COMPLQ_CNTRL: u32 = 0x11_0080;
    pub const HS_BI_COMPLQ_DWRD0: u32 = 0x11_0084;

    /// Full-speed port control, instance 0. Further instances are [`super::PORT_STRIDE`] apart.
    pub const FSPI_PVTPORTSC1: u32 = 0x12_0000;

    /// High-speed port control/status, instance 0.
    pub const HSPI_PVTPORTSC1: u32 = 0x13_0000;
    pub const HSPI_PVTPORTSC2: u32 = 0x13_0004;
    pub const HSPI_PVTPORTSC3: u32 = 0x13_0008;
}

/// Byte distance between consecutive port register instances.
pub const PORT_STRIDE: u32 = 0x10;

/// `WORKQ_DWRD0.KIND` value for a bulk/control endpoint-list submission.
pub const WORKQ_KIND_EPTLIST_BULK_INOUT: u32 = 0x0000_0005;

/// `ARU_CTRL.MFCOUNT` run bit.
pub const ARU_CTRL_MFCOUNT_RUN: u32 = 1 << 0;

bitflags! {
    /// Control bits shared by `HS_BI_COMPLQ_CNTRL` and `EVENTQ_CNTRL1`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct QueueCntrl: u32 {
        /// An entry is available at the head of the queue.
        const VALID = 1 << 0;
        /// Write 1 to remove the head entry.
        const POP = 1 << 1;
    }
}

/// `HS_BI_COMPLQ_DWRD0.SUBKIND` (bits 0..=3).
pub mod subkind {
    pub const MASK: u32 = 0x0f;
    pub const NO_ACTIVITY: u32 = 0;
    pub const EPT_DONE: u32 = 1;
    pub const EPT_ERROR: u32 = 2;
    pub const EPT_NRDY: u32 = 3;
    pub const OP_ERROR: u32 = 4;
    pub const STOPREQ: u32 = 5;
}

/// Endpoint-context completion status values (endpoint context DW6 bits 0..=3).
pub mod ep_status {
    pub const NONE: u8 = 0;
    pub const COMPL_RETIRE: u8 = 1;
    pub const ERR_STALL: u8 = 2;
    pub const ERR_BABBLE: u8 = 3;
    pub const ERR_TRANS: u8 = 4;
    /// First reschedule status. Values at or above this mean the transfer is still in flight.
    pub const RESCH_CSW: u8 = 5;
    pub const RESCH_DATA: u8 = 6;
}

bitflags! {
    /// `HSPI_PVTPORTSC1` / `FSPI_PVTPORTSC1` control bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PortSc1: u32 {
        /// Latches the `PLS_CNTRL` field.
        const PLS_VALID = 1 << 4;
    }
}

/// `PVTPORTSC1.PLS_CNTRL` field (bits 0..=3).
pub mod pls_cntrl {
    pub const MASK: u32 = 0x0f;
    pub const DISCONNECTED: u32 = 0x4;
    pub const RESET: u32 = 0x5;
}

bitflags! {
    /// `HSPI_PVTPORTSC2` status bits (write 1 to clear).
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PortSc2: u32 {
        /// Connect status change.
        const CSC = 1 << 0;
    }
}

bitflags! {
    /// `HSPI_PVTPORTSC3` status bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PortSc3: u32 {
        /// Current connect status.
        const CCS = 1 << 8;
    }
}

/// `HSPI_PVTPORTSC3.PLS_STATUS` field (bits 0..=3).
pub mod pls_status {
    pub const MASK: u32 = 0x0f;
    pub const DISABLED: u32 = 0x0;
    pub const ENABLED: u32 = 0x1;
    pub const FS_MODE: u32 = 0x2;
    pub const RESET: u32 = 0x5;
}

/// Splits a CSB address into `(page, offset)` for the config-space window.
pub const fn csb_split(addr: u32) -> (u32, u32) {
    (addr / CSB_PAGE_SIZE, addr % CSB_PAGE_SIZE)
}

/// Paged access to CSB registers.
///
/// The currently selected page is cached; `None` means nothing has been selected yet, so the
/// first access always programs `ARU_C11_CSBRANGE`.
#[derive(Debug, Default, Clone)]
pub struct CsbWindow {
    page: Option<u32>,
}

impl CsbWindow {
    pub const fn new() -> Self {
        Self { page: None }
    }

    pub fn current_page(&self) -> Option<u32> {
        self.page
    }

    /// Forgets the cached page, forcing the next access to reprogram the window.
    pub fn invalidate(&mut self) {
        self.page = None;
    }

    fn select(&mut self, bus: &mut (impl ConfigSpace + ?Sized), addr: u32) -> u32 {
        let (page, offset) = csb_split(addr);
        if self.page != Some(page) {
            bus.page_select(page);
            self.page = Some(page);
        }
        cfg::CSB_ADDR + offset
    }

    pub fn read(&mut self, bus: &mut (impl ConfigSpace + ?Sized), addr: u32) -> u32 {
        let off = self.select(bus, addr);
        bus.cfg_read(off)
    }

    pub fn write(&mut self, bus: &mut (impl ConfigSpace + ?Sized), addr: u32, value: u32) {
        let off = self.select(bus, addr);
        bus.cfg_write(off, value);
    }

    /// Read-modify-write helper.
    pub fn update(
        &mut self,
        bus: &mut (impl ConfigSpace + ?Sized),
        addr: u32,
        f: impl FnOnce(u32) -> u32,
    ) {
        let value = self.read(bus, addr);
        self.write(bus, addr, f(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingConfig {
        page_writes: Vec<u32>,
        last_read: Option<u32>,
    }

    impl ConfigSpace for RecordingConfig {
        fn cfg_read(&mut self, offset: u32) -> u32 {
            self.last_read = Some(offset);
            0
        }

        fn cfg_write(&mut self, offset: u32, value: u32) {
            if offset == cfg::ARU_C11_CSBRANGE {
                self.page_writes.push(value);
            }
        }
    }

    #[test]
    fn csb_split_uses_512_byte_pages() {
        assert_eq!(csb_split(0x11_0084), (0x880, 0x84));
        assert_eq!(csb_split(0x1ff), (0, 0x1ff));
        assert_eq!(csb_split(0x200), (1, 0));
    }

    #[test]
    fn page_is_programmed_only_when_it_changes() {
        let mut bus = RecordingConfig::default();
        let mut win = CsbWindow::new();

        win.read(&mut bus, csb::HS_BI_COMPLQ_CNTRL);
        win.read(&mut bus, csb::HS_BI_COMPLQ_DWRD0);
        assert_eq!(bus.page_writes, vec![0x880]);
        assert_eq!(bus.last_read, Some(cfg::CSB_ADDR + 0x84));

        win.read(&mut bus, csb::EVENTQ_CNTRL1);
        assert_eq!(bus.page_writes, vec![0x880, 0x810]);

        win.invalidate();
        win.read(&mut bus, csb::EVENTQ_CNTRL1);
        assert_eq!(bus.page_writes, vec![0x880, 0x810, 0x810]);
    }
}
