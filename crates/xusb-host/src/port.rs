//! Root-port mapping, controller bring-up and teardown.

use tracing::{debug, warn};

use crate::config::{budget, BootParams};
use crate::error::{Result, XusbError};
use crate::host::XusbHost;
use crate::platform::{ClockGate, ResetLine, XusbPlatform};
use crate::regs::{self, cfg, csb, pls_cntrl, pls_status, PortSc1, PortSc2, PortSc3};
use crate::retry::poll_until;

/// Boot-port numbers as strapped in the fuses.
pub mod boot_port {
    pub const OTG0: u8 = 0;
    pub const OTG1: u8 = 1;
    pub const ULPI: u8 = 7;
    pub const HSIC0: u8 = 9;
    pub const HSIC1: u8 = 10;
}

const RESERVED: u8 = 0x0f;

/// Boot port → controller port. Reserved entries have no controller port.
const BOOT_PORT_MAP: [u8; 11] = [
    0, 1, RESERVED, RESERVED, RESERVED, RESERVED, RESERVED, 2, RESERVED, 3, 4,
];

/// Over-current pins that are not routed to the controller.
const OC_PIN_UNROUTED: [u8; 2] = [6, 7];

/// A controller port reached through a boot-port number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerPort {
    boot_port: u8,
    index: u8,
}

impl ControllerPort {
    pub fn from_boot_port(boot_port: u8) -> Result<Self> {
        match BOOT_PORT_MAP.get(usize::from(boot_port)) {
            Some(&index) if index != RESERVED => Ok(Self { boot_port, index }),
            _ => Err(XusbError::UnsupportedPort(boot_port)),
        }
    }

    pub fn boot_port(self) -> u8 {
        self.boot_port
    }

    pub fn index(self) -> u8 {
        self.index
    }

    /// Offset added to the per-port CSB registers.
    pub fn reg_offset(self) -> u32 {
        u32::from(self.index) * regs::PORT_STRIDE
    }

    /// OTG ports have their VBUS switched by the driver.
    pub fn is_otg(self) -> bool {
        matches!(self.boot_port, boot_port::OTG0 | boot_port::OTG1)
    }
}

impl<P: XusbPlatform> XusbHost<P> {
    fn write_link_state(&mut self, reg: u32, state: u32) {
        self.csb_update(reg, |v| {
            (v & !pls_cntrl::MASK) | (state & pls_cntrl::MASK) | PortSc1::PLS_VALID.bits()
        });
    }

    fn port_status(&mut self, port: ControllerPort) -> u32 {
        self.csb_read(csb::HSPI_PVTPORTSC3 + port.reg_offset())
    }

    /// Reads the current-connect status of `port`.
    pub fn is_attached(&mut self, port: ControllerPort) -> bool {
        PortSc3::from_bits_truncate(self.port_status(port)).contains(PortSc3::CCS)
    }

    /// Puts the port into a known state before the controller is brought up: VBUS off for OTG
    /// ports, link reset for ULPI and HSIC ports.
    pub fn reset_port(&mut self, port: ControllerPort) {
        if port.is_otg() {
            let vbus = self.boot_params().vbus_enable;
            self.platform_mut().set_vbus(vbus, false);
        } else {
            let off = port.reg_offset();
            self.write_link_state(csb::FSPI_PVTPORTSC1 + off, pls_cntrl::RESET);
            self.write_link_state(csb::HSPI_PVTPORTSC1 + off, pls_cntrl::RESET);
        }
    }

    fn init_clocks_and_fpci(&mut self, params: &BootParams) {
        let p = self.platform_mut();
        p.set_clock(ClockGate::Xusb, true);
        p.set_clock(ClockGate::Host, true);
        p.configure_clock_divider(params.clock_divider);
        p.set_reset(ResetLine::Host, false);
        p.enable_fpci();

        self.cfg_write(cfg::CFG_4, cfg::CFG_4_BAR0);
        let v = self.cfg_read(cfg::CFG_1);
        self.cfg_write(cfg::CFG_1, v | cfg::CFG_1_MEMORY_SPACE | cfg::CFG_1_BUS_MASTER);

        self.csb_write(csb::HS_BI_WORKQ_DWRD3, 0);
        self.csb_write(csb::HS_BI_WORKQ_DWRD4, 0);
    }

    /// Drives the attached device through disconnect, connect detection and a bus reset.
    fn device_port_init(&mut self, port: ControllerPort) -> Result<()> {
        let off = port.reg_offset();
        self.csb_update(csb::ARU_CTRL, |v| v | regs::ARU_CTRL_MFCOUNT_RUN);

        self.write_link_state(csb::HSPI_PVTPORTSC1 + off, pls_cntrl::DISCONNECTED);
        self.write_link_state(csb::FSPI_PVTPORTSC1 + off, pls_cntrl::DISCONNECTED);

        let connected = poll_until(
            self,
            budget::CONTROLLER_HW_RETRIES_2000,
            budget::TIMEOUT_10US,
            |h| h.is_attached(port).then_some(()),
        );
        if connected.is_none() {
            return Err(XusbError::NotAttached);
        }

        self.csb_write(csb::HSPI_PVTPORTSC2 + off, PortSc2::CSC.bits());
        self.platform_mut().delay_us(budget::TIMEOUT_100MS);

        self.write_link_state(csb::FSPI_PVTPORTSC1 + off, pls_cntrl::RESET);
        self.write_link_state(csb::HSPI_PVTPORTSC1 + off, pls_cntrl::RESET);
        self.platform_mut().delay_us(budget::TIMEOUT_50MS);

        let enabled = poll_until(
            self,
            budget::CONTROLLER_HW_RETRIES_2000,
            budget::TIMEOUT_1MS,
            |h| {
                let pls = h.port_status(port) & pls_status::MASK;
                matches!(pls, pls_status::ENABLED | pls_status::FS_MODE).then_some(pls)
            },
        );
        let Some(pls) = enabled else {
            return Err(XusbError::PortResetTimeout);
        };
        debug!(port = port.index(), pls, "port enabled");
        self.platform_mut().delay_us(budget::TIMEOUT_10MS);
        Ok(())
    }

    /// Brings the controller out of reset and resets the device on the boot port.
    ///
    /// If the port never reports a connection ([`XusbError::NotAttached`]) or its reset never
    /// completes ([`XusbError::PortResetTimeout`]) the controller is shut down again before the
    /// error is returned.
    pub fn init(&mut self, params: BootParams) -> Result<()> {
        let port = ControllerPort::from_boot_port(params.root_port)?;
        self.set_boot_params(params, port.index());
        self.reset_port(port);

        let p = self.platform_mut();
        if !OC_PIN_UNROUTED.contains(&params.oc_pin) {
            p.configure_oc_pin(params.oc_pin);
        }
        p.configure_vbus_pad(params.vbus_enable);
        p.set_reset(ResetLine::Xusb, false);
        p.init_port_pads(port.index());

        self.init_clocks_and_fpci(&params);
        self.platform_mut().set_vbus(params.vbus_enable, true);
        self.platform_mut().delay_us(budget::TIMEOUT_100MS);

        let result = self.device_port_init(port);
        if let Err(e) = result {
            warn!(port = port.index(), %e, "root port bring-up failed");
            self.shutdown();
        }
        result
    }

    /// Returns the controller to reset with its clocks gated.
    pub fn shutdown(&mut self) {
        let p = self.platform_mut();
        p.set_reset(ResetLine::Host, true);
        p.set_clock(ClockGate::Host, false);
        p.set_clock(ClockGate::Xusb, false);
        p.set_reset(ResetLine::Xusb, true);
    }

    /// Shuts the controller down and hands the platform back.
    pub fn deinit(mut self) -> P {
        self.shutdown();
        self.into_platform()
    }
}
