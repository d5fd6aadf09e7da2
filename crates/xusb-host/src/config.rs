//! Driver configuration and bring-up parameters.

use crate::retry::RetryPolicy;

/// Poll budgets and delays, expressed in delay steps.
///
/// These are upper bounds on busy-wait loops. The controller is expected to finish far earlier;
/// the budgets only bound how long a wedged device can stall the boot.
pub mod budget {
    pub const TIMEOUT_1US: u32 = 1;
    pub const TIMEOUT_10US: u32 = 10;
    pub const TIMEOUT_1MS: u32 = 1_000;
    pub const TIMEOUT_10MS: u32 = 10_000;
    pub const TIMEOUT_50MS: u32 = 50_000;
    pub const TIMEOUT_100MS: u32 = 100_000;
    pub const TIMEOUT_1S: u32 = 1_000_000;

    /// Iterations of a 1 µs poll that add up to one second.
    pub const CONTROLLER_HW_RETRIES_1SEC: u32 = 1_000_000;
    /// Iterations used by the port connect/reset polls.
    pub const CONTROLLER_HW_RETRIES_2000: u32 = 2_000;
    pub const CONTROLLER_HW_RETRIES_100: u32 = 100;

    /// Attempts made for one control request or one BOT command before giving up.
    pub const USB_MAX_TXFR_RETRIES: u32 = 3;
}

/// Host-side tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostConfig {
    /// Physical base of the context memory region. Must be 256-byte aligned.
    pub context_base: u64,
    /// Size of the bulk page buffer that follows the fixed context regions.
    pub bulk_buffer_len: usize,
    /// Delay between the work-queue write and the first completion poll.
    pub settle_us: u32,
    /// Iterations of the 1 µs endpoint-status and completion-valid polls.
    pub completion_polls: u32,
    /// Iterations of the 10 µs not-ready re-poll.
    pub not_ready_polls: u32,
    /// Iterations of the 1 µs event-queue poll.
    pub event_polls: u32,
    /// Retry policy for control requests.
    pub control_retry: RetryPolicy,
}

impl HostConfig {
    pub fn with_context_base(mut self, base: u64) -> Self {
        self.context_base = base;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            context_base: 0x4000_0000,
            bulk_buffer_len: 1 << 20,
            settle_us: budget::TIMEOUT_10US,
            completion_polls: budget::CONTROLLER_HW_RETRIES_1SEC,
            not_ready_polls: budget::CONTROLLER_HW_RETRIES_1SEC,
            event_polls: budget::CONTROLLER_HW_RETRIES_1SEC,
            control_retry: RetryPolicy::new(budget::USB_MAX_TXFR_RETRIES, 0),
        }
    }
}

/// Parameters supplied by fuses/straps for controller bring-up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BootParams {
    /// Host clock divider.
    pub clock_divider: u8,
    /// Boot-port number, translated through [`crate::port::ControllerPort::from_boot_port`].
    pub root_port: u8,
    /// Selects 2 KiB (`false`) or 16 KiB (`true`) boot pages.
    pub page_size_2k_or_16k: bool,
    /// Over-current detect pin. Pins 6 and 7 mean "not routed".
    pub oc_pin: u8,
    /// VBUS enable line index.
    pub vbus_enable: u8,
}
