use xusb_host::config::budget;
use xusb_host::retry::RetryPolicy;

/// Boot-media geometry and command retry settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MscConfig {
    /// log2 of the boot page size. A page maps onto one device block.
    pub page_size_log2: u8,
    /// log2 of the boot block size.
    pub block_size_log2: u8,
    /// Attempts and spacing of one BOT command.
    pub command_retry: RetryPolicy,
    /// Attempts and spacing of one page read or write, each a full BOT command.
    pub page_retry: RetryPolicy,
}

impl MscConfig {
    pub fn pages_per_block(&self) -> u32 {
        1u32 << self.block_size_log2.saturating_sub(self.page_size_log2)
    }
}

impl Default for MscConfig {
    fn default() -> Self {
        Self {
            page_size_log2: 9,
            block_size_log2: 14,
            command_retry: RetryPolicy::new(budget::USB_MAX_TXFR_RETRIES, budget::TIMEOUT_1MS),
            page_retry: RetryPolicy::new(budget::USB_MAX_TXFR_RETRIES, budget::TIMEOUT_1MS),
        }
    }
}
