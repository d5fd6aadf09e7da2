#![allow(dead_code)]

use tracing_subscriber::EnvFilter;
use xusb_host::retry::RetryPolicy;
use xusb_host::{BootParams, HostConfig};
use xusb_msc::{MscConfig, MscDevice};
use xusb_sim::{SimMassStorage, SimXusb};

pub const CONTEXT_BASE: u64 = 0x8000_0000;
pub const BULK_BUFFER_LEN: usize = 0x8000;
pub const BLOCK_LEN: u32 = 512;
/// Eight boot blocks of 32 pages.
pub const DISK_BLOCKS: u32 = 256;

pub type SimMsc = MscDevice<SimXusb<SimMassStorage>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn host_config() -> HostConfig {
    HostConfig {
        context_base: CONTEXT_BASE,
        bulk_buffer_len: BULK_BUFFER_LEN,
        settle_us: 10,
        completion_polls: 500,
        not_ready_polls: 50,
        event_polls: 500,
        control_retry: RetryPolicy::new(3, 0),
    }
}

pub fn boot_params() -> BootParams {
    BootParams {
        clock_divider: 4,
        root_port: 0,
        page_size_2k_or_16k: true,
        oc_pin: 6,
        vbus_enable: 1,
    }
}

pub fn disk() -> SimMassStorage {
    SimMassStorage::new(DISK_BLOCKS, BLOCK_LEN)
}

pub fn try_open(dev: SimMassStorage) -> xusb_msc::Result<SimMsc> {
    init_tracing();
    let cfg = host_config();
    MscDevice::init(
        SimXusb::new(dev, &cfg),
        cfg,
        MscConfig::default(),
        boot_params(),
    )
}

/// Controller up, device enumerated and media initialised.
pub fn open(dev: SimMassStorage) -> SimMsc {
    try_open(dev).unwrap()
}

/// Opcodes the device has executed since `start`.
pub fn commands_since(msc: &SimMsc, start: usize) -> Vec<u8> {
    msc.host().platform().device().commands()[start..].to_vec()
}

/// Deterministic fill pattern for page data.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
