#![allow(dead_code)]

use tracing_subscriber::EnvFilter;
use xusb_host::retry::RetryPolicy;
use xusb_host::{BootParams, HostConfig, XusbHost};
use xusb_sim::{SimMassStorage, SimXusb};

pub const CONTEXT_BASE: u64 = 0x8000_0000;
pub const BULK_BUFFER_LEN: usize = 0x8000;

pub type SimHost = XusbHost<SimXusb<SimMassStorage>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small poll budgets so that fault tests give up quickly.
pub fn test_config() -> HostConfig {
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
    SimMassStorage::new(256, 512)
}

/// A host constructed over a simulated controller, not yet initialised.
pub fn new_host(dev: SimMassStorage) -> SimHost {
    init_tracing();
    let cfg = test_config();
    XusbHost::new(SimXusb::new(dev, &cfg), cfg).unwrap()
}

/// Controller up and the root port reset, ready for enumeration.
pub fn ready_host(dev: SimMassStorage) -> SimHost {
    let mut host = new_host(dev);
    host.init(boot_params()).unwrap();
    host
}

pub fn enumerated_host(dev: SimMassStorage) -> SimHost {
    let mut host = ready_host(dev);
    host.enumerate().unwrap();
    host
}
