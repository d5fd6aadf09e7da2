//! Endpoint context used by the boot interface (64 bytes / 16 dwords).
//!
//! The boot interface exposes a single endpoint context that the controller reads when a work
//! queue entry is submitted and writes back with the completion status and the updated sequence
//! number. The first four dwords follow the xHCI endpoint context layout; the remaining dwords
//! are controller specific (routing, device address, endpoint link).

use crate::MemoryBus;

/// Size of the endpoint context in bytes.
pub const EP_CONTEXT_SIZE: usize = 64;
/// Number of 32-bit dwords in the endpoint context.
pub const EP_CONTEXT_DWORDS: usize = 16;

/// Endpoint type (xHCI Endpoint Context EP Type field).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointType {
    Invalid,
    IsochOut,
    BulkOut,
    InterruptOut,
    Control,
    IsochIn,
    BulkIn,
    InterruptIn,
}

impl EndpointType {
    pub const fn from_raw(raw: u8) -> Self {
        match raw & 0x07 {
            0 => EndpointType::Invalid,
            1 => EndpointType::IsochOut,
            2 => EndpointType::BulkOut,
            3 => EndpointType::InterruptOut,
            4 => EndpointType::Control,
            5 => EndpointType::IsochIn,
            6 => EndpointType::BulkIn,
            _ => EndpointType::InterruptIn,
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            EndpointType::Invalid => 0,
            EndpointType::IsochOut => 1,
            EndpointType::BulkOut => 2,
            EndpointType::InterruptOut => 3,
            EndpointType::Control => 4,
            EndpointType::IsochIn => 5,
            EndpointType::BulkIn => 6,
            EndpointType::InterruptIn => 7,
        }
    }
}

/// Endpoint state (DW0 bits 0..=2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointState {
    Disabled,
    Running,
    Halted,
    Stopped,
    Error,
    /// Any reserved/unknown state value (3-bit field).
    Reserved(u8),
}

impl EndpointState {
    pub const fn from_raw(raw: u8) -> Self {
        match raw & 0x07 {
            0 => EndpointState::Disabled,
            1 => EndpointState::Running,
            2 => EndpointState::Halted,
            3 => EndpointState::Stopped,
            4 => EndpointState::Error,
            other => EndpointState::Reserved(other),
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            EndpointState::Disabled => 0,
            EndpointState::Running => 1,
            EndpointState::Halted => 2,
            EndpointState::Stopped => 3,
            EndpointState::Error => 4,
            EndpointState::Reserved(v) => v & 0x07,
        }
    }
}

/// The three endpoint roles the shared context can take on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Control,
    BulkIn,
    BulkOut,
}

impl EndpointKind {
    pub const fn endpoint_type(self) -> EndpointType {
        match self {
            EndpointKind::Control => EndpointType::Control,
            EndpointKind::BulkIn => EndpointType::BulkIn,
            EndpointKind::BulkOut => EndpointType::BulkOut,
        }
    }

    pub const fn from_endpoint_type(ty: EndpointType) -> Option<Self> {
        match ty {
            EndpointType::Control => Some(EndpointKind::Control),
            EndpointType::BulkIn => Some(EndpointKind::BulkIn),
            EndpointType::BulkOut => Some(EndpointKind::BulkOut),
            _ => None,
        }
    }
}

/// Port speed (DW12 bits 0..=3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speed {
    Full,
    Low,
    High,
    Super,
}

impl Speed {
    pub const fn raw(self) -> u8 {
        match self {
            Speed::Full => 1,
            Speed::Low => 2,
            Speed::High => 3,
            Speed::Super => 4,
        }
    }
}

/// Interval encoding for a 1 ms service interval.
pub const INTERVAL_1MS: u8 = 3;
/// Error count loaded into CErr / CErrCnt.
pub const DEFAULT_ERROR_COUNT: u8 = 3;

const fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndpointContext {
    dwords: [u32; EP_CONTEXT_DWORDS],
}

impl EndpointContext {
    pub fn read_from(mem: &mut (impl MemoryBus + ?Sized), paddr: u64) -> Self {
        let mut raw = [0u8; EP_CONTEXT_SIZE];
        mem.read_physical(paddr, &mut raw);
        let mut dwords = [0u32; EP_CONTEXT_DWORDS];
        for (i, dword) in dwords.iter_mut().enumerate() {
            let off = i * 4;
            *dword = u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
        }
        Self { dwords }
    }

    pub fn write_to(&self, mem: &mut (impl MemoryBus + ?Sized), paddr: u64) {
        let mut raw = [0u8; EP_CONTEXT_SIZE];
        for (i, dword) in self.dwords.iter().enumerate() {
            raw[i * 4..i * 4 + 4].copy_from_slice(&dword.to_le_bytes());
        }
        mem.write_physical(paddr, &raw);
    }

    pub fn dword(&self, index: usize) -> u32 {
        self.dwords.get(index).copied().unwrap_or(0)
    }

    pub fn set_dword(&mut self, index: usize, value: u32) {
        if let Some(dw) = self.dwords.get_mut(index) {
            *dw = value;
        }
    }

    fn field(&self, dw: usize, shift: u32, width: u32) -> u32 {
        (self.dwords[dw] >> shift) & mask(width)
    }

    fn set_field(&mut self, dw: usize, shift: u32, width: u32, value: u32) {
        let m = mask(width) << shift;
        self.dwords[dw] = (self.dwords[dw] & !m) | ((value << shift) & m);
    }

    /// Endpoint State field (DW0 bits 0..=2).
    pub fn endpoint_state(&self) -> EndpointState {
        EndpointState::from_raw(self.field(0, 0, 3) as u8)
    }

    pub fn set_endpoint_state(&mut self, state: EndpointState) {
        self.set_field(0, 0, 3, u32::from(state.raw()));
    }

    /// Interval field (DW0 bits 16..=23).
    pub fn interval(&self) -> u8 {
        self.field(0, 16, 8) as u8
    }

    pub fn set_interval(&mut self, interval: u8) {
        self.set_field(0, 16, 8, u32::from(interval));
    }

    /// Error Count field (DW1 bits 1..=2).
    pub fn cerr(&self) -> u8 {
        self.field(1, 1, 2) as u8
    }

    pub fn set_cerr(&mut self, cerr: u8) {
        self.set_field(1, 1, 2, u32::from(cerr));
    }

    /// Endpoint Type field (DW1 bits 3..=5).
    pub fn endpoint_type(&self) -> EndpointType {
        EndpointType::from_raw(self.field(1, 3, 3) as u8)
    }

    pub fn set_endpoint_type(&mut self, ty: EndpointType) {
        self.set_field(1, 3, 3, u32::from(ty.raw()));
    }

    /// Max Burst Size field (DW1 bits 8..=15).
    pub fn max_burst(&self) -> u8 {
        self.field(1, 8, 8) as u8
    }

    pub fn set_max_burst(&mut self, burst: u8) {
        self.set_field(1, 8, 8, u32::from(burst));
    }

    /// Max Packet Size field (DW1 bits 16..=31).
    pub fn max_packet_size(&self) -> u16 {
        self.field(1, 16, 16) as u16
    }

    pub fn set_max_packet_size(&mut self, mps: u16) {
        self.set_field(1, 16, 16, u32::from(mps));
    }

    /// Dequeue Cycle State (DW2 bit 0).
    pub fn dcs(&self) -> bool {
        self.field(2, 0, 1) != 0
    }

    /// Transfer Ring Dequeue Pointer, 16-byte aligned (DW2 bits 4..=31, DW3).
    pub fn tr_dequeue_pointer(&self) -> u64 {
        (u64::from(self.dwords[3]) << 32) | u64::from(self.dwords[2] & !0x0f)
    }

    /// Sets the dequeue pointer and DCS bit.
    pub fn set_tr_dequeue_pointer(&mut self, ptr: u64, dcs: bool) {
        self.dwords[2] = (ptr as u32 & !0x0f) | u32::from(dcs);
        self.dwords[3] = (ptr >> 32) as u32;
    }

    /// Average TRB Length (DW4 bits 0..=15).
    pub fn average_trb_len(&self) -> u16 {
        self.field(4, 0, 16) as u16
    }

    pub fn set_average_trb_len(&mut self, len: u16) {
        self.set_field(4, 0, 16, u32::from(len));
    }

    /// Bulk sequence number (DW5 bits 0..=4).
    pub fn seq_num(&self) -> u8 {
        self.field(5, 0, 5) as u8
    }

    pub fn set_seq_num(&mut self, seq: u8) {
        self.set_field(5, 0, 5, u32::from(seq));
    }

    /// Completion status written by the controller (DW6 bits 0..=3).
    ///
    /// See [`crate::regs::ep_status`] for the encoding.
    pub fn status(&self) -> u8 {
        self.field(6, 0, 4) as u8
    }

    pub fn set_status(&mut self, status: u8) {
        self.set_field(6, 0, 4, u32::from(status));
    }

    /// Remaining error count (DW6 bits 8..=9).
    pub fn cerr_count(&self) -> u8 {
        self.field(6, 8, 2) as u8
    }

    pub fn set_cerr_count(&mut self, count: u8) {
        self.set_field(6, 8, 2, u32::from(count));
    }

    /// Data offset into the current TRB (DW7 bits 0..=16).
    pub fn data_offset(&self) -> u32 {
        self.field(7, 0, 17)
    }

    pub fn set_data_offset(&mut self, off: u32) {
        self.set_field(7, 0, 17, off);
    }

    /// Number of packets (DW7 bits 24..=28).
    pub fn num_packets(&self) -> u8 {
        self.field(7, 24, 5) as u8
    }

    pub fn set_num_packets(&mut self, n: u8) {
        self.set_field(7, 24, 5, u32::from(n));
    }

    /// Transaction/data link management bits (DW10 bits 0 and 1).
    pub fn set_link_management(&mut self, tlm: bool, dlm: bool) {
        self.set_field(10, 0, 1, u32::from(tlm));
        self.set_field(10, 1, 1, u32::from(dlm));
    }

    /// Set-address in progress flag (DW10 bit 4).
    ///
    /// While set, the controller targets address 0 regardless of the device address field.
    pub fn fw_set_address(&self) -> bool {
        self.field(10, 4, 1) != 0
    }

    pub fn set_fw_set_address(&mut self, on: bool) {
        self.set_field(10, 4, 1, u32::from(on));
    }

    /// USB device address (DW11 bits 0..=6).
    pub fn device_address(&self) -> u8 {
        self.field(11, 0, 7) as u8
    }

    pub fn set_device_address(&mut self, addr: u8) {
        self.set_field(11, 0, 7, u32::from(addr));
    }

    /// Parent hub address (DW11 bits 8..=14).
    pub fn hub_address(&self) -> u8 {
        self.field(11, 8, 7) as u8
    }

    pub fn set_hub_address(&mut self, addr: u8) {
        self.set_field(11, 8, 7, u32::from(addr));
    }

    /// Root port number (DW11 bits 16..=23).
    pub fn root_port(&self) -> u8 {
        self.field(11, 16, 8) as u8
    }

    pub fn set_root_port(&mut self, port: u8) {
        self.set_field(11, 16, 8, u32::from(port));
    }

    /// Port speed (DW12 bits 0..=3).
    pub fn speed(&self) -> u8 {
        self.field(12, 0, 4) as u8
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.set_field(12, 0, 4, u32::from(speed.raw()));
    }

    /// Device Context Index (DW12 bits 8..=12).
    pub fn dci(&self) -> u8 {
        self.field(12, 8, 5) as u8
    }

    pub fn set_dci(&mut self, dci: u8) {
        self.set_field(12, 8, 5, u32::from(dci));
    }

    /// Endpoint list mode/marker bits (DW14 bits 0 and 1).
    pub fn elm(&self) -> bool {
        self.field(14, 0, 1) != 0
    }

    pub fn mrk(&self) -> bool {
        self.field(14, 1, 1) != 0
    }

    pub fn set_list_flags(&mut self, elm: bool, mrk: bool) {
        self.set_field(14, 0, 1, u32::from(elm));
        self.set_field(14, 1, 1, u32::from(mrk));
    }

    /// Next endpoint context in the endpoint list (DW14 bits 4..=31, 16-byte aligned).
    pub fn endpoint_link(&self) -> u32 {
        self.dwords[14] & !0x0f
    }

    pub fn set_endpoint_link(&mut self, ptr: u32) {
        self.set_field(14, 4, 28, ptr >> 4);
    }
}
