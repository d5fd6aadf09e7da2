//! Transfer Request Block layout.
//!
//! TRBs are 16 bytes: a 64-bit parameter (buffer pointer or immediate data), a 32-bit status dword
//! and a 32-bit control dword carrying the cycle bit and the TRB type. Field positions follow the
//! xHCI layout the XUSB boot interface is modelled on.

use crate::MemoryBus;

/// Size of a TRB in bytes.
pub const TRB_LEN: usize = 16;

/// TRB Type field (control bits 10..=15).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrbType {
    Reserved,
    Normal,
    SetupStage,
    DataStage,
    StatusStage,
    Isoch,
    Link,
    EventData,
    NoOp,
    TransferEvent,
    CommandCompletionEvent,
    PortStatusChangeEvent,
    Unknown(u8),
}

impl TrbType {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TrbType::Reserved,
            1 => TrbType::Normal,
            2 => TrbType::SetupStage,
            3 => TrbType::DataStage,
            4 => TrbType::StatusStage,
            5 => TrbType::Isoch,
            6 => TrbType::Link,
            7 => TrbType::EventData,
            8 => TrbType::NoOp,
            32 => TrbType::TransferEvent,
            33 => TrbType::CommandCompletionEvent,
            34 => TrbType::PortStatusChangeEvent,
            other => TrbType::Unknown(other),
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            TrbType::Reserved => 0,
            TrbType::Normal => 1,
            TrbType::SetupStage => 2,
            TrbType::DataStage => 3,
            TrbType::StatusStage => 4,
            TrbType::Isoch => 5,
            TrbType::Link => 6,
            TrbType::EventData => 7,
            TrbType::NoOp => 8,
            TrbType::TransferEvent => 32,
            TrbType::CommandCompletionEvent => 33,
            TrbType::PortStatusChangeEvent => 34,
            TrbType::Unknown(v) => v & 0x3f,
        }
    }
}

/// Completion code carried in transfer event TRBs (status bits 24..=31).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionCode {
    Invalid,
    Success,
    DataBufferError,
    BabbleDetected,
    UsbTransactionError,
    TrbError,
    Stall,
    ResourceError,
    BandwidthError,
    NoSlotsAvailable,
    InvalidStreamType,
    SlotNotEnabled,
    EndpointNotEnabled,
    ShortPacket,
    RingUnderrun,
    RingOverrun,
    VendorError,
    ControlSequenceError,
    VendorStatus,
    Other(u8),
}

impl CompletionCode {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => CompletionCode::Invalid,
            1 => CompletionCode::Success,
            2 => CompletionCode::DataBufferError,
            3 => CompletionCode::BabbleDetected,
            4 => CompletionCode::UsbTransactionError,
            5 => CompletionCode::TrbError,
            6 => CompletionCode::Stall,
            7 => CompletionCode::ResourceError,
            8 => CompletionCode::BandwidthError,
            9 => CompletionCode::NoSlotsAvailable,
            10 => CompletionCode::InvalidStreamType,
            11 => CompletionCode::SlotNotEnabled,
            12 => CompletionCode::EndpointNotEnabled,
            13 => CompletionCode::ShortPacket,
            14 => CompletionCode::RingUnderrun,
            15 => CompletionCode::RingOverrun,
            192 => CompletionCode::VendorError,
            223 => CompletionCode::ControlSequenceError,
            224 => CompletionCode::VendorStatus,
            other => CompletionCode::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            CompletionCode::Invalid => 0,
            CompletionCode::Success => 1,
            CompletionCode::DataBufferError => 2,
            CompletionCode::BabbleDetected => 3,
            CompletionCode::UsbTransactionError => 4,
            CompletionCode::TrbError => 5,
            CompletionCode::Stall => 6,
            CompletionCode::ResourceError => 7,
            CompletionCode::BandwidthError => 8,
            CompletionCode::NoSlotsAvailable => 9,
            CompletionCode::InvalidStreamType => 10,
            CompletionCode::SlotNotEnabled => 11,
            CompletionCode::EndpointNotEnabled => 12,
            CompletionCode::ShortPacket => 13,
            CompletionCode::RingUnderrun => 14,
            CompletionCode::RingOverrun => 15,
            CompletionCode::VendorError => 192,
            CompletionCode::ControlSequenceError => 223,
            CompletionCode::VendorStatus => 224,
            CompletionCode::Other(v) => v,
        }
    }
}

/// Transfer Type field of a Setup Stage TRB (control bits 16..=17).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferType {
    NoData,
    Out,
    In,
}

impl TransferType {
    pub const fn raw(self) -> u32 {
        match self {
            TransferType::NoData => 0,
            TransferType::Out => 2,
            TransferType::In => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trb {
    pub parameter: u64,
    pub status: u32,
    pub control: u32,
}

impl Trb {
    pub const CONTROL_CYCLE_BIT: u32 = 1 << 0;
    /// Event Data flag of transfer event TRBs.
    pub const CONTROL_EVENT_DATA_BIT: u32 = 1 << 2;
    /// Interrupt On Completion.
    pub const CONTROL_IOC_BIT: u32 = 1 << 5;
    /// Immediate Data: the parameter field holds the payload instead of a pointer.
    pub const CONTROL_IDT_BIT: u32 = 1 << 6;
    /// Direction of Data/Status stage TRBs (1 = IN).
    pub const CONTROL_DIR_IN_BIT: u32 = 1 << 16;

    pub const CONTROL_TRB_TYPE_SHIFT: u32 = 10;
    pub const CONTROL_TRB_TYPE_MASK: u32 = 0x3f << Self::CONTROL_TRB_TYPE_SHIFT;
    pub const CONTROL_TRT_SHIFT: u32 = 16;
    pub const CONTROL_ENDPOINT_ID_SHIFT: u32 = 16;
    pub const CONTROL_ENDPOINT_ID_MASK: u32 = 0x1f << Self::CONTROL_ENDPOINT_ID_SHIFT;
    pub const CONTROL_SLOT_ID_SHIFT: u32 = 24;

    /// TRB Transfer Length (status bits 0..=16).
    pub const STATUS_TRANSFER_LEN_MASK: u32 = 0x1_ffff;
    /// Residual length reported by event TRBs (status bits 0..=23).
    pub const STATUS_EVENT_LEN_MASK: u32 = 0x00ff_ffff;
    pub const STATUS_COMPLETION_CODE_SHIFT: u32 = 24;

    pub const fn new(parameter: u64, status: u32, control: u32) -> Self {
        Self {
            parameter,
            status,
            control,
        }
    }

    pub fn from_dwords(dw: [u32; 4]) -> Self {
        Self {
            parameter: u64::from(dw[0]) | (u64::from(dw[1]) << 32),
            status: dw[2],
            control: dw[3],
        }
    }

    pub fn to_dwords(&self) -> [u32; 4] {
        [
            self.parameter as u32,
            (self.parameter >> 32) as u32,
            self.status,
            self.control,
        ]
    }

    pub fn from_bytes(bytes: [u8; TRB_LEN]) -> Self {
        let mut dw = [0u32; 4];
        for (i, d) in dw.iter_mut().enumerate() {
            let off = i * 4;
            *d = u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
        }
        Self::from_dwords(dw)
    }

    pub fn to_bytes(&self) -> [u8; TRB_LEN] {
        let mut out = [0u8; TRB_LEN];
        for (i, d) in self.to_dwords().iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&d.to_le_bytes());
        }
        out
    }

    pub fn read_from(mem: &mut (impl MemoryBus + ?Sized), paddr: u64) -> Self {
        let mut bytes = [0u8; TRB_LEN];
        mem.read_physical(paddr, &mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn write_to(&self, mem: &mut (impl MemoryBus + ?Sized), paddr: u64) {
        mem.write_physical(paddr, &self.to_bytes());
    }

    pub fn cycle(&self) -> bool {
        self.control & Self::CONTROL_CYCLE_BIT != 0
    }

    pub fn set_cycle(&mut self, cycle: bool) {
        if cycle {
            self.control |= Self::CONTROL_CYCLE_BIT;
        } else {
            self.control &= !Self::CONTROL_CYCLE_BIT;
        }
    }

    pub fn trb_type_raw(&self) -> u8 {
        ((self.control & Self::CONTROL_TRB_TYPE_MASK) >> Self::CONTROL_TRB_TYPE_SHIFT) as u8
    }

    pub fn trb_type(&self) -> TrbType {
        TrbType::from_raw(self.trb_type_raw())
    }

    pub fn set_trb_type(&mut self, ty: TrbType) {
        self.control = (self.control & !Self::CONTROL_TRB_TYPE_MASK)
            | ((u32::from(ty.raw()) << Self::CONTROL_TRB_TYPE_SHIFT) & Self::CONTROL_TRB_TYPE_MASK);
    }

    /// TRB Transfer Length of a transfer TRB.
    pub fn transfer_len(&self) -> u32 {
        self.status & Self::STATUS_TRANSFER_LEN_MASK
    }

    pub fn direction_in(&self) -> bool {
        self.control & Self::CONTROL_DIR_IN_BIT != 0
    }

    /// Transfer Type of a Setup Stage TRB.
    pub fn transfer_type_raw(&self) -> u32 {
        (self.control >> Self::CONTROL_TRT_SHIFT) & 0x3
    }

    /// Completion code of an event TRB.
    pub fn completion_code(&self) -> CompletionCode {
        CompletionCode::from_raw((self.status >> Self::STATUS_COMPLETION_CODE_SHIFT) as u8)
    }

    /// Residual transfer length of an event TRB.
    pub fn event_len(&self) -> u32 {
        self.status & Self::STATUS_EVENT_LEN_MASK
    }

    pub fn endpoint_id(&self) -> u8 {
        ((self.control & Self::CONTROL_ENDPOINT_ID_MASK) >> Self::CONTROL_ENDPOINT_ID_SHIFT) as u8
    }

    pub fn slot_id(&self) -> u8 {
        (self.control >> Self::CONTROL_SLOT_ID_SHIFT) as u8
    }

    /// Builds a Normal TRB for a bulk data transfer.
    pub fn normal(buffer: u64, len: u32, cycle: bool) -> Self {
        let mut trb = Trb::new(buffer, len & Self::STATUS_TRANSFER_LEN_MASK, 0);
        trb.set_trb_type(TrbType::Normal);
        trb.set_cycle(cycle);
        trb
    }

    /// Builds a Setup Stage TRB with the 8-byte request carried inline.
    pub fn setup_stage(setup: [u8; 8], trt: TransferType, cycle: bool) -> Self {
        let mut trb = Trb::new(
            u64::from_le_bytes(setup),
            8,
            Self::CONTROL_IDT_BIT | Self::CONTROL_IOC_BIT | (trt.raw() << Self::CONTROL_TRT_SHIFT),
        );
        trb.set_trb_type(TrbType::SetupStage);
        trb.set_cycle(cycle);
        trb
    }

    pub fn data_stage(buffer: u64, len: u16, dir_in: bool, cycle: bool) -> Self {
        let mut trb = Trb::new(buffer, u32::from(len), 0);
        if dir_in {
            trb.control |= Self::CONTROL_DIR_IN_BIT;
        }
        trb.set_trb_type(TrbType::DataStage);
        trb.set_cycle(cycle);
        trb
    }

    /// Status Stage TRB. `dir_in` is the direction of the status stage itself.
    pub fn status_stage(dir_in: bool, cycle: bool) -> Self {
        let mut trb = Trb::new(0, 0, 0);
        if dir_in {
            trb.control |= Self::CONTROL_DIR_IN_BIT;
        }
        trb.set_trb_type(TrbType::StatusStage);
        trb.set_cycle(cycle);
        trb
    }

    /// Reserved end-marker TRB. Carries the inverted cycle bit so the controller stops on it.
    pub fn end_marker(cycle: bool) -> Self {
        let mut trb = Trb::new(0, 0, 0);
        trb.set_trb_type(TrbType::Reserved);
        trb.set_cycle(!cycle);
        trb
    }

    /// Transfer event TRB as written to the event queue.
    pub fn transfer_event(
        ty: TrbType,
        code: CompletionCode,
        residual: u32,
        endpoint_id: u8,
        slot_id: u8,
    ) -> Self {
        let status = (residual & Self::STATUS_EVENT_LEN_MASK)
            | (u32::from(code.as_u8()) << Self::STATUS_COMPLETION_CODE_SHIFT);
        let mut trb = Trb::new(0, status, Self::CONTROL_EVENT_DATA_BIT);
        trb.set_trb_type(ty);
        trb.control |= (u32::from(endpoint_id) << Self::CONTROL_ENDPOINT_ID_SHIFT)
            & Self::CONTROL_ENDPOINT_ID_MASK;
        trb.control |= u32::from(slot_id) << Self::CONTROL_SLOT_ID_SHIFT;
        trb.set_cycle(true);
        trb
    }
}
