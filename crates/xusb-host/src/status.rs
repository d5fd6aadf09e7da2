//! Diagnostic state exposed to the boot loader after every operation.

use crate::error::XusbError;
use crate::trb::CompletionCode;

/// Where the driver was in the submit/poll sequence when it last stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverPhase {
    #[default]
    Idle,
    WorkQSubmitted,
    CompQPollStart,
    CompQPollError,
    CompQPollEnd,
    EventQPollStart,
    EventQPollError,
    EventQPollEnd,
}

/// Running status of the USB3 boot device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usb3Status {
    pub phase: DriverPhase,
    /// Completion code from the most recent transfer event, if any was read.
    pub ep_status: CompletionCode,
    pub last_error: Option<XusbError>,

    pub last_lba: u32,
    pub block_len: u32,
    pub num_blocks: u32,

    pub csw_status: u8,
    pub csw_tag: u32,
    /// `dCSWDataResidue` of the last status wrapper.
    pub data_residue: u32,

    pub sense_key: u8,
    pub peripheral_type: u8,
}

impl Default for Usb3Status {
    fn default() -> Self {
        Self {
            phase: DriverPhase::Idle,
            ep_status: CompletionCode::Invalid,
            last_error: None,
            last_lba: 0,
            block_len: 0,
            num_blocks: 0,
            csw_status: 0,
            csw_tag: 0,
            data_residue: 0,
            sense_key: 0,
            peripheral_type: 0,
        }
    }
}
