//! USB device requests issued on the default control endpoint.

use crate::error::{Result, XusbError};
use crate::trb::TransferType;

/// Standard and class request codes the boot driver knows how to issue.
pub mod request {
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
    /// Mass-storage class request.
    pub const GET_MAX_LUN: u8 = 0xfe;
    /// Mass-storage class request. Not issued by this driver.
    pub const BULK_ONLY_RESET: u8 = 0xff;
}

pub mod descriptor_type {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
}

pub const REQUEST_TYPE_DIR_IN: u8 = 0x80;
pub const REQUEST_TYPE_CLASS: u8 = 0x20;
pub const RECIPIENT_DEVICE: u8 = 0x00;
pub const RECIPIENT_INTERFACE: u8 = 0x01;
pub const RECIPIENT_ENDPOINT: u8 = 0x02;

/// Feature selector for `CLEAR_FEATURE(ENDPOINT_HALT)`.
pub const FEATURE_ENDPOINT_HALT: u16 = 0;

/// Address assigned to the boot device by SET_ADDRESS.
pub const XUSB_DEV_ADDR: u8 = 1;

/// An 8-byte SETUP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceRequest {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl DeviceRequest {
    pub const fn new(
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        w_length: u16,
    ) -> Self {
        Self {
            bm_request_type,
            b_request,
            w_value,
            w_index,
            w_length,
        }
    }

    pub const fn get_descriptor(ty: u8, index: u8, len: u16) -> Self {
        Self::new(
            REQUEST_TYPE_DIR_IN | RECIPIENT_DEVICE,
            request::GET_DESCRIPTOR,
            ((ty as u16) << 8) | index as u16,
            0,
            len,
        )
    }

    pub const fn set_address(addr: u8) -> Self {
        Self::new(RECIPIENT_DEVICE, request::SET_ADDRESS, addr as u16, 0, 0)
    }

    pub const fn get_configuration() -> Self {
        Self::new(
            REQUEST_TYPE_DIR_IN | RECIPIENT_DEVICE,
            request::GET_CONFIGURATION,
            0,
            0,
            1,
        )
    }

    pub const fn set_configuration(value: u8) -> Self {
        Self::new(
            RECIPIENT_DEVICE,
            request::SET_CONFIGURATION,
            value as u16,
            0,
            0,
        )
    }

    pub const fn get_max_lun(interface: u8) -> Self {
        Self::new(
            REQUEST_TYPE_DIR_IN | REQUEST_TYPE_CLASS | RECIPIENT_INTERFACE,
            request::GET_MAX_LUN,
            0,
            interface as u16,
            1,
        )
    }

    /// `CLEAR_FEATURE(ENDPOINT_HALT)` for endpoint address `ep_addr` (0 for the control pipe).
    pub const fn clear_endpoint_halt(ep_addr: u8) -> Self {
        Self::new(
            RECIPIENT_ENDPOINT,
            request::CLEAR_FEATURE,
            FEATURE_ENDPOINT_HALT,
            ep_addr as u16,
            0,
        )
    }

    pub fn is_in(&self) -> bool {
        self.bm_request_type & REQUEST_TYPE_DIR_IN != 0
    }

    pub fn transfer_type(&self) -> TransferType {
        match (self.w_length, self.is_in()) {
            (0, _) => TransferType::NoData,
            (_, true) => TransferType::In,
            (_, false) => TransferType::Out,
        }
    }

    /// Rejects requests the boot driver does not issue.
    pub fn validate(&self) -> Result<()> {
        match self.b_request {
            request::GET_DESCRIPTOR
            | request::GET_CONFIGURATION
            | request::SET_ADDRESS
            | request::SET_CONFIGURATION
            | request::GET_MAX_LUN
            | request::CLEAR_FEATURE => Ok(()),
            other => Err(XusbError::InvalidRequest(other)),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let v = self.w_value.to_le_bytes();
        let i = self.w_index.to_le_bytes();
        let l = self.w_length.to_le_bytes();
        [
            self.bm_request_type,
            self.b_request,
            v[0],
            v[1],
            i[0],
            i[1],
            l[0],
            l[1],
        ]
    }

    pub fn from_bytes(b: [u8; 8]) -> Self {
        Self {
            bm_request_type: b[0],
            b_request: b[1],
            w_value: u16::from_le_bytes([b[2], b[3]]),
            w_index: u16::from_le_bytes([b[4], b[5]]),
            w_length: u16::from_le_bytes([b[6], b[7]]),
        }
    }
}
