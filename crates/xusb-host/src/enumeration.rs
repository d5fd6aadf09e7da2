//! Enumeration of the boot device on the default control pipe.

use tracing::{debug, warn};

use crate::control::{descriptor_type, DeviceRequest, XUSB_DEV_ADDR};
pub use crate::descriptor::BulkEndpoint;
use crate::descriptor::{
    find_bot_interface, ConfigDescriptorHeader, DeviceDescriptor, CONFIG_DESCRIPTOR_LEN,
    DEVICE_DESCRIPTOR_LEN,
};
use crate::error::Result;
use crate::host::{XusbHost, USB_HS_CONTROL_MAX_PACKETSIZE};
use crate::memory::DATA_BUF_SIZE;
use crate::platform::XusbPlatform;

/// What enumeration learned about the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnumerationInfo {
    /// 0 until `SET_ADDRESS` succeeds.
    pub device_address: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub b_num_configurations: u8,
    pub configuration_value: u8,
    pub interface_number: u8,
    pub interface_protocol: u8,
    /// Highest logical unit number reported by `GET_MAX_LUN`.
    pub max_lun: u8,
    pub bulk_in: BulkEndpoint,
    pub bulk_out: BulkEndpoint,
}

impl Default for EnumerationInfo {
    fn default() -> Self {
        Self {
            device_address: 0,
            b_max_packet_size0: USB_HS_CONTROL_MAX_PACKETSIZE as u8,
            id_vendor: 0,
            id_product: 0,
            b_num_configurations: 0,
            configuration_value: 0,
            interface_number: 0,
            interface_protocol: 0,
            max_lun: 0,
            bulk_in: BulkEndpoint::default(),
            bulk_out: BulkEndpoint::default(),
        }
    }
}

impl<P: XusbPlatform> XusbHost<P> {
    fn read_device_descriptor(&mut self) -> Result<DeviceDescriptor> {
        let mut raw = [0u8; DEVICE_DESCRIPTOR_LEN];
        let req =
            DeviceRequest::get_descriptor(descriptor_type::DEVICE, 0, DEVICE_DESCRIPTOR_LEN as u16);
        self.control_in(&req, &mut raw)?;
        DeviceDescriptor::parse(&raw)
    }

    /// Reads the device and configuration descriptors, assigns the device address, selects the
    /// bulk-only interface and configures the device.
    ///
    /// On success the endpoint numbers and LUN are also stored on the handle, where subsequent
    /// bulk transfers pick them up.
    ///
    /// Only the first 256 bytes of the configuration descriptor are read. A bulk-only interface
    /// that starts or ends past that point is not seen, and enumeration fails with
    /// [`XusbError::ParseError`](crate::XusbError::ParseError).
    pub fn enumerate(&mut self) -> Result<EnumerationInfo> {
        let dev = self.read_device_descriptor()?;
        {
            let info = self.enumeration_mut();
            info.b_max_packet_size0 = dev.b_max_packet_size0;
            info.id_vendor = dev.id_vendor;
            info.id_product = dev.id_product;
            info.b_num_configurations = dev.b_num_configurations;
        }
        debug!(
            vid = dev.id_vendor,
            pid = dev.id_product,
            mps0 = dev.b_max_packet_size0,
            "device descriptor"
        );

        self.set_address_pending(true);
        let assigned = self.control(&DeviceRequest::set_address(XUSB_DEV_ADDR));
        self.set_address_pending(false);
        assigned?;
        self.enumeration_mut().device_address = XUSB_DEV_ADDR;
        debug!(address = XUSB_DEV_ADDR, "address assigned");

        // The first read ran with the default control packet size; take the values the device
        // reports at its new address.
        let dev = self.read_device_descriptor()?;
        {
            let info = self.enumeration_mut();
            info.b_max_packet_size0 = dev.b_max_packet_size0;
            info.b_num_configurations = dev.b_num_configurations;
        }
        debug!(
            mps0 = dev.b_max_packet_size0,
            configurations = dev.b_num_configurations,
            "device descriptor at new address"
        );

        let mut head = [0u8; CONFIG_DESCRIPTOR_LEN];
        let req = DeviceRequest::get_descriptor(
            descriptor_type::CONFIGURATION,
            0,
            CONFIG_DESCRIPTOR_LEN as u16,
        );
        self.control_in(&req, &mut head)?;
        let header = ConfigDescriptorHeader::parse(&head)?;

        let mut total = usize::from(header.w_total_length);
        if total > DATA_BUF_SIZE {
            warn!(
                w_total_length = total,
                capacity = DATA_BUF_SIZE,
                "configuration descriptor truncated"
            );
            total = DATA_BUF_SIZE;
        }
        let total = total.max(CONFIG_DESCRIPTOR_LEN);
        let mut full = [0u8; DATA_BUF_SIZE];
        let req =
            DeviceRequest::get_descriptor(descriptor_type::CONFIGURATION, 0, total as u16);
        self.control_in(&req, &mut full[..total])?;

        let bot = find_bot_interface(&full[..total])?;
        debug!(
            interface = bot.interface_number,
            bulk_in = bot.bulk_in.number,
            bulk_out = bot.bulk_out.number,
            "bulk-only interface selected"
        );

        self.control(&DeviceRequest::set_configuration(
            header.b_configuration_value,
        ))?;

        let max_lun = {
            let mut lun = [0u8; 1];
            match self.control_in(&DeviceRequest::get_max_lun(bot.interface_number), &mut lun) {
                Ok(()) => lun[0],
                // Single-LUN devices are allowed to stall this request.
                Err(e) => {
                    debug!(%e, "GET_MAX_LUN failed, assuming LUN 0");
                    0
                }
            }
        };

        let info = self.enumeration_mut();
        info.configuration_value = header.b_configuration_value;
        info.interface_number = bot.interface_number;
        info.interface_protocol = bot.protocol;
        info.bulk_in = bot.bulk_in;
        info.bulk_out = bot.bulk_out;
        info.max_lun = max_lun;
        Ok(*info)
    }
}
