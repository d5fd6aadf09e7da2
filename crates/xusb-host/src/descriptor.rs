//! Parsing of the standard descriptors read during enumeration.

use crate::control::descriptor_type;
use crate::error::{Result, XusbError};

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
pub const CONFIG_DESCRIPTOR_LEN: usize = 9;

pub const CLASS_MASS_STORAGE: u8 = 0x08;
pub const PROTOCOL_BULK_ONLY: u8 = 0x50;
/// Bulk-only transport as reported by some Zip drives.
pub const PROTOCOL_BULK_ZIP: u8 = 0x80;

const ENDPOINT_DIR_IN: u8 = 0x80;
const ENDPOINT_NUMBER_MASK: u8 = 0x0f;
const TRANSFER_TYPE_MASK: u8 = 0x03;
const TRANSFER_TYPE_BULK: u8 = 0x02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub bcd_usb: u16,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub b_num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < DEVICE_DESCRIPTOR_LEN {
            return Err(XusbError::ParseError("device descriptor too short"));
        }
        if buf[1] != descriptor_type::DEVICE {
            return Err(XusbError::ParseError("not a device descriptor"));
        }
        Ok(Self {
            bcd_usb: u16::from_le_bytes([buf[2], buf[3]]),
            b_max_packet_size0: buf[7],
            id_vendor: u16::from_le_bytes([buf[8], buf[9]]),
            id_product: u16::from_le_bytes([buf[10], buf[11]]),
            b_num_configurations: buf[17],
        })
    }
}

/// The fixed 9-byte head of a configuration descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigDescriptorHeader {
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
}

impl ConfigDescriptorHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < CONFIG_DESCRIPTOR_LEN {
            return Err(XusbError::ParseError("configuration descriptor too short"));
        }
        if buf[1] != descriptor_type::CONFIGURATION {
            return Err(XusbError::ParseError("not a configuration descriptor"));
        }
        Ok(Self {
            w_total_length: u16::from_le_bytes([buf[2], buf[3]]),
            b_num_interfaces: buf[4],
            b_configuration_value: buf[5],
        })
    }
}

/// A bulk endpoint of the mass-storage interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BulkEndpoint {
    /// Endpoint number without the direction bit.
    pub number: u8,
    pub max_packet_size: u16,
}

/// The bulk-only mass-storage interface selected from a configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BotInterface {
    pub interface_number: u8,
    pub protocol: u8,
    pub bulk_in: BulkEndpoint,
    pub bulk_out: BulkEndpoint,
}

#[derive(Default)]
struct Candidate {
    interface_number: u8,
    protocol: u8,
    bulk_in: Option<BulkEndpoint>,
    bulk_out: Option<BulkEndpoint>,
}

impl Candidate {
    fn complete(&self) -> Option<BotInterface> {
        Some(BotInterface {
            interface_number: self.interface_number,
            protocol: self.protocol,
            bulk_in: self.bulk_in?,
            bulk_out: self.bulk_out?,
        })
    }
}

/// Walks a full configuration descriptor and returns the first mass-storage interface using
/// bulk-only transport that has both a bulk IN and a bulk OUT endpoint.
///
/// Interfaces of other classes or protocols are skipped. A truncated or zero-length descriptor
/// ends the walk.
pub fn find_bot_interface(config: &[u8]) -> Result<BotInterface> {
    let mut off = 0usize;
    let mut current: Option<Candidate> = None;

    while off + 2 <= config.len() {
        let len = config[off] as usize;
        let ty = config[off + 1];
        if len < 2 || off + len > config.len() {
            break;
        }
        let desc = &config[off..off + len];

        match ty {
            descriptor_type::INTERFACE if len >= 9 => {
                if let Some(found) = current.as_ref().and_then(Candidate::complete) {
                    return Ok(found);
                }
                let (class, protocol) = (desc[5], desc[7]);
                current = (class == CLASS_MASS_STORAGE
                    && (protocol == PROTOCOL_BULK_ONLY || protocol == PROTOCOL_BULK_ZIP))
                    .then(|| Candidate {
                        interface_number: desc[2],
                        protocol,
                        ..Candidate::default()
                    });
            }
            descriptor_type::ENDPOINT if len >= 7 => {
                if let Some(cand) = current.as_mut() {
                    let addr = desc[2];
                    if desc[3] & TRANSFER_TYPE_MASK == TRANSFER_TYPE_BULK {
                        let ep = BulkEndpoint {
                            number: addr & ENDPOINT_NUMBER_MASK,
                            max_packet_size: u16::from_le_bytes([desc[4], desc[5]]),
                        };
                        let slot = if addr & ENDPOINT_DIR_IN != 0 {
                            &mut cand.bulk_in
                        } else {
                            &mut cand.bulk_out
                        };
                        if slot.is_none() {
                            *slot = Some(ep);
                        }
                    }
                }
            }
            _ => {}
        }
        off += len;
    }

    current
        .as_ref()
        .and_then(Candidate::complete)
        .ok_or(XusbError::ParseError("no bulk-only mass-storage interface"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config_header(total: u16, ifaces: u8) -> Vec<u8> {
        let t = total.to_le_bytes();
        vec![9, 2, t[0], t[1], ifaces, 1, 0, 0x80, 50]
    }

    fn interface(num: u8, class: u8, protocol: u8) -> [u8; 9] {
        [9, 4, num, 0, 2, class, 0x06, protocol, 0]
    }

    fn endpoint(addr: u8, attrs: u8, mps: u16) -> [u8; 7] {
        let m = mps.to_le_bytes();
        [7, 5, addr, attrs, m[0], m[1], 0]
    }

    #[test]
    fn selects_second_interface_when_first_is_not_mass_storage() {
        let mut cfg = config_header(0, 2);
        cfg.extend_from_slice(&interface(0, 0x03, 0x01));
        cfg.extend_from_slice(&endpoint(0x83, 0x03, 8));
        cfg.extend_from_slice(&interface(1, 0x08, 0x50));
        cfg.extend_from_slice(&endpoint(0x81, 0x02, 512));
        cfg.extend_from_slice(&endpoint(0x02, 0x02, 512));

        let bot = find_bot_interface(&cfg).unwrap();
        assert_eq!(bot.interface_number, 1);
        assert_eq!(bot.bulk_in, BulkEndpoint { number: 1, max_packet_size: 512 });
        assert_eq!(bot.bulk_out, BulkEndpoint { number: 2, max_packet_size: 512 });
    }

    #[test]
    fn cbi_only_device_fails_to_parse() {
        let mut cfg = config_header(0, 2);
        cfg.extend_from_slice(&interface(0, 0x08, 0x06));
        cfg.extend_from_slice(&endpoint(0x81, 0x02, 512));
        cfg.extend_from_slice(&interface(1, 0x08, 0x06));
        cfg.extend_from_slice(&endpoint(0x02, 0x02, 512));

        assert!(matches!(
            find_bot_interface(&cfg),
            Err(XusbError::ParseError(_))
        ));
    }

    #[test]
    fn interface_missing_out_endpoint_is_skipped() {
        let mut cfg = config_header(0, 2);
        cfg.extend_from_slice(&interface(0, 0x08, 0x50));
        cfg.extend_from_slice(&endpoint(0x81, 0x02, 64));
        cfg.extend_from_slice(&interface(1, 0x08, 0x80));
        cfg.extend_from_slice(&endpoint(0x83, 0x03, 8));
        cfg.extend_from_slice(&endpoint(0x84, 0x02, 64));
        cfg.extend_from_slice(&endpoint(0x05, 0x02, 64));

        let bot = find_bot_interface(&cfg).unwrap();
        assert_eq!(bot.interface_number, 1);
        assert_eq!(bot.protocol, PROTOCOL_BULK_ZIP);
        assert_eq!(bot.bulk_in.number, 4);
        assert_eq!(bot.bulk_out.number, 5);
    }

    #[test]
    fn device_descriptor_fields() {
        let raw = [
            18, 1, 0x00, 0x02, 0, 0, 0, 64, 0x81, 0x07, 0x81, 0x55, 0, 1, 1, 2, 3, 1,
        ];
        let d = DeviceDescriptor::parse(&raw).unwrap();
        assert_eq!(d.b_max_packet_size0, 64);
        assert_eq!(d.id_vendor, 0x0781);
        assert_eq!(d.b_num_configurations, 1);
    }

    proptest! {
        #[test]
        fn walking_arbitrary_bytes_never_panics(
            bytes in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let _ = find_bot_interface(&bytes);
        }
    }
}
