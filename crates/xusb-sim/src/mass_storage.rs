use std::collections::VecDeque;

use xusb_host::control::{descriptor_type, request};
use xusb_host::DeviceRequest;

use crate::device::{ControlResponse, SimDevice, UsbInResult, UsbOutResult};

pub const BULK_IN_EP: u8 = 1;
pub const BULK_OUT_EP: u8 = 2;
pub const INTERFACE_NUMBER: u8 = 0;

const CBW_SIGNATURE: u32 = 0x4342_5355;
const CSW_SIGNATURE: u32 = 0x5342_5355;
const CBW_LEN: usize = 31;

const SENSE_NO_SENSE: u8 = 0x00;
const SENSE_NOT_READY: u8 = 0x02;
const SENSE_ILLEGAL_REQUEST: u8 = 0x05;
const SENSE_UNIT_ATTENTION: u8 = 0x06;

const ASC_INVALID_COMMAND: u8 = 0x20;
const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;
const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3a;
const ASC_MEDIUM_CHANGED: u8 = 0x28;

const FEATURE_ENDPOINT_HALT: u16 = 0;

/// Status-stage misbehaviour applied to the next BOT command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CswFault {
    /// CSW echoes a different tag.
    WrongTag,
    /// CSW carries a bad signature.
    BadSignature,
    /// CSW reports this status regardless of the command outcome.
    Status(u8),
    /// CSW reports this residue while keeping its status.
    Residue(u32),
    /// Bulk IN stalls instead of returning the data stage.
    StallDataIn,
    /// Bulk IN stalls instead of returning the CSW.
    StallCsw,
}

#[derive(Clone, Copy, Debug, Default)]
struct Sense {
    key: u8,
    asc: u8,
}

#[derive(Clone, Copy, Debug)]
struct PendingCsw {
    tag: u32,
    residue: u32,
    status: u8,
}

#[derive(Debug)]
enum BotState {
    Idle,
    DataIn(Vec<u8>, PendingCsw),
    DataOut { lba: Option<u64>, expected: usize, csw: PendingCsw },
    Status(PendingCsw),
}

enum ScsiResult {
    NoData,
    DataIn(Vec<u8>),
    DataOut { lba: u64 },
    Error(Sense),
}

/// A RAM disk behind a bulk-only mass-storage interface.
pub struct SimMassStorage {
    disk: Vec<u8>,
    block_len: u32,
    media_present: bool,
    unit_attention: bool,
    max_lun: Option<u8>,
    config_descriptor: Vec<u8>,
    ep0_packet_sizes: VecDeque<u8>,

    configuration: u8,
    sense: Sense,
    state: BotState,
    halted_in: bool,
    halted_out: bool,
    csw_faults: VecDeque<CswFault>,
    current_fault: Option<CswFault>,
    stall_requests: Vec<u8>,

    commands: Vec<u8>,
    tags: Vec<u32>,
    halts_cleared: usize,
}

impl SimMassStorage {
    pub fn new(blocks: u32, block_len: u32) -> Self {
        Self {
            disk: vec![0; blocks as usize * block_len as usize],
            block_len,
            media_present: true,
            unit_attention: false,
            max_lun: Some(0),
            config_descriptor: default_config_descriptor(),
            ep0_packet_sizes: VecDeque::new(),
            configuration: 0,
            sense: Sense::default(),
            state: BotState::Idle,
            halted_in: false,
            halted_out: false,
            csw_faults: VecDeque::new(),
            current_fault: None,
            stall_requests: Vec::new(),
            commands: Vec::new(),
            tags: Vec::new(),
            halts_cleared: 0,
        }
    }

    /// `None` makes the device stall `GET_MAX_LUN`.
    pub fn with_max_lun(mut self, max_lun: Option<u8>) -> Self {
        self.max_lun = max_lun;
        self
    }

    pub fn with_config_descriptor(mut self, desc: Vec<u8>) -> Self {
        self.config_descriptor = desc;
        self
    }

    /// `bMaxPacketSize0` reported by successive device-descriptor reads; the last value sticks.
    pub fn with_ep0_packet_sizes(mut self, sizes: &[u8]) -> Self {
        self.ep0_packet_sizes = sizes.iter().copied().collect();
        self
    }

    pub fn with_media(mut self, present: bool) -> Self {
        self.media_present = present;
        self
    }

    /// The first media access reports UNIT ATTENTION, as after a medium change.
    pub fn with_unit_attention(mut self) -> Self {
        self.unit_attention = true;
        self
    }

    pub fn inject_csw_fault(&mut self, fault: CswFault) {
        self.csw_faults.push_back(fault);
    }

    /// Stalls the next control request with this `bRequest`.
    pub fn stall_request(&mut self, b_request: u8) {
        self.stall_requests.push(b_request);
    }

    pub fn disk(&self) -> &[u8] {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut [u8] {
        &mut self.disk
    }

    pub fn blocks(&self) -> u32 {
        (self.disk.len() / self.block_len as usize) as u32
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// SCSI opcodes received, in order.
    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    pub fn tags(&self) -> &[u32] {
        &self.tags
    }

    pub fn halts_cleared(&self) -> usize {
        self.halts_cleared
    }

    pub fn is_halted(&self) -> (bool, bool) {
        (self.halted_in, self.halted_out)
    }

    fn next_ep0_packet_size(&mut self) -> u8 {
        if self.ep0_packet_sizes.len() > 1 {
            self.ep0_packet_sizes.pop_front().unwrap_or(64)
        } else {
            self.ep0_packet_sizes.front().copied().unwrap_or(64)
        }
    }

    fn device_descriptor(&mut self) -> Vec<u8> {
        let mps0 = self.next_ep0_packet_size();
        vec![
            18,
            descriptor_type::DEVICE,
            0x00,
            0x02, // USB 2.0
            0,
            0,
            0,
            mps0, // bMaxPacketSize0
            0x81,
            0x07, // idVendor
            0x81,
            0x55, // idProduct
            0x00,
            0x01,
            1,
            2,
            3,
            1, // bNumConfigurations
        ]
    }

    fn set_sense(&mut self, sense: Sense) {
        self.sense = sense;
    }

    fn check_ready(&mut self) -> Result<(), Sense> {
        if !self.media_present {
            return Err(Sense {
                key: SENSE_NOT_READY,
                asc: ASC_MEDIUM_NOT_PRESENT,
            });
        }
        if self.unit_attention {
            self.unit_attention = false;
            return Err(Sense {
                key: SENSE_UNIT_ATTENTION,
                asc: ASC_MEDIUM_CHANGED,
            });
        }
        Ok(())
    }

    fn check_range(&self, lba: u64, blocks: u64) -> Result<(), Sense> {
        if lba + blocks > u64::from(self.blocks()) {
            return Err(Sense {
                key: SENSE_ILLEGAL_REQUEST,
                asc: ASC_LBA_OUT_OF_RANGE,
            });
        }
        Ok(())
    }

    fn inquiry_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; 36];
        data[0] = 0x00; // direct-access block device
        data[1] = 0x80; // removable
        data[2] = 0x04;
        data[3] = 0x02;
        data[4] = (data.len() - 5) as u8;
        write_scsi_ascii(&mut data[8..16], b"XUSB");
        write_scsi_ascii(&mut data[16..32], b"SIM BOOT DISK");
        write_scsi_ascii(&mut data[32..36], b"0.1");
        data
    }

    fn request_sense(&self) -> Vec<u8> {
        let mut data = vec![0u8; 18];
        data[0] = 0x70;
        data[2] = self.sense.key & 0x0f;
        data[7] = 10;
        data[12] = self.sense.asc;
        data
    }

    fn read_capacity_10(&self) -> Vec<u8> {
        let last_lba = self.blocks().saturating_sub(1);
        let mut out = vec![0u8; 8];
        out[..4].copy_from_slice(&last_lba.to_be_bytes());
        out[4..].copy_from_slice(&self.block_len.to_be_bytes());
        out
    }

    fn read_format_capacities(&self) -> Vec<u8> {
        let mut out = vec![0u8; 12];
        out[3] = 8; // capacity list length
        out[4..8].copy_from_slice(&self.blocks().to_be_bytes());
        out[8] = 0x02; // formatted media
        out[9..12].copy_from_slice(&self.block_len.to_be_bytes()[1..]);
        out
    }

    fn execute_scsi(&mut self, cb: &[u8]) -> ScsiResult {
        let opcode = cb[0];
        self.commands.push(opcode);
        match opcode {
            0x12 => ScsiResult::DataIn(self.inquiry_data()),
            0x00 => match self.check_ready() {
                Ok(()) => ScsiResult::NoData,
                Err(s) => ScsiResult::Error(s),
            },
            0x03 => {
                let data = self.request_sense();
                self.sense = Sense::default();
                ScsiResult::DataIn(data)
            }
            0x25 => match self.check_ready() {
                Ok(()) => ScsiResult::DataIn(self.read_capacity_10()),
                Err(s) => ScsiResult::Error(s),
            },
            0x23 => ScsiResult::DataIn(self.read_format_capacities()),
            0x28 | 0x2a => {
                let lba = u64::from(u32::from_be_bytes([cb[2], cb[3], cb[4], cb[5]]));
                let blocks = u64::from(u16::from_be_bytes([cb[7], cb[8]]));
                if let Err(s) = self.check_ready().and_then(|()| self.check_range(lba, blocks)) {
                    return ScsiResult::Error(s);
                }
                if opcode == 0x2a {
                    return ScsiResult::DataOut { lba };
                }
                let start = (lba * u64::from(self.block_len)) as usize;
                let end = start + (blocks * u64::from(self.block_len)) as usize;
                ScsiResult::DataIn(self.disk[start..end].to_vec())
            }
            _ => ScsiResult::Error(Sense {
                key: SENSE_ILLEGAL_REQUEST,
                asc: ASC_INVALID_COMMAND,
            }),
        }
    }

    fn accept_cbw(&mut self, cbw: &[u8]) -> UsbOutResult {
        let sig = u32::from_le_bytes([cbw[0], cbw[1], cbw[2], cbw[3]]);
        if cbw.len() != CBW_LEN || sig != CBW_SIGNATURE {
            self.halted_in = true;
            self.halted_out = true;
            return UsbOutResult::Stall;
        }
        let tag = u32::from_le_bytes([cbw[4], cbw[5], cbw[6], cbw[7]]);
        let expected = u32::from_le_bytes([cbw[8], cbw[9], cbw[10], cbw[11]]) as usize;
        let dir_in = cbw[12] & 0x80 != 0;
        let cb_len = usize::from(cbw[14]).clamp(1, 16);
        let cb = cbw[15..15 + cb_len].to_vec();

        self.tags.push(tag);
        self.current_fault = self.csw_faults.pop_front();

        let mut csw = PendingCsw {
            tag,
            residue: 0,
            status: 0,
        };
        let result = self.execute_scsi(&cb);
        if !matches!(result, ScsiResult::Error(_)) && cb[0] != 0x03 {
            self.set_sense(Sense {
                key: SENSE_NO_SENSE,
                asc: 0,
            });
        }

        self.state = match result {
            ScsiResult::NoData => {
                csw.residue = expected as u32;
                BotState::Status(csw)
            }
            ScsiResult::DataIn(mut data) if dir_in && expected > 0 => {
                csw.residue = expected.saturating_sub(data.len()) as u32;
                data.truncate(expected);
                BotState::DataIn(data, csw)
            }
            ScsiResult::DataOut { lba } if !dir_in && expected > 0 => BotState::DataOut {
                lba: Some(lba),
                expected,
                csw,
            },
            ScsiResult::DataIn(_) | ScsiResult::DataOut { .. } => {
                // Direction or length disagrees with the command.
                csw.status = 2;
                BotState::Status(csw)
            }
            ScsiResult::Error(sense) => {
                self.set_sense(sense);
                csw.status = 1;
                csw.residue = expected as u32;
                if expected == 0 {
                    BotState::Status(csw)
                } else if dir_in {
                    BotState::DataIn(vec![0; expected], csw)
                } else {
                    BotState::DataOut {
                        lba: None,
                        expected,
                        csw,
                    }
                }
            }
        };
        UsbOutResult::Ack
    }

    fn encode_csw(&mut self, mut csw: PendingCsw) -> Vec<u8> {
        let mut signature = CSW_SIGNATURE;
        match self.current_fault.take() {
            Some(CswFault::WrongTag) => csw.tag = csw.tag.wrapping_add(0x4444),
            Some(CswFault::BadSignature) => signature = 0xdead_beef,
            Some(CswFault::Status(s)) => csw.status = s,
            Some(CswFault::Residue(r)) => csw.residue = r,
            _ => {}
        }
        let mut out = Vec::with_capacity(13);
        out.extend_from_slice(&signature.to_le_bytes());
        out.extend_from_slice(&csw.tag.to_le_bytes());
        out.extend_from_slice(&csw.residue.to_le_bytes());
        out.push(csw.status);
        out
    }
}

impl SimDevice for SimMassStorage {
    fn reset(&mut self) {
        self.configuration = 0;
        self.state = BotState::Idle;
        self.halted_in = false;
        self.halted_out = false;
    }

    fn handle_control(
        &mut self,
        setup: DeviceRequest,
        _data_stage: Option<&[u8]>,
    ) -> ControlResponse {
        if let Some(pos) = self
            .stall_requests
            .iter()
            .position(|&r| r == setup.b_request)
        {
            self.stall_requests.remove(pos);
            return ControlResponse::Stall;
        }

        let reply = |data: Vec<u8>| {
            let n = data.len().min(usize::from(setup.w_length));
            ControlResponse::Data(data[..n].to_vec())
        };
        match setup.b_request {
            request::GET_DESCRIPTOR => match (setup.w_value >> 8) as u8 {
                descriptor_type::DEVICE => {
                    let desc = self.device_descriptor();
                    reply(desc)
                }
                descriptor_type::CONFIGURATION => reply(self.config_descriptor.clone()),
                _ => ControlResponse::Stall,
            },
            request::SET_ADDRESS => ControlResponse::Ack,
            request::SET_CONFIGURATION => {
                self.configuration = setup.w_value as u8;
                ControlResponse::Ack
            }
            request::GET_CONFIGURATION => reply(vec![self.configuration]),
            request::GET_MAX_LUN => match self.max_lun {
                Some(lun) => reply(vec![lun]),
                None => ControlResponse::Stall,
            },
            request::CLEAR_FEATURE if setup.w_value == FEATURE_ENDPOINT_HALT => {
                match setup.w_index as u8 {
                    0x80 | 0x00 => {}
                    ep if ep == (0x80 | BULK_IN_EP) => self.halted_in = false,
                    ep if ep == BULK_OUT_EP => self.halted_out = false,
                    _ => return ControlResponse::Stall,
                }
                self.halts_cleared += 1;
                ControlResponse::Ack
            }
            _ => ControlResponse::Stall,
        }
    }

    fn handle_in(&mut self, ep: u8, max_len: usize) -> UsbInResult {
        if ep != BULK_IN_EP || self.configuration == 0 || self.halted_in {
            return UsbInResult::Stall;
        }
        match std::mem::replace(&mut self.state, BotState::Idle) {
            BotState::DataIn(data, csw) => {
                if self.current_fault == Some(CswFault::StallDataIn) {
                    self.current_fault = None;
                    self.halted_in = true;
                    self.state = BotState::Status(csw);
                    return UsbInResult::Stall;
                }
                let n = data.len().min(max_len);
                self.state = BotState::Status(csw);
                UsbInResult::Data(data[..n].to_vec())
            }
            BotState::Status(csw) => {
                if self.current_fault == Some(CswFault::StallCsw) {
                    self.current_fault = None;
                    self.halted_in = true;
                    self.state = BotState::Status(csw);
                    return UsbInResult::Stall;
                }
                UsbInResult::Data(self.encode_csw(csw))
            }
            other => {
                self.state = other;
                UsbInResult::Nak
            }
        }
    }

    fn handle_out(&mut self, ep: u8, data: &[u8]) -> UsbOutResult {
        if ep != BULK_OUT_EP || self.configuration == 0 || self.halted_out {
            return UsbOutResult::Stall;
        }
        match std::mem::replace(&mut self.state, BotState::Idle) {
            BotState::DataOut { lba, expected, csw } => {
                let n = data.len().min(expected);
                if let Some(lba) = lba {
                    let start = (lba * u64::from(self.block_len)) as usize;
                    let end = (start + n).min(self.disk.len());
                    self.disk[start..end].copy_from_slice(&data[..end - start]);
                }
                let mut csw = csw;
                csw.residue = (expected - n) as u32;
                self.state = BotState::Status(csw);
                UsbOutResult::Ack
            }
            // A new CBW supersedes whatever was in progress.
            _ if data.len() == CBW_LEN => self.accept_cbw(data),
            _ => {
                self.halted_in = true;
                self.halted_out = true;
                UsbOutResult::Stall
            }
        }
    }
}

fn write_scsi_ascii(dst: &mut [u8], src: &[u8]) {
    dst.fill(b' ');
    let copy_len = src.len().min(dst.len());
    dst[..copy_len].copy_from_slice(&src[..copy_len]);
}

fn default_config_descriptor() -> Vec<u8> {
    let mut d = vec![
        9,
        descriptor_type::CONFIGURATION,
        0,
        0, // wTotalLength, patched below
        1,
        1, // bConfigurationValue
        0,
        0x80,
        50,
    ];
    d.extend_from_slice(&[
        9,
        descriptor_type::INTERFACE,
        INTERFACE_NUMBER,
        0,
        2,
        0x08, // mass storage
        0x06, // SCSI transparent
        0x50, // bulk-only
        0,
    ]);
    d.extend_from_slice(&[7, descriptor_type::ENDPOINT, 0x80 | BULK_IN_EP, 0x02, 0x00, 0x02, 0]);
    d.extend_from_slice(&[7, descriptor_type::ENDPOINT, BULK_OUT_EP, 0x02, 0x00, 0x02, 0]);
    let total = (d.len() as u16).to_le_bytes();
    d[2] = total[0];
    d[3] = total[1];
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbw(tag: u32, len: u32, dir_in: bool, cb: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; CBW_LEN];
        out[..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&tag.to_le_bytes());
        out[8..12].copy_from_slice(&len.to_le_bytes());
        out[12] = if dir_in { 0x80 } else { 0 };
        out[14] = cb.len() as u8;
        out[15..15 + cb.len()].copy_from_slice(cb);
        out
    }

    fn configured(blocks: u32) -> SimMassStorage {
        let mut dev = SimMassStorage::new(blocks, 512);
        dev.handle_control(DeviceRequest::set_configuration(1), None);
        dev
    }

    #[test]
    fn read_capacity_reports_last_lba() {
        let mut dev = configured(4096);
        let cb = [0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(dev.handle_out(BULK_OUT_EP, &cbw(7, 8, true, &cb)), UsbOutResult::Ack);
        let UsbInResult::Data(data) = dev.handle_in(BULK_IN_EP, 8) else {
            panic!("expected data stage");
        };
        assert_eq!(data, [0x00, 0x00, 0x0f, 0xff, 0x00, 0x00, 0x02, 0x00]);
        let UsbInResult::Data(csw) = dev.handle_in(BULK_IN_EP, 13) else {
            panic!("expected csw");
        };
        assert_eq!(&csw[4..8], &7u32.to_le_bytes());
        assert_eq!(csw[12], 0);
    }

    #[test]
    fn unknown_opcode_fails_with_illegal_request() {
        let mut dev = configured(16);
        dev.handle_out(BULK_OUT_EP, &cbw(1, 0, false, &[0x5a, 0, 0, 0, 0, 0]));
        let UsbInResult::Data(csw) = dev.handle_in(BULK_IN_EP, 13) else {
            panic!("expected csw");
        };
        assert_eq!(csw[12], 1);
        dev.handle_out(BULK_OUT_EP, &cbw(2, 18, true, &[0x03, 0, 0, 0, 18, 0]));
        let UsbInResult::Data(sense) = dev.handle_in(BULK_IN_EP, 18) else {
            panic!("expected sense data");
        };
        assert_eq!(sense[2], SENSE_ILLEGAL_REQUEST);
    }

    #[test]
    fn halted_endpoint_stalls_until_cleared() {
        let mut dev = configured(16);
        dev.inject_csw_fault(CswFault::StallCsw);
        dev.handle_out(BULK_OUT_EP, &cbw(3, 0, false, &[0, 0, 0, 0, 0, 0]));
        assert_eq!(dev.handle_in(BULK_IN_EP, 13), UsbInResult::Stall);
        assert_eq!(dev.handle_in(BULK_IN_EP, 13), UsbInResult::Stall);

        let clear = DeviceRequest::clear_endpoint_halt(0x80 | BULK_IN_EP);
        assert_eq!(dev.handle_control(clear, None), ControlResponse::Ack);
        assert!(matches!(dev.handle_in(BULK_IN_EP, 13), UsbInResult::Data(_)));
    }

    #[test]
    fn default_config_descriptor_total_length_matches() {
        let d = default_config_descriptor();
        assert_eq!(u16::from_le_bytes([d[2], d[3]]) as usize, d.len());
        assert_eq!(d.len(), 32);
    }
}
