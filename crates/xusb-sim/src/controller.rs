use std::collections::{BTreeMap, VecDeque};

use tracing::trace;
use xusb_host::context::EndpointContext;
use xusb_host::control::request;
use xusb_host::memory::BULK_BUF_OFFSET;
use xusb_host::regs::{
    self, cfg, csb, ep_status, pls_cntrl, pls_status, subkind, PortSc1, PortSc3, QueueCntrl,
    CSB_PAGE_SIZE,
};
use xusb_host::trb::{CompletionCode, Trb, TrbType, TRB_LEN};
use xusb_host::{
    ClockGate, ConfigSpace, Delay, DeviceRequest, EndpointState, EndpointType, HostConfig,
    MemoryBus, ResetLine, SocControl,
};

use crate::device::{ControlResponse, SimDevice, UsbInResult, UsbOutResult};

/// Ring slots the controller fetches per submission.
const MAX_FETCH: usize = 16;

/// Fault applied to the next work-queue submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The endpoint context is never retired.
    Hang,
    /// The transfer runs but no completion-queue entry is posted.
    LostCompletion,
    /// Completion queue reports `OP_ERROR`; the device is not reached.
    OperationError,
    /// One `EPT_NRDY` entry precedes the normal completion.
    NotReadyOnce,
    /// The endpoint stays not-ready; the device is not reached.
    NotReadyForever,
    /// `EPT_ERROR` plus an Event Data TRB carrying the code; the device is not reached.
    EndpointError(CompletionCode),
    /// `EPT_ERROR` plus an event TRB of the wrong type.
    MalformedEvent,
}

/// SoC-level operation recorded by [`SimXusb`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocEvent {
    Reset(ResetLine, bool),
    Clock(ClockGate, bool),
    ClockDivider(u8),
    EnableFpci,
    OcPin(u8),
    VbusPad(u8),
    PortPads(u8),
    Vbus(u8, bool),
}

/// A transfer that reached the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimTransfer {
    Control(DeviceRequest),
    BulkIn { ep: u8, len: usize },
    BulkOut { ep: u8, len: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Done { packets: u32 },
    Stall,
    Nak,
    NoResponse,
}

#[derive(Clone, Copy, Debug, Default)]
struct Power {
    host_reset_released: bool,
    xusb_reset_released: bool,
    host_clock: bool,
    xusb_clock: bool,
    fpci: bool,
    vbus: bool,
}

/// Simulated XUSB controller with one device on one root port.
pub struct SimXusb<D> {
    device: D,
    mem_base: u64,
    mem: Vec<u8>,
    dma_errors: usize,

    cfg_regs: BTreeMap<u32, u32>,
    page: u32,
    page_selects: usize,
    csb_regs: BTreeMap<u32, u32>,

    complq: VecDeque<u32>,
    eventq: VecDeque<[u32; 4]>,
    faults: VecDeque<Fault>,

    port: u8,
    attached: bool,
    link_enabled: bool,
    reset_completes: bool,
    address: u8,
    power: Power,

    soc_log: Vec<SocEvent>,
    transfers: Vec<SimTransfer>,
    submissions: usize,
    elapsed_us: u64,
}

impl<D: SimDevice> SimXusb<D> {
    /// Controller with `device` attached to controller port 0 and DMA memory covering the context
    /// region described by `config`.
    pub fn new(device: D, config: &HostConfig) -> Self {
        Self {
            device,
            mem_base: config.context_base,
            mem: vec![0; BULK_BUF_OFFSET as usize + config.bulk_buffer_len],
            dma_errors: 0,
            cfg_regs: BTreeMap::new(),
            page: 0,
            page_selects: 0,
            csb_regs: BTreeMap::new(),
            complq: VecDeque::new(),
            eventq: VecDeque::new(),
            faults: VecDeque::new(),
            port: 0,
            attached: true,
            link_enabled: false,
            reset_completes: true,
            address: 0,
            power: Power::default(),
            soc_log: Vec::new(),
            transfers: Vec::new(),
            submissions: 0,
            elapsed_us: 0,
        }
    }

    /// Moves the device to controller port `port`.
    pub fn with_port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    pub fn pending_faults(&self) -> usize {
        self.faults.len()
    }

    pub fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
        if !attached {
            self.link_enabled = false;
        }
    }

    /// When `false`, port resets never bring the link to the enabled state.
    pub fn set_reset_completes(&mut self, completes: bool) {
        self.reset_completes = completes;
    }

    pub fn soc_log(&self) -> &[SocEvent] {
        &self.soc_log
    }

    pub fn transfers(&self) -> &[SimTransfer] {
        &self.transfers
    }

    pub fn clear_transfers(&mut self) {
        self.transfers.clear();
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }

    /// Number of writes to the CSB page-select register.
    pub fn page_selects(&self) -> usize {
        self.page_selects
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    pub fn dma_errors(&self) -> usize {
        self.dma_errors
    }

    /// USB address the device currently answers to.
    pub fn device_address(&self) -> u8 {
        self.address
    }

    pub fn link_enabled(&self) -> bool {
        self.link_enabled
    }

    /// Clocks running, resets released, FPCI and bus mastering enabled.
    pub fn is_running(&self) -> bool {
        let p = self.power;
        let bus_master = self
            .cfg_regs
            .get(&cfg::CFG_1)
            .is_some_and(|v| v & cfg::CFG_1_BUS_MASTER != 0);
        p.host_reset_released
            && p.xusb_reset_released
            && p.host_clock
            && p.xusb_clock
            && p.fpci
            && bus_master
    }

    /// Raw value last written to a CSB register without side effects.
    pub fn csb_peek(&self, addr: u32) -> u32 {
        self.csb_regs.get(&addr).copied().unwrap_or(0)
    }

    fn connected(&self) -> bool {
        self.attached && self.power.vbus
    }

    fn port_offset(&self) -> u32 {
        u32::from(self.port) * regs::PORT_STRIDE
    }

    fn port_status(&self) -> u32 {
        let mut v = 0;
        if self.connected() {
            v |= PortSc3::CCS.bits();
        }
        v | if self.link_enabled {
            pls_status::ENABLED
        } else {
            pls_status::DISABLED
        }
    }

    fn csb_read(&mut self, addr: u32) -> u32 {
        match addr {
            csb::HS_BI_COMPLQ_CNTRL => {
                if self.complq.is_empty() {
                    0
                } else {
                    QueueCntrl::VALID.bits()
                }
            }
            csb::HS_BI_COMPLQ_DWRD0 => self
                .complq
                .front()
                .copied()
                .unwrap_or(subkind::NO_ACTIVITY),
            csb::EVENTQ_CNTRL1 => {
                if self.eventq.is_empty() {
                    0
                } else {
                    QueueCntrl::VALID.bits()
                }
            }
            csb::EVENTQ_TRBDWRD0..=csb::EVENTQ_TRBDWRD3 => {
                let idx = ((addr - csb::EVENTQ_TRBDWRD0) / 4) as usize;
                self.eventq.front().map_or(0, |dw| dw[idx])
            }
            a if a == csb::HSPI_PVTPORTSC3 + self.port_offset() => self.port_status(),
            a => self.csb_peek(a),
        }
    }

    fn csb_write(&mut self, addr: u32, value: u32) {
        let port_off = self.port_offset();
        self.csb_regs.insert(addr, value);
        match addr {
            csb::HS_BI_COMPLQ_CNTRL => {
                if value & QueueCntrl::POP.bits() != 0 {
                    self.complq.pop_front();
                }
            }
            csb::EVENTQ_CNTRL1 => {
                if value & QueueCntrl::POP.bits() != 0 {
                    self.eventq.pop_front();
                }
            }
            csb::HS_BI_WORKQ_DWRD1 => self.process_work_item(),
            a if a == csb::HSPI_PVTPORTSC1 + port_off || a == csb::FSPI_PVTPORTSC1 + port_off => {
                if value & PortSc1::PLS_VALID.bits() != 0 {
                    self.link_state_request(value & pls_cntrl::MASK);
                }
            }
            _ => {}
        }
    }

    fn link_state_request(&mut self, pls: u32) {
        match pls {
            pls_cntrl::RESET if self.connected() && self.reset_completes => {
                self.link_enabled = true;
                self.address = 0;
                self.device.reset();
            }
            pls_cntrl::DISCONNECTED => self.link_enabled = false,
            _ => {}
        }
    }

    fn retire(&mut self, ctx_ptr: u64, status: u8) {
        let mut ctx = EndpointContext::read_from(self, ctx_ptr);
        ctx.set_status(status);
        ctx.write_to(self, ctx_ptr);
    }

    fn post_event(&mut self, ty: TrbType, code: CompletionCode) {
        let trb = Trb::transfer_event(ty, code, 0, 1, 1);
        self.eventq.push_back(trb.to_dwords());
    }

    fn process_work_item(&mut self) {
        self.submissions += 1;
        // A not-ready endpoint left behind by the previous submission is superseded.
        self.complq.retain(|&s| s != subkind::EPT_NRDY);
        if self.csb_peek(csb::HS_BI_WORKQ_DWRD0) != regs::WORKQ_KIND_EPTLIST_BULK_INOUT
            || !self.is_running()
        {
            return;
        }
        let ptr = (u64::from(self.csb_peek(csb::HS_BI_WORKQ_DWRD2)) << 32)
            | u64::from(self.csb_peek(csb::HS_BI_WORKQ_DWRD1));

        let fault = self.faults.pop_front();
        trace!(ptr, ?fault, "work item");
        match fault {
            Some(Fault::Hang) => return,
            Some(Fault::NotReadyForever) => {
                self.retire(ptr, ep_status::COMPL_RETIRE);
                self.complq
                    .extend([subkind::EPT_NRDY, subkind::EPT_NRDY]);
                return;
            }
            Some(Fault::OperationError) => {
                self.retire(ptr, ep_status::ERR_TRANS);
                self.complq.push_back(subkind::OP_ERROR);
                return;
            }
            Some(Fault::EndpointError(code)) => {
                self.retire(ptr, ep_status::ERR_TRANS);
                self.complq.push_back(subkind::EPT_ERROR);
                self.post_event(TrbType::EventData, code);
                return;
            }
            Some(Fault::MalformedEvent) => {
                self.retire(ptr, ep_status::ERR_TRANS);
                self.complq.push_back(subkind::EPT_ERROR);
                self.post_event(TrbType::TransferEvent, CompletionCode::Success);
                return;
            }
            _ => {}
        }

        let mut ctx = EndpointContext::read_from(self, ptr);
        let outcome = self.execute(&ctx);
        trace!(?outcome, "transfer outcome");
        match outcome {
            Outcome::Done { packets } => {
                let seq = (u32::from(ctx.seq_num()) + packets) & 0x1f;
                ctx.set_seq_num(seq as u8);
                ctx.set_status(ep_status::COMPL_RETIRE);
                if fault == Some(Fault::NotReadyOnce) {
                    self.complq.push_back(subkind::EPT_NRDY);
                }
                if fault != Some(Fault::LostCompletion) {
                    self.complq.push_back(subkind::EPT_DONE);
                }
            }
            Outcome::Stall => {
                ctx.set_status(ep_status::ERR_STALL);
                ctx.set_endpoint_state(EndpointState::Halted);
                self.complq.push_back(subkind::EPT_DONE);
            }
            Outcome::Nak => {
                ctx.set_status(ep_status::COMPL_RETIRE);
                self.complq
                    .extend([subkind::EPT_NRDY, subkind::EPT_NRDY]);
            }
            Outcome::NoResponse => {
                ctx.set_status(ep_status::ERR_TRANS);
                self.complq.push_back(subkind::EPT_ERROR);
                self.post_event(TrbType::EventData, CompletionCode::UsbTransactionError);
            }
        }
        ctx.write_to(self, ptr);
    }

    fn fetch_trbs(&mut self, dequeue: u64, dcs: bool) -> Vec<Trb> {
        let mut out = Vec::new();
        for i in 0..MAX_FETCH {
            let trb = Trb::read_from(self, dequeue + (i * TRB_LEN) as u64);
            if trb.cycle() != dcs {
                break;
            }
            out.push(trb);
        }
        out
    }

    fn execute(&mut self, ctx: &EndpointContext) -> Outcome {
        if ctx.endpoint_state() != EndpointState::Running
            || !self.link_enabled
            || ctx.device_address() != self.address
        {
            return Outcome::NoResponse;
        }
        let trbs = self.fetch_trbs(ctx.tr_dequeue_pointer(), ctx.dcs());
        let mps = u32::from(ctx.max_packet_size()).max(1);
        match ctx.endpoint_type() {
            EndpointType::Control => self.execute_control(ctx, &trbs),
            EndpointType::BulkIn => self.execute_bulk_in(ctx.dci() / 2, &trbs, mps),
            EndpointType::BulkOut => self.execute_bulk_out(ctx.dci() / 2, &trbs, mps),
            _ => Outcome::NoResponse,
        }
    }

    fn execute_control(&mut self, ctx: &EndpointContext, trbs: &[Trb]) -> Outcome {
        let Some(setup_trb) = trbs.first().filter(|t| t.trb_type() == TrbType::SetupStage) else {
            return Outcome::NoResponse;
        };
        let setup = DeviceRequest::from_bytes(setup_trb.parameter.to_le_bytes());
        if setup.b_request == request::SET_ADDRESS && !ctx.fw_set_address() {
            return Outcome::NoResponse;
        }
        let data_trb = trbs
            .iter()
            .find(|t| t.trb_type() == TrbType::DataStage)
            .copied();
        self.transfers.push(SimTransfer::Control(setup));

        let out_data = match data_trb {
            Some(t) if !t.direction_in() => {
                let mut buf = vec![0u8; t.transfer_len() as usize];
                self.read_physical(t.parameter, &mut buf);
                Some(buf)
            }
            _ => None,
        };

        match self.device.handle_control(setup, out_data.as_deref()) {
            ControlResponse::Data(bytes) => {
                if let Some(t) = data_trb.filter(Trb::direction_in) {
                    let n = bytes.len().min(t.transfer_len() as usize);
                    self.write_physical(t.parameter, &bytes[..n]);
                }
                Outcome::Done { packets: 1 }
            }
            ControlResponse::Ack => {
                if setup.b_request == request::SET_ADDRESS {
                    self.address = setup.w_value as u8;
                }
                Outcome::Done { packets: 1 }
            }
            ControlResponse::Nak => Outcome::Nak,
            ControlResponse::Stall => Outcome::Stall,
            ControlResponse::Timeout => Outcome::NoResponse,
        }
    }

    fn normal_trb(trbs: &[Trb]) -> Option<Trb> {
        trbs.first()
            .filter(|t| t.trb_type() == TrbType::Normal)
            .copied()
    }

    fn execute_bulk_in(&mut self, ep: u8, trbs: &[Trb], mps: u32) -> Outcome {
        let Some(trb) = Self::normal_trb(trbs) else {
            return Outcome::NoResponse;
        };
        let len = trb.transfer_len() as usize;
        self.transfers.push(SimTransfer::BulkIn { ep, len });
        match self.device.handle_in(ep, len) {
            UsbInResult::Data(bytes) => {
                let n = bytes.len().min(len);
                self.write_physical(trb.parameter, &bytes[..n]);
                Outcome::Done {
                    packets: (n as u32).div_ceil(mps).max(1),
                }
            }
            UsbInResult::Nak => Outcome::Nak,
            UsbInResult::Stall => Outcome::Stall,
            UsbInResult::Timeout => Outcome::NoResponse,
        }
    }

    fn execute_bulk_out(&mut self, ep: u8, trbs: &[Trb], mps: u32) -> Outcome {
        let Some(trb) = Self::normal_trb(trbs) else {
            return Outcome::NoResponse;
        };
        let len = trb.transfer_len() as usize;
        let mut data = vec![0u8; len];
        self.read_physical(trb.parameter, &mut data);
        self.transfers.push(SimTransfer::BulkOut { ep, len });
        match self.device.handle_out(ep, &data) {
            UsbOutResult::Ack => Outcome::Done {
                packets: (len as u32).div_ceil(mps).max(1),
            },
            UsbOutResult::Nak => Outcome::Nak,
            UsbOutResult::Stall => Outcome::Stall,
            UsbOutResult::Timeout => Outcome::NoResponse,
        }
    }

    fn dma_range(&mut self, paddr: u64, len: usize) -> Option<std::ops::Range<usize>> {
        let start = paddr.checked_sub(self.mem_base)? as usize;
        let end = start.checked_add(len)?;
        if end > self.mem.len() {
            self.dma_errors += 1;
            return None;
        }
        Some(start..end)
    }
}

impl<D: SimDevice> MemoryBus for SimXusb<D> {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        match self.dma_range(paddr, buf.len()) {
            Some(r) => buf.copy_from_slice(&self.mem[r]),
            None => buf.fill(0),
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        if let Some(r) = self.dma_range(paddr, buf.len()) {
            self.mem[r].copy_from_slice(buf);
        }
    }
}

impl<D: SimDevice> ConfigSpace for SimXusb<D> {
    fn cfg_read(&mut self, offset: u32) -> u32 {
        if (cfg::CSB_ADDR..cfg::CSB_ADDR + CSB_PAGE_SIZE).contains(&offset) {
            if !self.power.fpci {
                return 0;
            }
            let addr = self.page * CSB_PAGE_SIZE + (offset - cfg::CSB_ADDR);
            return self.csb_read(addr);
        }
        match offset {
            cfg::ARU_C11_CSBRANGE => self.page,
            o => self.cfg_regs.get(&o).copied().unwrap_or(0),
        }
    }

    fn cfg_write(&mut self, offset: u32, value: u32) {
        if (cfg::CSB_ADDR..cfg::CSB_ADDR + CSB_PAGE_SIZE).contains(&offset) {
            if self.power.fpci {
                let addr = self.page * CSB_PAGE_SIZE + (offset - cfg::CSB_ADDR);
                self.csb_write(addr, value);
            }
            return;
        }
        if offset == cfg::ARU_C11_CSBRANGE {
            self.page = value;
            self.page_selects += 1;
            return;
        }
        self.cfg_regs.insert(offset, value);
    }
}

impl<D: SimDevice> SocControl for SimXusb<D> {
    fn set_reset(&mut self, line: ResetLine, asserted: bool) {
        self.soc_log.push(SocEvent::Reset(line, asserted));
        match line {
            ResetLine::Host => self.power.host_reset_released = !asserted,
            ResetLine::Xusb => self.power.xusb_reset_released = !asserted,
        }
        if asserted {
            self.complq.clear();
            self.eventq.clear();
        }
    }

    fn set_clock(&mut self, gate: ClockGate, enabled: bool) {
        self.soc_log.push(SocEvent::Clock(gate, enabled));
        match gate {
            ClockGate::Host => self.power.host_clock = enabled,
            ClockGate::Xusb => self.power.xusb_clock = enabled,
        }
    }

    fn configure_clock_divider(&mut self, divider: u8) {
        self.soc_log.push(SocEvent::ClockDivider(divider));
    }

    fn enable_fpci(&mut self) {
        self.soc_log.push(SocEvent::EnableFpci);
        self.power.fpci = true;
    }

    fn configure_oc_pin(&mut self, pin: u8) {
        self.soc_log.push(SocEvent::OcPin(pin));
    }

    fn configure_vbus_pad(&mut self, vbus: u8) {
        self.soc_log.push(SocEvent::VbusPad(vbus));
    }

    fn init_port_pads(&mut self, port: u8) {
        self.soc_log.push(SocEvent::PortPads(port));
    }

    fn set_vbus(&mut self, vbus: u8, enabled: bool) {
        self.soc_log.push(SocEvent::Vbus(vbus, enabled));
        self.power.vbus = enabled;
        if !enabled {
            self.link_enabled = false;
        }
    }
}

impl<D> Delay for SimXusb<D> {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += u64::from(us);
    }
}
