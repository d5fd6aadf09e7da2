//! The driver handle and the transfer engine.
//!
//! One submission is always the same sequence:
//!
//! 1. write the TRBs for the transfer into the ring and terminate it with the end marker,
//! 2. point the shared endpoint context at the ring and load it for the endpoint kind,
//! 3. post the context pointer to the work queue,
//! 4. poll the endpoint-context status and the completion queue until the controller reports the
//!    outcome, draining the event queue if the outcome is an endpoint error.
//!
//! The handle serialises all of this through `&mut self`; there is never more than one transfer
//! in flight.

use tracing::{trace, warn};

use crate::completion::{classify_event, Completion, CompletionSubKind, SequenceNumbers};
use crate::config::{budget, BootParams, HostConfig};
use crate::context::{
    EndpointContext, EndpointKind, EndpointState, Speed, DEFAULT_ERROR_COUNT, INTERVAL_1MS,
};
use crate::control::{DeviceRequest, REQUEST_TYPE_DIR_IN};
use crate::enumeration::EnumerationInfo;
use crate::error::{Result, XusbError};
use crate::memory::{ContextLayout, BULK_BUF_OFFSET, DATA_BUF_SIZE, TRB_RING_SIZE};
use crate::platform::{Delay, XusbPlatform};
use crate::regs::{self, csb, ep_status, CsbWindow, QueueCntrl};
use crate::retry::{poll_until, retry, Attempt};
use crate::ring::TransferRing;
use crate::status::{DriverPhase, Usb3Status};
use crate::trb::Trb;

/// Producer cycle state of the transfer ring. The ring is rewound rather than wrapped, so this
/// never changes.
const INITIAL_CYCLE_STATE: bool = false;

/// Max packet size of the default control pipe before the device descriptor has been read.
pub const USB_HS_CONTROL_MAX_PACKETSIZE: u16 = 64;
/// Max packet size programmed for high-speed bulk endpoints.
pub const USB_HS_BULK_MAX_PACKETSIZE: u16 = 512;
pub const USB_TRB_AVERAGE_CONTROL_LENGTH: u16 = 8;
pub const USB_TRB_AVERAGE_BULK_LENGTH: u16 = 512;
/// Device Context Index of the default control endpoint.
pub const DCI_CTRL: u8 = 1;

/// Exclusive handle to the XUSB controller and its endpoint context.
pub struct XusbHost<P> {
    platform: P,
    config: HostConfig,
    layout: ContextLayout,
    csb: CsbWindow,
    ring: TransferRing,
    seq: SequenceNumbers,
    /// Endpoint the context was last loaded for.
    active_kind: EndpointKind,
    status: Usb3Status,
    info: EnumerationInfo,
    set_address_pending: bool,
    root_port: u8,
    params: BootParams,
}

impl<P: XusbPlatform> XusbHost<P> {
    /// Takes ownership of `platform`, zeroes the fixed context regions and loads the endpoint
    /// context with its power-on defaults.
    pub fn new(platform: P, config: HostConfig) -> Result<Self> {
        let layout = ContextLayout::new(config.context_base, config.bulk_buffer_len)?;
        let mut host = Self {
            platform,
            config,
            layout,
            csb: CsbWindow::new(),
            ring: TransferRing::new(layout.trb_ring(), TRB_RING_SIZE, INITIAL_CYCLE_STATE),
            seq: SequenceNumbers::default(),
            active_kind: EndpointKind::Control,
            status: Usb3Status::default(),
            info: EnumerationInfo::default(),
            set_address_pending: false,
            root_port: 0,
            params: BootParams::default(),
        };
        host.platform
            .fill_physical(layout.base(), BULK_BUF_OFFSET as usize, 0);
        host.init_endpoint_context();
        Ok(host)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn layout(&self) -> &ContextLayout {
        &self.layout
    }

    pub fn status(&self) -> &Usb3Status {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut Usb3Status {
        &mut self.status
    }

    pub fn enumeration(&self) -> &EnumerationInfo {
        &self.info
    }

    pub(crate) fn enumeration_mut(&mut self) -> &mut EnumerationInfo {
        &mut self.info
    }

    pub fn sequence_numbers(&self) -> SequenceNumbers {
        self.seq
    }

    pub fn boot_params(&self) -> &BootParams {
        &self.params
    }

    pub(crate) fn set_boot_params(&mut self, params: BootParams, root_port: u8) {
        self.params = params;
        self.root_port = root_port;
        self.init_endpoint_context();
    }

    pub(crate) fn set_address_pending(&mut self, pending: bool) {
        self.set_address_pending = pending;
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Releases the handle without touching the hardware.
    pub fn into_platform(self) -> P {
        self.platform
    }

    pub fn csb_read(&mut self, addr: u32) -> u32 {
        self.csb.read(&mut self.platform, addr)
    }

    pub fn csb_write(&mut self, addr: u32, value: u32) {
        self.csb.write(&mut self.platform, addr, value);
    }

    pub fn csb_update(&mut self, addr: u32, f: impl FnOnce(u32) -> u32) {
        self.csb.update(&mut self.platform, addr, f);
    }

    pub fn cfg_read(&mut self, offset: u32) -> u32 {
        self.platform.cfg_read(offset)
    }

    pub fn cfg_write(&mut self, offset: u32, value: u32) {
        self.platform.cfg_write(offset, value);
    }

    /// Copies `buf.len()` bytes out of context memory at `paddr`.
    pub fn read_mem(&mut self, paddr: u64, buf: &mut [u8]) {
        self.platform.read_physical(paddr, buf);
    }

    pub fn write_mem(&mut self, paddr: u64, buf: &[u8]) {
        self.platform.write_physical(paddr, buf);
    }

    pub fn endpoint_context(&mut self) -> EndpointContext {
        EndpointContext::read_from(&mut self.platform, self.layout.ep_context())
    }

    fn write_endpoint_context(&mut self, ctx: &EndpointContext) {
        ctx.write_to(&mut self.platform, self.layout.ep_context());
    }

    /// Loads the power-on defaults of the shared endpoint context.
    ///
    /// The endpoint link points back at the context itself since only one context is ever on the
    /// list.
    pub fn init_endpoint_context(&mut self) {
        let mut ctx = EndpointContext::default();
        ctx.set_interval(INTERVAL_1MS);
        ctx.set_cerr(DEFAULT_ERROR_COUNT);
        ctx.set_max_burst(0);
        ctx.set_cerr_count(DEFAULT_ERROR_COUNT);
        ctx.set_num_packets(0);
        ctx.set_link_management(false, false);
        ctx.set_hub_address(0);
        ctx.set_root_port(self.root_port);
        ctx.set_speed(Speed::High);
        ctx.set_list_flags(false, true);
        ctx.set_endpoint_link(self.layout.ep_context() as u32);
        self.write_endpoint_context(&ctx);

        self.info.b_max_packet_size0 = USB_HS_CONTROL_MAX_PACKETSIZE as u8;
        self.set_address_pending = false;
    }

    /// Loads the endpoint context for a transfer on `kind`.
    pub fn update_endpoint_context(&mut self, kind: EndpointKind) {
        self.active_kind = kind;
        let mut ctx = self.endpoint_context();
        ctx.set_endpoint_state(EndpointState::Running);
        ctx.set_endpoint_type(kind.endpoint_type());
        ctx.set_tr_dequeue_pointer(self.ring.base(), self.ring.cycle());
        ctx.set_device_address(self.info.device_address);
        ctx.set_fw_set_address(self.set_address_pending);
        ctx.set_status(ep_status::NONE);
        ctx.set_data_offset(0);

        match kind {
            EndpointKind::Control => {
                ctx.set_dci(DCI_CTRL);
                ctx.set_max_packet_size(u16::from(self.info.b_max_packet_size0));
                ctx.set_average_trb_len(USB_TRB_AVERAGE_CONTROL_LENGTH);
                ctx.set_seq_num(0);
            }
            EndpointKind::BulkIn | EndpointKind::BulkOut => {
                let (ep, dci) = if kind == EndpointKind::BulkIn {
                    let n = self.info.bulk_in.number;
                    (n, n * 2 + 1)
                } else {
                    let n = self.info.bulk_out.number;
                    (n, n * 2)
                };
                trace!(ep, dci, seq = self.seq.get(kind), "load bulk endpoint context");
                ctx.set_dci(dci);
                ctx.set_seq_num(self.seq.get(kind));
                ctx.set_max_packet_size(USB_HS_BULK_MAX_PACKETSIZE);
                ctx.set_average_trb_len(USB_TRB_AVERAGE_BULK_LENGTH);
            }
        }
        self.write_endpoint_context(&ctx);
    }

    fn pop(&mut self, cntrl: u32) {
        let v = self.csb_read(cntrl);
        self.csb_write(cntrl, v | QueueCntrl::POP.bits());
    }

    fn completion_subkind(&mut self) -> CompletionSubKind {
        CompletionSubKind::from_raw(self.csb_read(csb::HS_BI_COMPLQ_DWRD0))
    }

    /// Posts the endpoint context to the work queue.
    pub fn post_work_queue(&mut self) {
        let ptr = self.layout.ep_context();
        self.csb_write(csb::HS_BI_WORKQ_DWRD2, (ptr >> 32) as u32);
        self.csb_write(csb::HS_BI_WORKQ_DWRD0, regs::WORKQ_KIND_EPTLIST_BULK_INOUT);
        self.csb_write(csb::HS_BI_WORKQ_DWRD1, ptr as u32);
        self.status.phase = DriverPhase::WorkQSubmitted;
    }

    /// Waits for the completion-queue entry to drain to `NO_ACTIVITY`, then pops it.
    fn drain_to_idle(&mut self) -> bool {
        let polls = self.config.completion_polls;
        let idle = poll_until(self, polls, budget::TIMEOUT_1US, |h| {
            (h.completion_subkind() == CompletionSubKind::NoActivity).then_some(())
        });
        if idle.is_some() {
            self.pop(csb::HS_BI_COMPLQ_CNTRL);
        }
        idle.is_some()
    }

    /// Polls the endpoint context and completion queue for the outcome of the last submission.
    ///
    /// The consumed completion-queue entry is popped on every path.
    pub fn check_completion_queue(&mut self) -> Completion {
        self.status.phase = DriverPhase::CompQPollStart;
        let ep_ctx = self.layout.ep_context();
        let polls = self.config.completion_polls;

        let retired = poll_until(self, polls, budget::TIMEOUT_1US, |h| {
            let s = EndpointContext::read_from(&mut h.platform, ep_ctx).status();
            (s != ep_status::NONE && s < ep_status::RESCH_CSW).then_some(s)
        });
        let Some(ctx_status) = retired else {
            self.status.phase = DriverPhase::CompQPollError;
            self.pop(csb::HS_BI_COMPLQ_CNTRL);
            return Completion::Timeout;
        };
        let stalled = ctx_status == ep_status::ERR_STALL;

        let valid = poll_until(self, polls, budget::TIMEOUT_1US, |h| {
            let v = QueueCntrl::from_bits_truncate(h.csb_read(csb::HS_BI_COMPLQ_CNTRL));
            v.contains(QueueCntrl::VALID).then_some(())
        });
        if valid.is_none() {
            self.status.phase = DriverPhase::CompQPollError;
            self.pop(csb::HS_BI_COMPLQ_CNTRL);
            return Completion::Timeout;
        }

        let sub = self.completion_subkind();
        trace!(?sub, ctx_status, "completion queue entry");
        let mut outcome = match sub {
            CompletionSubKind::EndpointNotReady => {
                self.pop(csb::HS_BI_COMPLQ_CNTRL);
                self.status.phase = DriverPhase::CompQPollEnd;
                let polls = self.config.not_ready_polls;
                let ready = poll_until(self, polls, budget::TIMEOUT_10US, |h| {
                    (h.completion_subkind() != CompletionSubKind::EndpointNotReady).then_some(())
                });
                match ready {
                    Some(()) => {
                        self.pop(csb::HS_BI_COMPLQ_CNTRL);
                        Completion::Success
                    }
                    None => Completion::NotReady,
                }
            }
            CompletionSubKind::OperationError | CompletionSubKind::StopRequest => {
                self.pop(csb::HS_BI_COMPLQ_CNTRL);
                Completion::DeviceError
            }
            CompletionSubKind::EndpointError => {
                self.pop(csb::HS_BI_COMPLQ_CNTRL);
                Completion::EndpointError
            }
            CompletionSubKind::EndpointDone => {
                self.pop(csb::HS_BI_COMPLQ_CNTRL);
                self.status.phase = DriverPhase::CompQPollEnd;
                if self.drain_to_idle() {
                    let ctx = self.endpoint_context();
                    if let Some(kind) = EndpointKind::from_endpoint_type(ctx.endpoint_type()) {
                        self.seq.update(kind, stalled, ctx.seq_num());
                    }
                    Completion::Success
                } else {
                    Completion::Timeout
                }
            }
            CompletionSubKind::NoActivity | CompletionSubKind::Unknown(_) => {
                self.status.phase = DriverPhase::CompQPollError;
                self.pop(csb::HS_BI_COMPLQ_CNTRL);
                self.status.phase = DriverPhase::CompQPollEnd;
                if self.drain_to_idle() {
                    Completion::Success
                } else {
                    Completion::Timeout
                }
            }
        };

        self.platform.delay_us(budget::TIMEOUT_10US);
        if stalled {
            outcome = Completion::Stalled;
        }
        outcome
    }

    /// Reads the transfer event posted for an endpoint error and classifies it.
    pub fn drain_event_queue(&mut self) -> Result<()> {
        self.status.phase = DriverPhase::EventQPollStart;
        let polls = self.config.event_polls;
        let valid = poll_until(self, polls, budget::TIMEOUT_1US, |h| {
            let v = QueueCntrl::from_bits_truncate(h.csb_read(csb::EVENTQ_CNTRL1));
            v.contains(QueueCntrl::VALID).then_some(())
        });
        if valid.is_none() {
            self.status.phase = DriverPhase::EventQPollError;
            return Err(XusbError::Retry);
        }

        let dw = [
            self.csb_read(csb::EVENTQ_TRBDWRD0),
            self.csb_read(csb::EVENTQ_TRBDWRD1),
            self.csb_read(csb::EVENTQ_TRBDWRD2),
            self.csb_read(csb::EVENTQ_TRBDWRD3),
        ];
        self.pop(csb::EVENTQ_CNTRL1);

        let trb = Trb::from_dwords(dw);
        let (code, result) = classify_event(&trb);
        self.status.ep_status = code;
        self.status.phase = if trb.trb_type() == crate::trb::TrbType::EventData {
            DriverPhase::EventQPollEnd
        } else {
            DriverPhase::EventQPollError
        };
        trace!(?code, "transfer event");
        result
    }

    /// Posts the work queue and waits for the outcome, including event-queue refinement.
    pub fn submit_and_wait(&mut self) -> Result<()> {
        self.post_work_queue();
        self.platform.delay_us(self.config.settle_us);
        let result = match self.check_completion_queue() {
            Completion::EndpointError => self.drain_event_queue(),
            other => other.into_result(),
        };
        if result == Err(XusbError::Stalled) {
            // A halted endpoint restarts its data toggle however the stall was reported.
            self.seq.update(self.active_kind, true, 0);
        }
        self.status.last_error = result.err();
        result
    }

    /// Loads the context for `kind` and submits the TRBs already in the ring.
    pub fn transfer(&mut self, kind: EndpointKind) -> Result<()> {
        self.update_endpoint_context(kind);
        let r = self.submit_and_wait();
        if let Err(e) = r {
            trace!(?kind, %e, "transfer failed");
        }
        r
    }

    /// Zeroes the ring, e.g. before a fresh command sequence.
    pub fn clear_ring(&mut self) {
        self.ring.clear(&mut self.platform);
    }

    /// One Normal TRB on a bulk endpoint.
    pub fn bulk_transfer(&mut self, kind: EndpointKind, buffer: u64, len: u32) -> Result<()> {
        debug_assert!(kind != EndpointKind::Control);
        self.ring.prepare_normal(&mut self.platform, buffer, len)?;
        self.ring.prepare_end(&mut self.platform);
        self.transfer(kind)
    }

    fn queue_control(&mut self, req: &DeviceRequest) -> Result<()> {
        let cycle = self.ring.cycle();
        let trt = req.transfer_type();
        self.ring.push(
            &mut self.platform,
            Trb::setup_stage(req.to_bytes(), trt, cycle),
        )?;
        let dir_in = req.bm_request_type & REQUEST_TYPE_DIR_IN != 0;
        if req.w_length != 0 {
            let data = self.layout.data_buf();
            self.ring.push(
                &mut self.platform,
                Trb::data_stage(data, req.w_length, dir_in, cycle),
            )?;
        }
        self.ring
            .push(&mut self.platform, Trb::status_stage(!dir_in, cycle))?;
        self.ring.prepare_end(&mut self.platform);
        Ok(())
    }

    fn control_once(&mut self, req: &DeviceRequest) -> Result<()> {
        self.queue_control(req)?;
        self.transfer(EndpointKind::Control)
    }

    /// Runs a control request with the data stage (if any) in the data buffer.
    ///
    /// Retryable failures are retried up to the configured budget. A stall clears the halt on the
    /// control pipe and aborts the request with [`XusbError::Stalled`].
    pub fn control(&mut self, req: &DeviceRequest) -> Result<()> {
        req.validate()?;
        if usize::from(req.w_length) > DATA_BUF_SIZE {
            return Err(XusbError::BufferTooLarge {
                len: usize::from(req.w_length),
                capacity: DATA_BUF_SIZE,
            });
        }
        trace!(
            bm_request_type = req.bm_request_type,
            b_request = req.b_request,
            w_value = req.w_value,
            w_index = req.w_index,
            w_length = req.w_length,
            "control request"
        );

        let policy = self.config.control_retry;
        let result = retry(self, policy, |h, _| {
            let r = h.control_once(req);
            Attempt::from_result(r, XusbError::is_retryable)
        });
        match result {
            Err(XusbError::Stalled) => {
                warn!(b_request = req.b_request, "control pipe stalled");
                self.clear_endpoint_halt(EndpointKind::Control)?;
                Err(XusbError::Stalled)
            }
            other => other,
        }
    }

    /// Runs an IN control request and copies the data stage into `buf`.
    pub fn control_in(&mut self, req: &DeviceRequest, buf: &mut [u8]) -> Result<()> {
        self.control(req)?;
        let n = buf.len().min(usize::from(req.w_length));
        let data = self.layout.data_buf();
        self.platform.read_physical(data, &mut buf[..n]);
        Ok(())
    }

    /// Issues `CLEAR_FEATURE(ENDPOINT_HALT)` for `kind`.
    ///
    /// A stall while clearing means the device is not responding sensibly and is reported as
    /// [`XusbError::DeviceResponse`].
    pub fn clear_endpoint_halt(&mut self, kind: EndpointKind) -> Result<()> {
        let ep_addr = match kind {
            EndpointKind::Control => 0,
            EndpointKind::BulkOut => self.info.bulk_out.number,
            EndpointKind::BulkIn => self.info.bulk_in.number | 0x80,
        };
        let req = DeviceRequest::clear_endpoint_halt(ep_addr);
        match self.control_once(&req) {
            Err(XusbError::Stalled) => Err(XusbError::DeviceResponse),
            other => other,
        }
    }
}

impl<P: XusbPlatform> Delay for XusbHost<P> {
    fn delay_us(&mut self, us: u32) {
        self.platform.delay_us(us);
    }
}
