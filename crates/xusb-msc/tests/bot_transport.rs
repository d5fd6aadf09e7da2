use xusb_host::control::request;
use xusb_host::trb::CompletionCode;
use xusb_host::XusbError;
use xusb_msc::cbw::CSW_SIGNATURE;
use xusb_msc::scsi::opcode;
use xusb_msc::{MscError, ScsiCommand};
use xusb_sim::{CswFault, Fault, SimTransfer, BULK_IN_EP, BULK_OUT_EP};

mod util;

use util::{commands_since, disk, open};

#[test]
fn each_command_uses_a_fresh_tag_echoed_by_the_csw() {
    let mut msc = open(disk());
    let tags = msc.host().platform().device().tags().to_vec();
    assert_eq!(tags, vec![1, 2, 3, 4]);

    msc.test_unit_ready().unwrap();
    let status = msc.status();
    assert_eq!(status.csw_tag, 5);
    assert_eq!(status.csw_status, 0);
}

#[test]
fn command_with_data_runs_cbw_data_csw() {
    let mut msc = open(disk());
    msc.host_mut().platform_mut().clear_transfers();

    msc.execute(ScsiCommand::Inquiry).unwrap();
    assert_eq!(
        msc.host().platform().transfers(),
        &[
            SimTransfer::BulkOut {
                ep: BULK_OUT_EP,
                len: 31
            },
            SimTransfer::BulkIn {
                ep: BULK_IN_EP,
                len: 36
            },
            SimTransfer::BulkIn {
                ep: BULK_IN_EP,
                len: 13
            },
        ]
    );
}

#[test]
fn command_failed_status_is_retried_with_a_new_tag() {
    let mut msc = open(disk());
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::Status(1));
    let start = msc.host().platform().device().commands().len();

    assert_eq!(msc.test_unit_ready(), Ok(()));
    assert_eq!(
        commands_since(&msc, start),
        vec![opcode::TEST_UNIT_READY, opcode::TEST_UNIT_READY]
    );
    let tags = msc.host().platform().device().tags();
    assert_ne!(tags[tags.len() - 1], tags[tags.len() - 2]);
}

#[test]
fn persistent_command_failure_is_reported_after_budget() {
    let mut msc = open(disk());
    for _ in 0..3 {
        msc.host_mut()
            .platform_mut()
            .device_mut()
            .inject_csw_fault(CswFault::Status(1));
    }
    let start = msc.host().platform().device().commands().len();
    assert_eq!(
        msc.test_unit_ready(),
        Err(MscError::CommandFailed {
            opcode: opcode::TEST_UNIT_READY
        })
    );
    assert_eq!(commands_since(&msc, start).len(), 3);
    assert_eq!(msc.status().csw_status, 1);
}

#[test]
fn phase_error_triggers_reset_recovery_without_retry() {
    let mut msc = open(disk());
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::Status(2));
    let start = msc.host().platform().device().commands().len();

    assert_eq!(msc.test_unit_ready(), Err(MscError::PhaseError));
    assert_eq!(commands_since(&msc, start).len(), 1);
    assert_eq!(msc.host().platform().device().halts_cleared(), 1);

    // The device is usable after recovery.
    assert_eq!(msc.test_unit_ready(), Ok(()));
}

#[test]
fn phase_error_survives_failed_halt_recovery() {
    let mut msc = open(disk());
    let dev = msc.host_mut().platform_mut().device_mut();
    dev.inject_csw_fault(CswFault::Status(2));
    dev.stall_request(request::CLEAR_FEATURE);

    assert_eq!(msc.test_unit_ready(), Err(MscError::PhaseError));
    assert_eq!(msc.host().platform().device().halts_cleared(), 0);
    assert_eq!(msc.test_unit_ready(), Ok(()));
}

#[test]
fn csw_with_wrong_tag_is_a_phase_error() {
    let mut msc = open(disk());
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::WrongTag);
    assert_eq!(msc.test_unit_ready(), Err(MscError::PhaseError));
    assert_eq!(msc.host().platform().device().halts_cleared(), 1);
    // A rejected CSW is not recorded.
    assert_eq!(msc.status().csw_tag, 4);
}

#[test]
fn csw_with_bad_signature_is_a_phase_error() {
    let mut msc = open(disk());
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::BadSignature);
    assert_eq!(msc.inquiry(), Err(MscError::PhaseError));
    assert_ne!(CSW_SIGNATURE, 0xdead_beef);
}

#[test]
fn stalled_data_stage_clears_bulk_in_halt() {
    let mut msc = open(disk());
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::StallDataIn);

    assert_eq!(
        msc.read_capacity(),
        Err(MscError::Transport(XusbError::Stalled))
    );
    let dev = msc.host().platform().device();
    assert_eq!(dev.halts_cleared(), 1);
    assert_eq!(dev.is_halted(), (false, false));
    assert_eq!(msc.host().sequence_numbers().bulk_in, 0);

    assert_eq!(msc.read_capacity(), Ok((255, 512)));
}

#[test]
fn stalled_status_stage_clears_bulk_in_halt() {
    let mut msc = open(disk());
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::StallCsw);
    assert_eq!(
        msc.test_unit_ready(),
        Err(MscError::Transport(XusbError::Stalled))
    );
    assert_eq!(msc.host().platform().device().is_halted(), (false, false));
}

#[test]
fn transient_transport_errors_rerun_the_whole_command() {
    let mut msc = open(disk());
    msc.host_mut()
        .platform_mut()
        .inject(Fault::EndpointError(CompletionCode::UsbTransactionError));
    let start = msc.host().platform().device().commands().len();

    assert_eq!(msc.inquiry(), Ok(0));
    // The first CBW never reached the device.
    assert_eq!(commands_since(&msc, start), vec![opcode::INQUIRY]);
}

#[test]
fn exhausted_transport_retries_return_last_error() {
    let mut msc = open(disk());
    let sim = msc.host_mut().platform_mut();
    for _ in 0..3 {
        sim.inject(Fault::Hang);
    }
    let before = sim.submissions();
    let t0 = sim.elapsed_us();

    assert_eq!(
        msc.test_unit_ready(),
        Err(MscError::Transport(XusbError::Timeout))
    );
    let sim = msc.host().platform();
    assert_eq!(sim.submissions() - before, 3);
    // Two 1 ms gaps between the three attempts.
    assert!(sim.elapsed_us() - t0 >= 2_000);
}

#[test]
fn fatal_transport_error_is_not_retried() {
    let mut msc = open(disk());
    let sim = msc.host_mut().platform_mut();
    sim.inject(Fault::EndpointError(CompletionCode::TrbError));
    let before = sim.submissions();

    assert_eq!(
        msc.test_unit_ready(),
        Err(MscError::Transport(XusbError::Completion(
            CompletionCode::TrbError
        )))
    );
    assert_eq!(msc.host().platform().submissions() - before, 1);
}
