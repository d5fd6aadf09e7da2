use xusb_host::trb::CompletionCode;
use xusb_host::{EndpointKind, XusbError};
use xusb_sim::{CswFault, Fault, SimTransfer, BULK_IN_EP, BULK_OUT_EP};

mod util;

use util::{disk, enumerated_host, SimHost};

/// Hand-built TEST UNIT READY wrapper with the given tag.
fn test_unit_ready_cbw(tag: u32) -> [u8; 31] {
    let mut cbw = [0u8; 31];
    cbw[0..4].copy_from_slice(b"USBC");
    cbw[4..8].copy_from_slice(&tag.to_le_bytes());
    cbw[14] = 6;
    cbw
}

fn send_cbw(host: &mut SimHost, tag: u32) -> Result<(), XusbError> {
    let buf = host.layout().cmd_buf();
    host.write_mem(buf, &test_unit_ready_cbw(tag));
    host.bulk_transfer(EndpointKind::BulkOut, buf, 31)
}

fn receive_csw(host: &mut SimHost) -> Result<[u8; 13], XusbError> {
    let buf = host.layout().sts_buf();
    host.bulk_transfer(EndpointKind::BulkIn, buf, 13)?;
    let mut csw = [0u8; 13];
    host.read_mem(buf, &mut csw);
    Ok(csw)
}

#[test]
fn bulk_transfers_reach_the_enumerated_endpoints() {
    let mut host = enumerated_host(disk());
    host.platform_mut().clear_transfers();

    send_cbw(&mut host, 0x1234).unwrap();
    let csw = receive_csw(&mut host).unwrap();
    assert_eq!(&csw[0..4], b"USBS");
    assert_eq!(&csw[4..8], &0x1234u32.to_le_bytes());
    assert_eq!(csw[12], 0);

    assert_eq!(
        host.platform().transfers(),
        &[
            SimTransfer::BulkOut {
                ep: BULK_OUT_EP,
                len: 31
            },
            SimTransfer::BulkIn {
                ep: BULK_IN_EP,
                len: 13
            },
        ]
    );
}

#[test]
fn sequence_numbers_follow_the_endpoint_context() {
    let mut host = enumerated_host(disk());
    assert_eq!(host.sequence_numbers().bulk_in, 0);
    assert_eq!(host.sequence_numbers().bulk_out, 0);

    for round in 1..=3u8 {
        send_cbw(&mut host, u32::from(round)).unwrap();
        assert_eq!(
            host.sequence_numbers().bulk_out,
            host.endpoint_context().seq_num()
        );
        receive_csw(&mut host).unwrap();
        assert_eq!(
            host.sequence_numbers().bulk_in,
            host.endpoint_context().seq_num()
        );
        assert_eq!(host.sequence_numbers().bulk_in, round);
        assert_eq!(host.sequence_numbers().bulk_out, round);
    }
}

#[test]
fn stall_on_bulk_in_resets_only_its_sequence_number() {
    let mut host = enumerated_host(disk());
    send_cbw(&mut host, 1).unwrap();
    receive_csw(&mut host).unwrap();

    host.platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::StallCsw);
    send_cbw(&mut host, 2).unwrap();
    assert_eq!(receive_csw(&mut host), Err(XusbError::Stalled));

    let seq = host.sequence_numbers();
    assert_eq!(seq.bulk_in, 0);
    assert_eq!(seq.bulk_out, 2);

    host.clear_endpoint_halt(EndpointKind::BulkIn).unwrap();
    assert_eq!(host.platform().device().is_halted(), (false, false));
    assert_eq!(host.platform().device().halts_cleared(), 1);
}

#[test]
fn stall_reported_through_event_queue_resets_sequence_number() {
    let mut host = enumerated_host(disk());
    send_cbw(&mut host, 1).unwrap();
    receive_csw(&mut host).unwrap();
    assert_eq!(host.sequence_numbers().bulk_in, 1);
    assert_eq!(host.sequence_numbers().bulk_out, 1);

    host.platform_mut()
        .inject(Fault::EndpointError(CompletionCode::Stall));
    let buf = host.layout().sts_buf();
    assert_eq!(
        host.bulk_transfer(EndpointKind::BulkIn, buf, 13),
        Err(XusbError::Stalled)
    );
    assert_eq!(host.status().ep_status, CompletionCode::Stall);

    let seq = host.sequence_numbers();
    assert_eq!(seq.bulk_in, 0);
    assert_eq!(seq.bulk_out, 1);
}

#[test]
fn stall_reported_through_event_queue_on_bulk_out() {
    let mut host = enumerated_host(disk());
    send_cbw(&mut host, 1).unwrap();
    receive_csw(&mut host).unwrap();

    host.platform_mut()
        .inject(Fault::EndpointError(CompletionCode::Stall));
    assert_eq!(send_cbw(&mut host, 2), Err(XusbError::Stalled));

    let seq = host.sequence_numbers();
    assert_eq!(seq.bulk_out, 0);
    assert_eq!(seq.bulk_in, 1);
}
