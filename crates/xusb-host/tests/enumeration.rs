use xusb_host::control::{descriptor_type, request};
use xusb_host::{EndpointKind, XusbError};
use xusb_sim::{SimMassStorage, SimTransfer, BULK_IN_EP, BULK_OUT_EP};

mod util;

use util::{disk, ready_host};

/// A class-specific descriptor used to push interfaces further into the configuration.
fn filler(len: u8) -> Vec<u8> {
    let mut d = vec![0u8; usize::from(len)];
    d[0] = len;
    d[1] = 0x24;
    d
}

fn get_descriptor_lengths(transfers: &[SimTransfer]) -> Vec<u16> {
    transfers
        .iter()
        .filter_map(|t| match t {
            SimTransfer::Control(req) if req.b_request == request::GET_DESCRIPTOR => {
                Some(req.w_length)
            }
            _ => None,
        })
        .collect()
}

fn control_requests(transfers: &[SimTransfer]) -> Vec<u8> {
    transfers
        .iter()
        .filter_map(|t| match t {
            SimTransfer::Control(req) => Some(req.b_request),
            _ => None,
        })
        .collect()
}

fn interface(number: u8, protocol: u8, ep_in: u8, ep_out: u8) -> Vec<u8> {
    vec![
        9,
        descriptor_type::INTERFACE,
        number,
        0,
        2,
        0x08,
        0x06,
        protocol,
        0,
        7,
        descriptor_type::ENDPOINT,
        0x80 | ep_in,
        0x02,
        0x00,
        0x02,
        0,
        7,
        descriptor_type::ENDPOINT,
        ep_out,
        0x02,
        0x00,
        0x02,
        0,
    ]
}

fn config_descriptor(interfaces: &[Vec<u8>]) -> Vec<u8> {
    let mut d = vec![
        9,
        descriptor_type::CONFIGURATION,
        0,
        0,
        interfaces.len() as u8,
        1,
        0,
        0x80,
        50,
    ];
    for i in interfaces {
        d.extend_from_slice(i);
    }
    let total = (d.len() as u16).to_le_bytes();
    d[2] = total[0];
    d[3] = total[1];
    d
}

#[test]
fn enumeration_assigns_address_and_configures_bot_interface() {
    let mut host = ready_host(disk());
    let info = host.enumerate().unwrap();

    assert_eq!(info.device_address, 1);
    assert_eq!(info.b_max_packet_size0, 64);
    assert_eq!(info.id_vendor, 0x0781);
    assert_eq!(info.id_product, 0x5581);
    assert_eq!(info.configuration_value, 1);
    assert_eq!(info.interface_number, 0);
    assert_eq!(info.interface_protocol, 0x50);
    assert_eq!(info.bulk_in.number, BULK_IN_EP);
    assert_eq!(info.bulk_out.number, BULK_OUT_EP);
    assert_eq!(info.max_lun, 0);
    assert_eq!(host.enumeration(), &info);

    let sim = host.platform();
    assert_eq!(sim.device_address(), 1);
    assert_eq!(sim.device().configuration(), 1);
}

#[test]
fn enumeration_issues_standard_request_sequence() {
    let mut host = ready_host(disk());
    host.enumerate().unwrap();

    assert_eq!(
        control_requests(host.platform().transfers()),
        vec![
            request::GET_DESCRIPTOR,
            request::SET_ADDRESS,
            request::GET_DESCRIPTOR,
            request::GET_DESCRIPTOR,
            request::GET_DESCRIPTOR,
            request::SET_CONFIGURATION,
            request::GET_MAX_LUN,
        ]
    );

    assert_eq!(
        get_descriptor_lengths(host.platform().transfers()),
        vec![18, 18, 9, 32]
    );
}

#[test]
fn stalled_get_max_lun_falls_back_to_lun_zero() {
    let mut host = ready_host(disk().with_max_lun(None));
    let info = host.enumerate().unwrap();
    assert_eq!(info.max_lun, 0);

    // The stall is cleared on the control pipe.
    let last = host.platform().transfers().last().copied();
    let Some(SimTransfer::Control(req)) = last else {
        panic!("expected a control transfer, got {last:?}");
    };
    assert_eq!(req.b_request, request::CLEAR_FEATURE);
    assert_eq!(req.w_index, 0);
}

#[test]
fn reported_max_lun_is_recorded() {
    let mut host = ready_host(disk().with_max_lun(Some(3)));
    assert_eq!(host.enumerate().unwrap().max_lun, 3);
}

#[test]
fn bulk_only_interface_is_selected_over_other_mass_storage_protocols() {
    let desc = config_descriptor(&[
        interface(0, 0x62, 3, 4),
        interface(1, 0x50, BULK_IN_EP, BULK_OUT_EP),
    ]);
    let mut host = ready_host(SimMassStorage::new(64, 512).with_config_descriptor(desc));
    let info = host.enumerate().unwrap();
    assert_eq!(info.interface_number, 1);
    assert_eq!(info.bulk_in.number, BULK_IN_EP);
    assert_eq!(info.bulk_out.number, BULK_OUT_EP);
}

#[test]
fn configuration_without_bulk_only_interface_is_a_parse_error() {
    let desc = config_descriptor(&[interface(0, 0x06, 1, 2), interface(1, 0x06, 3, 4)]);
    let mut host = ready_host(SimMassStorage::new(64, 512).with_config_descriptor(desc));
    assert!(matches!(host.enumerate(), Err(XusbError::ParseError(_))));
    assert_eq!(host.platform().device().configuration(), 0);
}

#[test]
fn failed_set_address_leaves_device_unaddressed() {
    let mut dev = disk();
    dev.stall_request(request::SET_ADDRESS);
    let mut host = ready_host(dev);

    assert_eq!(host.enumerate(), Err(XusbError::Stalled));
    assert_eq!(host.enumeration().device_address, 0);
    assert_eq!(host.platform().device_address(), 0);
}

#[test]
fn control_packet_size_follows_descriptor_read_at_new_address() {
    let mut host = ready_host(disk().with_ep0_packet_sizes(&[8, 64]));
    let info = host.enumerate().unwrap();

    assert_eq!(info.b_max_packet_size0, 64);
    assert_eq!(info.b_num_configurations, 1);
    // GET_MAX_LUN was the last transfer, on the control pipe.
    let ctx = host.endpoint_context();
    assert_eq!(
        EndpointKind::from_endpoint_type(ctx.endpoint_type()),
        Some(EndpointKind::Control)
    );
    assert_eq!(ctx.max_packet_size(), 64);
}

#[test]
fn long_configuration_is_read_up_to_the_data_buffer() {
    let mut interfaces = vec![interface(0, 0x50, BULK_IN_EP, BULK_OUT_EP)];
    interfaces.extend((0..7).map(|_| filler(40)));
    let desc = config_descriptor(&interfaces);
    assert!(desc.len() > 256);

    let mut host = ready_host(SimMassStorage::new(64, 512).with_config_descriptor(desc));
    let info = host.enumerate().unwrap();
    assert_eq!(info.interface_number, 0);
    assert_eq!(
        get_descriptor_lengths(host.platform().transfers()),
        vec![18, 18, 9, 256]
    );
}

#[test]
fn interface_past_the_data_buffer_is_a_parse_error() {
    let mut interfaces: Vec<Vec<u8>> = (0..6).map(|_| filler(40)).collect();
    interfaces.push(interface(0, 0x50, BULK_IN_EP, BULK_OUT_EP));
    let desc = config_descriptor(&interfaces);

    let mut host = ready_host(SimMassStorage::new(64, 512).with_config_descriptor(desc));
    assert!(matches!(host.enumerate(), Err(XusbError::ParseError(_))));
}
