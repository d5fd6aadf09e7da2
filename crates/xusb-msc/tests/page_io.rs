use proptest::prelude::*;
use xusb_msc::scsi::{opcode, sense_key};
use xusb_msc::MscError;
use xusb_sim::CswFault;

mod util;

use util::{commands_since, disk, open, pattern, BLOCK_LEN, BULK_BUFFER_LEN};

const PAGE: usize = BLOCK_LEN as usize;

#[test]
fn write_page_lands_at_page_lba() {
    let mut msc = open(disk());
    let data = pattern(PAGE, 7);
    msc.write_page(1, 3, &data).unwrap();

    // Block 1 starts at LBA 32.
    let lba = 32 + 3;
    let disk = msc.host().platform().device().disk();
    assert_eq!(&disk[lba * PAGE..(lba + 1) * PAGE], &data[..]);
}

#[test]
fn read_page_returns_medium_contents() {
    let mut dev = disk();
    let data = pattern(2 * PAGE, 42);
    dev.disk_mut()[5 * PAGE..7 * PAGE].copy_from_slice(&data);
    let mut msc = open(dev);

    let mut out = vec![0u8; 2 * PAGE];
    msc.read_page(0, 5, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn page_outside_block_is_rejected_without_traffic() {
    let mut msc = open(disk());
    let before = msc.host().platform().submissions();
    let mut out = [0u8; PAGE];
    assert_eq!(
        msc.read_page(0, 32, &mut out),
        Err(MscError::InvalidPage {
            page: 32,
            pages_per_block: 32
        })
    );
    assert_eq!(msc.host().platform().submissions(), before);
}

#[test]
fn transfer_length_must_be_whole_blocks_within_bulk_buffer() {
    let mut msc = open(disk());
    for len in [0, 100, PAGE + 1, BULK_BUFFER_LEN + PAGE] {
        let mut out = vec![0u8; len];
        assert_eq!(
            msc.read_page(0, 0, &mut out),
            Err(MscError::InvalidLength {
                len,
                block_len: BLOCK_LEN
            })
        );
    }
}

#[test]
fn failed_read_fetches_sense_data() {
    let mut msc = open(disk());
    let start = msc.host().platform().device().commands().len();
    let mut out = [0u8; PAGE];

    // Block 100 is past the end of the 256-block medium.
    assert_eq!(
        msc.read_page(100, 0, &mut out),
        Err(MscError::CommandFailed {
            opcode: opcode::READ_10
        })
    );
    let cmds = commands_since(&msc, start);
    assert_eq!(cmds.len(), 10);
    assert!(cmds[..9].iter().all(|&c| c == opcode::READ_10));
    assert_eq!(cmds[9], opcode::REQUEST_SENSE);
    assert_eq!(msc.status().sense_key, sense_key::ILLEGAL_REQUEST);
}

#[test]
fn page_error_outlives_the_sense_request() {
    let mut msc = open(disk());
    assert_eq!(msc.last_error(), None);
    let mut out = [0u8; PAGE];

    let failed = MscError::CommandFailed {
        opcode: opcode::READ_10,
    };
    assert_eq!(msc.read_page(100, 0, &mut out), Err(failed));
    assert_eq!(msc.last_error(), Some(failed));
    // The REQUEST SENSE that followed succeeded at the transport level.
    assert_eq!(msc.status().last_error, None);

    msc.read_page(0, 0, &mut out).unwrap();
    assert_eq!(msc.last_error(), None);

    let invalid = MscError::InvalidLength {
        len: 100,
        block_len: BLOCK_LEN,
    };
    assert_eq!(msc.write_page(0, 0, &out[..100]), Err(invalid));
    assert_eq!(msc.last_error(), Some(invalid));
}

#[test]
fn short_page_read_is_retried() {
    let mut dev = disk();
    let data = pattern(2 * PAGE, 3);
    dev.disk_mut()[..2 * PAGE].copy_from_slice(&data);
    let mut msc = open(dev);
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::Residue(256));
    let start = msc.host().platform().device().commands().len();

    let mut out = vec![0u8; 2 * PAGE];
    msc.read_page(0, 0, &mut out).unwrap();
    assert_eq!(out, data);
    assert_eq!(
        commands_since(&msc, start),
        vec![opcode::READ_10, opcode::READ_10]
    );
}

#[test]
fn persistent_residue_fails_the_page_read() {
    let mut msc = open(disk());
    for _ in 0..9 {
        msc.host_mut()
            .platform_mut()
            .device_mut()
            .inject_csw_fault(CswFault::Residue(256));
    }
    let start = msc.host().platform().device().commands().len();

    let mut out = vec![0u8; 2 * PAGE];
    let short = MscError::ShortTransfer {
        opcode: opcode::READ_10,
        residue: 256,
    };
    assert_eq!(msc.read_page(0, 0, &mut out), Err(short));
    assert_eq!(msc.last_error(), Some(short));
    assert_eq!(msc.status().data_residue, 256);
    // Three page attempts of three BOT attempts each; no sense request for a short transfer.
    let cmds = commands_since(&msc, start);
    assert_eq!(cmds.len(), 9);
    assert!(cmds.iter().all(|&c| c == opcode::READ_10));
}

#[test]
fn short_page_write_is_an_error() {
    let mut msc = open(disk());
    for _ in 0..9 {
        msc.host_mut()
            .platform_mut()
            .device_mut()
            .inject_csw_fault(CswFault::Residue(PAGE as u32));
    }
    let data = pattern(PAGE, 5);
    assert_eq!(
        msc.write_page(0, 0, &data),
        Err(MscError::ShortTransfer {
            opcode: opcode::WRITE_10,
            residue: PAGE as u32
        })
    );
}

#[test]
fn stalled_page_read_is_retried_after_halt_recovery() {
    let mut dev = disk();
    let data = pattern(PAGE, 9);
    dev.disk_mut()[..PAGE].copy_from_slice(&data);
    let mut msc = open(dev);
    msc.host_mut()
        .platform_mut()
        .device_mut()
        .inject_csw_fault(CswFault::StallDataIn);

    let mut out = vec![0u8; PAGE];
    msc.read_page(0, 0, &mut out).unwrap();
    assert_eq!(out, data);
    assert_eq!(msc.host().platform().device().halts_cleared(), 1);
}

#[test]
fn full_bulk_buffer_transfer() {
    let mut msc = open(disk());
    let data = pattern(BULK_BUFFER_LEN, 1);
    msc.write_page(2, 0, &data).unwrap();
    let mut out = vec![0u8; BULK_BUFFER_LEN];
    msc.read_page(2, 0, &mut out).unwrap();
    assert_eq!(out, data);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn write_then_read_round_trips(
        block in 0u32..8,
        page in 0u32..32,
        pages in 1usize..4,
        seed in any::<u8>(),
    ) {
        let pages = pages.min(32 - page as usize);
        let mut msc = open(disk());
        let data = pattern(pages * PAGE, seed);

        let mut before = vec![0u8; data.len()];
        msc.read_page(block, page, &mut before).unwrap();
        msc.write_page(block, page, &data).unwrap();
        let mut after = vec![0u8; data.len()];
        msc.read_page(block, page, &mut after).unwrap();

        prop_assert_eq!(after, data);
        prop_assert!(before.iter().all(|&b| b == 0));
    }
}
