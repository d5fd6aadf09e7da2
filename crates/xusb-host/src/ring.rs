//! Producer side of the boot transfer ring.
//!
//! The ring holds exactly one transfer descriptor sequence at a time (one Normal TRB, or the
//! Setup/Data/Status stages of a control request) followed by a reserved end marker whose cycle bit
//! is the complement of the producer cycle state. Writing the end marker rewinds the cursor to the
//! ring base, so the ring never wraps and the cycle state stays fixed for the lifetime of the
//! driver.

use crate::error::{Result, XusbError};
use crate::trb::{Trb, TRB_LEN};
use crate::MemoryBus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRing {
    base: u64,
    capacity: usize,
    cursor: usize,
    cycle: bool,
}

impl TransferRing {
    /// Creates a ring of `size` bytes at `base` with the given producer cycle state.
    pub fn new(base: u64, size: usize, cycle: bool) -> Self {
        Self {
            base,
            capacity: size / TRB_LEN,
            cursor: 0,
            cycle,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn cycle(&self) -> bool {
        self.cycle
    }

    /// Number of live TRBs written since the last end marker.
    pub fn pending(&self) -> usize {
        self.cursor
    }

    fn slot_addr(&self, idx: usize) -> u64 {
        self.base + (idx * TRB_LEN) as u64
    }

    /// Writes `trb` at the cursor and advances it. The last slot is reserved for the end marker.
    pub fn push(&mut self, mem: &mut (impl MemoryBus + ?Sized), trb: Trb) -> Result<u64> {
        if self.cursor + 1 >= self.capacity {
            return Err(XusbError::RingFull);
        }
        let addr = self.slot_addr(self.cursor);
        trb.write_to(mem, addr);
        self.cursor += 1;
        Ok(addr)
    }

    /// Queues one Normal TRB covering `len` bytes at `buffer`.
    pub fn prepare_normal(
        &mut self,
        mem: &mut (impl MemoryBus + ?Sized),
        buffer: u64,
        len: u32,
    ) -> Result<u64> {
        self.push(mem, Trb::normal(buffer, len, self.cycle))
    }

    /// Terminates the live sequence and rewinds the cursor to the ring base.
    pub fn prepare_end(&mut self, mem: &mut (impl MemoryBus + ?Sized)) {
        let addr = self.slot_addr(self.cursor);
        Trb::end_marker(self.cycle).write_to(mem, addr);
        self.cursor = 0;
    }

    /// Zeroes the ring memory and rewinds the cursor.
    pub fn clear(&mut self, mem: &mut (impl MemoryBus + ?Sized)) {
        mem.fill_physical(self.base, self.capacity * TRB_LEN, 0);
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trb::TrbType;

    struct VecMem(Vec<u8>);

    impl MemoryBus for VecMem {
        fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
            let start = paddr as usize;
            buf.copy_from_slice(&self.0[start..start + buf.len()]);
        }

        fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
            let start = paddr as usize;
            self.0[start..start + buf.len()].copy_from_slice(buf);
        }
    }

    #[test]
    fn normal_then_end_marker_rewinds() {
        let mut mem = VecMem(vec![0; 0x200]);
        let mut ring = TransferRing::new(0x100, 0x100, true);

        let addr = ring.prepare_normal(&mut mem, 0x4000, 31).unwrap();
        assert_eq!(addr, 0x100);
        ring.prepare_end(&mut mem);
        assert_eq!(ring.pending(), 0);

        let first = Trb::read_from(&mut mem, 0x100);
        assert_eq!(first.trb_type(), TrbType::Normal);
        assert_eq!(first.parameter, 0x4000);
        assert_eq!(first.transfer_len(), 31);
        assert!(first.cycle());

        let end = Trb::read_from(&mut mem, 0x110);
        assert_eq!(end.trb_type(), TrbType::Reserved);
        assert!(!end.cycle());
    }

    #[test]
    fn push_refuses_end_marker_slot() {
        let mut mem = VecMem(vec![0; 0x40]);
        let mut ring = TransferRing::new(0, 0x30, false);
        ring.prepare_normal(&mut mem, 0, 1).unwrap();
        ring.prepare_normal(&mut mem, 0, 1).unwrap();
        assert_eq!(
            ring.prepare_normal(&mut mem, 0, 1),
            Err(XusbError::RingFull)
        );
    }

    #[test]
    fn clear_zeroes_ring() {
        let mut mem = VecMem(vec![0xaa; 0x200]);
        let mut ring = TransferRing::new(0x100, 0x100, true);
        ring.prepare_normal(&mut mem, 0x4000, 8).unwrap();
        ring.clear(&mut mem);
        assert!(mem.0[0x100..0x200].iter().all(|&b| b == 0));
        assert!(mem.0[..0x100].iter().all(|&b| b == 0xaa));
        assert_eq!(ring.pending(), 0);
    }
}
