//! Fixed-size per-chunk bitset, one bit per page, used to remember the true
//! value of the bit the reclaim sentinel borrows from the page's last byte.

use bitvec::prelude::{BitVec, Lsb0};

/// A bitset of exactly `len` bits, all initially clear.
#[derive(Clone, Debug)]
pub(crate) struct Bitset {
    bits: BitVec<u8, Lsb0>,
}

impl Bitset {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    pub(crate) fn get(&self, idx: usize) -> bool {
        self.bits[idx]
    }

    pub(crate) fn set(&mut self, idx: usize, value: bool) {
        self.bits.set(idx, value);
    }
}
