//! The key→location map. Keyed by the cache's 64-bit integer keys, so a
//! fast integer hasher (`rustc-hash`'s `FxHash`, as used elsewhere in the
//! wider pageserver-family codebases this crate is modeled on) is a better
//! fit than the default SipHash.

use rustc_hash::FxHashMap;

/// Where a live entry's page lives: which chunk, and which page within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotRef {
    pub(crate) chunk: u8,
    pub(crate) page: u32,
}

pub(crate) type SlotMap = FxHashMap<u64, SlotRef>;
