//! Cache configuration.
//!
//! A chainable builder, in the style of the teacher crate's
//! `SecStackSinglePageAlloc::new`/`with_zeroizer`/`with_default_zeroizer`
//! constructors.

use crate::error::CacheError;
use crate::internals::mmap;

/// Lower bound on `number_of_chunks`: few enough chunks defeats the point of
/// coarse, amortized eviction.
pub const MIN_CHUNKS: u8 = 8;
/// Upper bound on `number_of_chunks`: a chunk index must fit in a signed
/// 8-bit integer (the reference implementation packs it into a tagged byte
/// alongside the page index).
pub const MAX_CHUNKS: u8 = 127;

/// The whole-chunk eviction strategy used under admission pressure.
///
/// The reference implementation tried both of these; both are kept as an
/// explicit, pluggable choice rather than picking a winner, per the design
/// note in `SPEC_FULL.md` §11.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Evict a uniformly random chunk. Approximates random replacement
    /// cheaply, without per-entry metadata.
    #[default]
    Random,
    /// Evict chunks in a fixed rotation.
    RoundRobin,
}

/// Configuration for a [`crate::PageCache`].
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub(crate) capacity_bytes: usize,
    pub(crate) number_of_chunks: u8,
    pub(crate) page_size: usize,
    pub(crate) eviction: EvictionPolicy,
    /// The advisory hint applied to a chunk once the cache moves on from it
    /// (see `advance_chunk` in `SPEC_FULL.md` §4.5). `LazyFree` is right for
    /// anonymous chunks; `Cold` is the appropriate choice for file-backed
    /// chunks, since `MADV_FREE` does not apply to shared file mappings.
    pub(crate) idle_hint: mmap::AdviseHint,
}

impl CacheConfig {
    /// Starts from the crate's defaults: 16 chunks, the OS page size, random
    /// eviction, and the lazy-free idle hint.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            number_of_chunks: 16,
            page_size: mmap::page_size(),
            eviction: EvictionPolicy::default(),
            idle_hint: mmap::AdviseHint::LazyFree,
        }
    }

    pub fn with_chunks(mut self, number_of_chunks: u8) -> Self {
        self.number_of_chunks = number_of_chunks;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    /// Use `Cold` instead of `LazyFree` as the idle-chunk hint; appropriate
    /// when paired with [`crate::internals::mmap::FileBackedMapper`].
    pub fn with_cold_idle_hint(mut self) -> Self {
        self.idle_hint = mmap::AdviseHint::Cold;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        if !(MIN_CHUNKS..=MAX_CHUNKS).contains(&self.number_of_chunks) {
            return Err(CacheError::InvalidConfig(
                "number_of_chunks must be between 8 and 127",
            ));
        }
        if self.page_size == 0 || self.page_size % 8 != 0 {
            return Err(CacheError::InvalidConfig(
                "page_size must be a positive multiple of 8",
            ));
        }
        if self.capacity_bytes % (self.number_of_chunks as usize) != 0 {
            return Err(CacheError::InvalidConfig(
                "capacity_bytes must be a multiple of number_of_chunks",
            ));
        }
        let chunk_size = self.capacity_bytes / self.number_of_chunks as usize;
        if chunk_size % self.page_size != 0 || chunk_size == 0 {
            return Err(CacheError::InvalidConfig(
                "each chunk must be a whole, non-zero number of pages",
            ));
        }
        Ok(())
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.capacity_bytes / self.number_of_chunks as usize
    }

    pub(crate) fn pages_per_chunk(&self) -> usize {
        self.chunk_size() / self.page_size
    }
}
