//! `FtCache`: a fall-through key/value adapter over [`PageCache`].
//!
//! Where `PageCache` only ever returns what is already resident, `FtCache`
//! always produces a value: on a miss (or a reclaim-induced loss), it calls
//! back into the caller to regenerate the entry and stores the result before
//! returning it. See `SPEC_FULL.md` §4.6.

use crate::error::CacheError;
use crate::internals::mmap::PageAdvisor;
use crate::page_cache::{CacheStats, PageCache};

/// Regenerates the value for `key` into `out`, which is exactly
/// `entry_size()` bytes.
///
/// Implemented for any `FnMut(u64, &mut [u8])`, so a closure is usually
/// enough; implement the trait directly for a refill source that needs its
/// own state (a seeded generator, a backing store handle, ...).
pub trait Refill {
    fn refill(&mut self, key: u64, out: &mut [u8]);
}

impl<F: FnMut(u64, &mut [u8])> Refill for F {
    fn refill(&mut self, key: u64, out: &mut [u8]) {
        self(key, out)
    }
}

/// A `PageCache` plus a [`Refill`] source, so every `get` succeeds.
///
/// Entries are fixed-length payloads of at most `page_size() - 1` bytes,
/// stored one per page, flush against the sentinel end: the payload occupies
/// the page's last `entry_size()` bytes, so the sentinel check at
/// `page_size() - 1` automatically covers its final byte too.
pub struct FtCache<A: PageAdvisor, R: Refill> {
    cache: PageCache<A>,
    entry_size: usize,
    refill: R,
}

impl<A: PageAdvisor, R: Refill> FtCache<A, R> {
    /// Wraps an already-constructed `PageCache`. `entry_size` must be
    /// between 1 and `cache.page_size()` inclusive.
    pub fn new(cache: PageCache<A>, entry_size: usize, refill: R) -> Result<Self, CacheError> {
        if entry_size == 0 || entry_size > cache.page_size() {
            return Err(CacheError::InvalidConfig(
                "entry_size must be between 1 and page_size",
            ));
        }
        Ok(Self {
            cache,
            entry_size,
            refill,
        })
    }

    pub fn page_size(&self) -> usize {
        self.cache.page_size()
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn stats(&self, verbose: bool) -> CacheStats {
        self.cache.stats(verbose)
    }

    /// Direct access to the backing `PageCache`, for tests that need to poke
    /// at reclaim simulation below the `FtCache` API.
    #[cfg(feature = "test-util")]
    pub fn page_cache_mut(&mut self) -> &mut PageCache<A> {
        &mut self.cache
    }

    fn tail_offset(&self) -> usize {
        self.cache.page_size() - self.entry_size
    }

    /// Fills `out` (must be exactly `entry_size()` bytes) with the value for
    /// `key`, regenerating it via the refill source on a miss or a lost race
    /// against kernel reclamation.
    pub fn get(&mut self, key: u64, out: &mut [u8]) {
        debug_assert_eq!(
            out.len(),
            self.entry_size,
            "FtCache::get requires an entry_size()-sized buffer"
        );

        let tail_offset = self.tail_offset();
        let rlock = self.cache.read_lock(key);
        if rlock.is_present() && self.cache.copy_out(&rlock, tail_offset, out) {
            self.cache.read_unlock(rlock, false);
            return;
        }

        // Either a clean miss, or the page was reclaimed between the lookup
        // and the copy. `write_upgrade` re-validates on our behalf and falls
        // back to a fresh allocation either way.
        self.refill.refill(key, out);
        let page = self.cache.write_upgrade(rlock);
        page[tail_offset..].copy_from_slice(out);
        self.cache.write_unlock(false);
    }

    /// Explicitly evicts `key`. Returns whether it was present.
    pub fn drop(&mut self, key: u64) -> bool {
        let rlock = self.cache.read_lock(key);
        let existed = rlock.is_present();
        self.cache.read_unlock(rlock, true);
        existed
    }
}
