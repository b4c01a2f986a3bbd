#![forbid(future_incompatible, rust_2018_compatibility, unsafe_op_in_unsafe_fn)]
#![deny(rust_2018_idioms)]
#![warn(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
//! `lazyfree-cache` is an overcommitted key/page cache that leans on the
//! kernel's lazy-reclaim page advisory (`MADV_FREE` on Linux, `MADV_COLD` for
//! file-backed mappings) instead of an in-process eviction policy to decide
//! which pages actually go away. Every page the cache hands out carries a
//! one-byte liveness sentinel at its last byte; a live page's sentinel never
//! reads as zero, so a read can tell, after the fact, whether the kernel beat
//! it to the page.
//!
//! The engine never evicts a single entry. It evicts whole chunks: a fixed
//! number of large mmap'd regions, each holding many pages, and eviction
//! always drops one entire chunk's worth of entries at once. This keeps
//! bookkeeping cheap — no per-entry LRU or LFU metadata — and amortizes the
//! cost of reclaiming memory over many entries, at the cost of coarser
//! locality than a finer-grained policy would offer.
//!
//! # Examples
//!
//! ```
//! use lazyfree_cache::{CacheConfig, PageCache};
//! use lazyfree_cache::internals::mmap::{AnonymousMapper, MadviseAdvisor};
//!
//! let config = CacheConfig::new(16 * 4096).with_chunks(8);
//! let mut cache = PageCache::new(config, AnonymousMapper, MadviseAdvisor)
//!     .expect("failed to reserve cache memory");
//!
//! let page = cache.write_alloc(42);
//! page[0] = 7;
//! cache.write_unlock(false);
//!
//! let rlock = cache.read_lock(42);
//! assert!(rlock.is_present());
//! cache.read_unlock(rlock, false);
//! ```
//!
//! For callers that want "always return a value, regenerating it on a miss",
//! see [`FtCache`].
//!
//! # Design
//!
//! - [`PageCache`]: the storage engine. One outstanding lock at a time —
//!   either a single read lock or a single write lock — across the whole
//!   cache, mirroring the single-lock-slot model of the reference
//!   implementation this crate generalizes.
//! - [`FtCache`]: a fall-through key/value adapter over `PageCache` that
//!   regenerates missing or reclaimed entries via a [`ftcache::Refill`].
//! - [`CacheConfig`]: chunk count, page size, and eviction policy.
//! - [`internals::mmap`]: the `PageMapper`/`PageAdvisor` traits used to
//!   reserve chunk memory and to issue the kernel advisories, plus the
//!   platform implementations.

mod chunk;
pub mod config;
pub mod error;
pub mod ftcache;
pub mod internals;
pub mod page_cache;
mod slotmap;

pub use config::{CacheConfig, EvictionPolicy};
pub use error::CacheError;
pub use ftcache::{FtCache, Refill};
pub use page_cache::{CacheStats, PageCache, ReadLock};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internals::mmap::{AnonymousMapper, MadviseAdvisor, NullAdvisor};

    fn small_config() -> CacheConfig {
        CacheConfig::new(8 * 4096).with_chunks(MIN_CHUNKS_FOR_TEST)
    }

    const MIN_CHUNKS_FOR_TEST: u8 = 8;

    #[test]
    fn write_then_read_round_trips() {
        let mut cache = PageCache::new(small_config(), AnonymousMapper, NullAdvisor).unwrap();

        let page = cache.write_alloc(1);
        page[0] = 0xab;
        cache.write_unlock(false);

        let rlock = cache.read_lock(1);
        assert!(rlock.is_present());
        let mut out = vec![0u8; cache.page_size()];
        assert!(cache.copy_out(&rlock, 0, &mut out));
        assert_eq!(out[0], 0xab);
        cache.read_unlock(rlock, false);
    }

    #[test]
    fn missing_key_reports_absent() {
        let mut cache = PageCache::new(small_config(), AnonymousMapper, NullAdvisor).unwrap();
        let rlock = cache.read_lock(999);
        assert!(!rlock.is_present());
        cache.read_unlock(rlock, false);
    }

    #[test]
    fn key_zero_is_handled_out_of_band() {
        let mut cache = PageCache::new(small_config(), AnonymousMapper, NullAdvisor).unwrap();
        let page = cache.write_alloc(0);
        page[0] = 1;
        cache.write_unlock(false);

        let rlock = cache.read_lock(0);
        assert!(rlock.is_present());
        cache.read_unlock(rlock, false);
    }

    #[test]
    fn madvise_advisor_does_not_panic_on_real_memory() {
        let mut cache = PageCache::new(small_config(), AnonymousMapper, MadviseAdvisor).unwrap();
        let page = cache.write_alloc(7);
        page[0] = 1;
        cache.write_unlock(false);
        let stats = cache.stats(false);
        assert_eq!(stats.free_pages, stats.total_pages - 1);
    }
}
