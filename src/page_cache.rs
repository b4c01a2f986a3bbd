//! The page-oriented storage engine: fixed-size pages keyed by a 64-bit
//! integer, with optimistic read locks, a single-slot write lock, and
//! reclaim-aware validation. See `SPEC_FULL.md` §3–§5 for the full model.

use crate::chunk::Chunk;
use crate::config::{CacheConfig, EvictionPolicy};
use crate::error::CacheError;
use crate::internals::mmap::{AdviseHint, PageAdvisor, PageMapper};
use crate::slotmap::{SlotMap, SlotRef};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// What, if anything, is currently locked. There is exactly one lock slot
/// for the whole cache: the engine is single-threaded and callers are
/// expected to acquire, use, and release a lock before starting another
/// operation (see `SPEC_FULL.md` §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LockState {
    Idle,
    Read { chunk: u8, page: u32, key: u64 },
    Write { chunk: u8, page: u32, key: u64 },
}

/// A snapshot returned by [`PageCache::read_lock`].
///
/// Deliberately carries no borrow of the cache and no raw pointer: its
/// validity is a runtime contract ("no other cache operation has run since
/// this was produced"), not something the type system can express, so it is
/// re-validated from `(chunk, page, key)` on every use instead. See the
/// "Non-interior borrowing" design note in `SPEC_FULL.md` §11.
#[derive(Clone, Copy, Debug)]
pub struct ReadLock {
    key: u64,
    present: Option<PresentLock>,
}

#[derive(Clone, Copy, Debug)]
struct PresentLock {
    chunk: u8,
    page: u32,
    /// The reconstructed user byte at `page_size - 1`, handed back so
    /// callers that only need that one byte don't need a second sentinel
    /// round-trip.
    byte: u8,
}

impl ReadLock {
    pub fn is_present(&self) -> bool {
        self.present.is_some()
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    /// The reconstructed byte at `page_size - 1`, if the lock is present.
    pub fn sentinel_position_byte(&self) -> Option<u8> {
        self.present.map(|p| p.byte)
    }
}

/// Page/chunk counts reported by [`PageCache::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub total_pages: usize,
    pub free_pages: usize,
}

/// The page-oriented storage engine.
///
/// Generic over the [`PageAdvisor`] used to hint chunks as reclaimable; the
/// [`PageMapper`] used to reserve each chunk's memory is only needed at
/// construction time and is not part of the type.
pub struct PageCache<A: PageAdvisor> {
    chunks: Vec<Chunk>,
    map: SlotMap,
    /// Key 0 is handled out of band: `0` means "vacant" in a chunk's `keys`
    /// array, so it cannot be a real map key.
    zero_key: Option<SlotRef>,
    advisor: A,
    config: CacheConfig,
    current_chunk_idx: usize,
    total_free_pages: usize,
    lock: LockState,
    rng: SmallRng,
}

impl<A: PageAdvisor> PageCache<A> {
    /// Reserves `config.number_of_chunks` chunks via `mapper`, each of
    /// `config.chunk_size()` bytes, and returns a cache ready to serve
    /// `read_lock`/`write_alloc`.
    pub fn new<M: PageMapper>(config: CacheConfig, mapper: M, advisor: A) -> Result<Self, CacheError> {
        config.validate()?;

        let chunk_size = config.chunk_size();
        let page_size = config.page_size;
        let number_of_chunks = config.number_of_chunks as usize;
        let pages_per_chunk = config.pages_per_chunk();

        let mut chunks = Vec::with_capacity(number_of_chunks);
        for _ in 0..number_of_chunks {
            chunks.push(Chunk::new(&mapper, chunk_size, page_size)?);
        }

        tracing::info!(
            capacity_bytes = config.capacity_bytes,
            number_of_chunks,
            pages_per_chunk,
            "initialized page cache"
        );

        Ok(Self {
            chunks,
            map: SlotMap::default(),
            zero_key: None,
            advisor,
            total_free_pages: number_of_chunks * pages_per_chunk,
            current_chunk_idx: 0,
            lock: LockState::Idle,
            config,
            rng: SmallRng::from_entropy(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn lookup(&self, key: u64) -> Option<SlotRef> {
        if key == 0 {
            self.zero_key
        } else {
            self.map.get(&key).copied()
        }
    }

    fn bind(&mut self, key: u64, slot: SlotRef) {
        if key == 0 {
            self.zero_key = Some(slot);
        } else {
            self.map.insert(key, slot);
        }
    }

    fn unbind(&mut self, key: u64) {
        if key == 0 {
            self.zero_key = None;
        } else {
            self.map.remove(&key);
        }
    }

    /// Destroys the entry at `slot` (owned by `key`): frees its page,
    /// removes the map binding, and bumps `total_free_pages`.
    fn drop_entry(&mut self, slot: SlotRef, key: u64) {
        self.chunks[slot.chunk as usize].free_page(slot.page);
        self.unbind(key);
        self.total_free_pages += 1;
    }

    // == Read path (SPEC_FULL.md §4.2) ==

    pub fn read_lock(&mut self, key: u64) -> ReadLock {
        assert_eq!(
            self.lock,
            LockState::Idle,
            "read_lock called while another lock is held"
        );

        let Some(slot) = self.lookup(key) else {
            return ReadLock { key, present: None };
        };

        if self.chunks[slot.chunk as usize].key_at(slot.page as usize) != key {
            // The chunk was evicted and the slot reused before we got here.
            return ReadLock { key, present: None };
        }

        let raw = self.chunks[slot.chunk as usize].read_sentinel_raw(slot.page as usize);
        if raw == 0 {
            tracing::trace!(key, "sentinel is zero: page was reclaimed by the kernel");
            self.drop_entry(slot, key);
            return ReadLock { key, present: None };
        }

        let byte = self.chunks[slot.chunk as usize].reconstruct_user_byte(slot.page as usize, raw);
        self.lock = LockState::Read {
            chunk: slot.chunk,
            page: slot.page,
            key,
        };
        ReadLock {
            key,
            present: Some(PresentLock {
                chunk: slot.chunk,
                page: slot.page,
                byte,
            }),
        }
    }

    /// The `LOCK_CHECK` predicate: is the sentinel still non-zero?
    pub fn check(&self, rlock: &ReadLock) -> bool {
        match rlock.present {
            None => false,
            Some(p) => self.chunks[p.chunk as usize].read_sentinel_raw(p.page as usize) != 0,
        }
    }

    /// Copies `buf.len()` bytes starting at `offset` out of the locked page,
    /// then re-verifies the sentinel. Returns `false` (copy is garbage) if
    /// the page was reclaimed during the copy, or if `rlock` is absent.
    ///
    /// If the copied range reaches the sentinel position (`page_size - 1`),
    /// the last copied byte is the raw stored byte, not the user's true
    /// value — its low bit may have been forced to 1 by `commit_sentinel`.
    /// That byte is overwritten with the already-reconstructed value carried
    /// on `rlock` before returning.
    pub fn copy_out(&self, rlock: &ReadLock, offset: usize, buf: &mut [u8]) -> bool {
        let Some(p) = rlock.present else {
            return false;
        };
        let chunk = &self.chunks[p.chunk as usize];
        buf.copy_from_slice(&chunk.page_slice(p.page as usize)[offset..offset + buf.len()]);
        if offset + buf.len() == self.config.page_size {
            *buf.last_mut().expect("buf is non-empty: it reaches page_size") = p.byte;
        }
        chunk.read_sentinel_raw(p.page as usize) != 0
    }

    pub fn read_unlock(&mut self, rlock: ReadLock, drop: bool) {
        let Some(present) = rlock.present else {
            return;
        };
        match self.lock {
            LockState::Read { chunk, page, key }
                if key == rlock.key && chunk == present.chunk && page == present.page =>
            {
                if drop && self.chunks[chunk as usize].key_at(page as usize) == key {
                    self.drop_entry(SlotRef { chunk, page }, key);
                }
                self.lock = LockState::Idle;
            }
            _ => panic!("read_unlock called without a matching outstanding read lock"),
        }
    }

    // == Write path (SPEC_FULL.md §4.3) ==

    pub fn write_alloc(&mut self, key: u64) -> &mut [u8] {
        assert_eq!(
            self.lock,
            LockState::Idle,
            "write_alloc called while another lock is held"
        );
        assert!(
            self.lookup(key).is_none(),
            "write_alloc called for a key that already exists; use write_upgrade"
        );

        let slot = self.alloc_new_page();
        self.chunks[slot.chunk as usize].set_key_at(slot.page as usize, key);
        self.bind(key, slot);
        self.lock = LockState::Write {
            chunk: slot.chunk,
            page: slot.page,
            key,
        };
        self.chunks[slot.chunk as usize].page_slice_mut(slot.page as usize)
    }

    pub fn write_upgrade(&mut self, rlock: ReadLock) -> &mut [u8] {
        let Some(present) = rlock.present else {
            return self.write_alloc(rlock.key);
        };
        match self.lock {
            LockState::Read { chunk, page, key }
                if key == rlock.key && chunk == present.chunk && page == present.page => {}
            _ => panic!("write_upgrade called without a matching outstanding read lock"),
        }

        let key = rlock.key;
        let chunk = present.chunk;
        let page = present.page;

        if self.chunks[chunk as usize].key_at(page as usize) != key {
            // Slot was repurposed underneath us; should not happen under the
            // single-lock protocol, but handled defensively per SPEC_FULL.md §4.3.
            self.unbind(key);
            self.lock = LockState::Idle;
            return self.write_alloc(key);
        }

        // Interlock against a late kernel reclaim during the upgrade: touch a
        // byte far from the sentinel, then re-check the sentinel.
        let prior = self.chunks[chunk as usize].read_probe_byte(page as usize, 0);
        self.chunks[chunk as usize].write_probe_byte(page as usize, 0, 1);
        let survived = self.chunks[chunk as usize].read_sentinel_raw(page as usize) != 0;

        if survived {
            self.chunks[chunk as usize].write_probe_byte(page as usize, 0, prior);
            self.lock = LockState::Write { chunk, page, key };
            self.chunks[chunk as usize].page_slice_mut(page as usize)
        } else {
            tracing::debug!(key, "page reclaimed mid-upgrade; falling back to a fresh allocation");
            self.drop_entry(SlotRef { chunk, page }, key);
            self.lock = LockState::Idle;
            self.write_alloc(key)
        }
    }

    pub fn write_unlock(&mut self, drop: bool) {
        let LockState::Write { chunk, page, key } = self.lock else {
            panic!("write_unlock called without an outstanding write lock");
        };

        if drop {
            self.drop_entry(SlotRef { chunk, page }, key);
        } else {
            let sentinel_offset = self.config.page_size - 1;
            let user_byte = self.chunks[chunk as usize].page_slice(page as usize)[sentinel_offset];
            self.chunks[chunk as usize].commit_sentinel(page as usize, user_byte);
        }
        self.lock = LockState::Idle;
    }

    // == Chunk management (SPEC_FULL.md §4.5) ==

    fn alloc_new_page(&mut self) -> SlotRef {
        if self.total_free_pages == 0 {
            self.drop_chunk();
        }

        let n = self.chunks.len();
        for _ in 0..n {
            if let Some(page) = self.chunks[self.current_chunk_idx].alloc_page() {
                self.total_free_pages -= 1;
                return SlotRef {
                    chunk: self.current_chunk_idx as u8,
                    page,
                };
            }
            self.advance_chunk();
        }

        panic!(
            "page cache bookkeeping error: found no free page after a full sweep despite total_free_pages > 0"
        );
    }

    fn advance_chunk(&mut self) {
        self.chunks[self.current_chunk_idx].advise(&self.advisor, self.config.idle_hint);
        self.current_chunk_idx = (self.current_chunk_idx + 1) % self.chunks.len();
    }

    fn drop_chunk(&mut self) {
        let idx = match self.config.eviction {
            EvictionPolicy::Random => self.rng.gen_range(0..self.chunks.len()),
            EvictionPolicy::RoundRobin => (self.current_chunk_idx + 1) % self.chunks.len(),
        };
        self.current_chunk_idx = idx;

        let occupied = self.chunks[idx].len() - self.chunks[idx].free_stack_len();
        let evicted_keys = self.chunks[idx].evict_all();
        for key in &evicted_keys {
            self.unbind(*key);
        }
        self.chunks[idx].advise(&self.advisor, AdviseHint::DontNeed);
        self.total_free_pages += occupied;

        tracing::debug!(chunk = idx, evicted = evicted_keys.len(), "evicted whole chunk under admission pressure");
    }

    /// Simulates the kernel reclaiming the page for `key`, bypassing
    /// `madvise` entirely, by zeroing its sentinel byte directly. A no-op if
    /// `key` is absent. For black-box tests of the reclaim path only.
    #[cfg(feature = "test-util")]
    pub fn debug_force_reclaim(&mut self, key: u64) {
        if let Some(slot) = self.lookup(key) {
            self.chunks[slot.chunk as usize].debug_force_reclaim(slot.page);
        }
    }

    // == Stats ==

    pub fn stats(&self, verbose: bool) -> CacheStats {
        if verbose {
            for (i, chunk) in self.chunks.iter().enumerate() {
                tracing::info!(
                    chunk = i,
                    len = chunk.len(),
                    free_in_chunk = chunk.free_stack_len(),
                    "chunk stats"
                );
            }
        }
        CacheStats {
            total_pages: self.chunks.len() * self.config.pages_per_chunk(),
            free_pages: self.total_free_pages,
        }
    }
}
