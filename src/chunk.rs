//! A chunk: one mmap region subdivided into pages, plus the side arrays
//! needed to track which pages are live.

use crate::internals::bitset::Bitset;
use crate::internals::mmap::{AdviseHint, MappedRegion, PageAdvisor, PageMapper};
use std::ptr;

/// One fixed-size page's worth of bytes, the unit of both storage and kernel
/// reclamation.
pub(crate) struct Chunk {
    region: MappedRegion,
    page_size: usize,
    pages_per_chunk: usize,
    /// High watermark of pages ever allocated in this chunk.
    len: usize,
    /// Stack of page indices freed via drop, available for reuse before
    /// bumping `len`.
    free_stack: Vec<u32>,
    /// `keys[i]` is the key owning page `i`, or 0 if vacant.
    keys: Vec<u64>,
    /// True low bit of the sentinel byte for each live page (see
    /// `SPEC_FULL.md` §3).
    shadow_bits: Bitset,
}

impl Chunk {
    pub(crate) fn new<M: PageMapper>(
        mapper: &M,
        chunk_size: usize,
        page_size: usize,
    ) -> Result<Self, crate::error::CacheError> {
        let pages_per_chunk = chunk_size / page_size;
        let region = mapper.map_region(chunk_size)?;
        Ok(Self {
            region,
            page_size,
            pages_per_chunk,
            len: 0,
            free_stack: Vec::with_capacity(pages_per_chunk),
            keys: vec![0u64; pages_per_chunk],
            shadow_bits: Bitset::new(pages_per_chunk),
        })
    }

    pub(crate) fn pages_per_chunk(&self) -> usize {
        self.pages_per_chunk
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn free_stack_len(&self) -> usize {
        self.free_stack.len()
    }

    pub(crate) fn key_at(&self, page: usize) -> u64 {
        self.keys[page]
    }

    pub(crate) fn set_key_at(&mut self, page: usize, key: u64) {
        self.keys[page] = key;
    }

    /// Pops a freed page, or claims a fresh one below the watermark. Returns
    /// `None` if the chunk is exhausted.
    pub(crate) fn alloc_page(&mut self) -> Option<u32> {
        if let Some(idx) = self.free_stack.pop() {
            return Some(idx);
        }
        if self.len < self.pages_per_chunk {
            let idx = self.len as u32;
            self.len += 1;
            return Some(idx);
        }
        None
    }

    /// Pushes `page` back onto the free stack, to be handed out again by a
    /// later `alloc_page`.
    pub(crate) fn free_page(&mut self, page: u32) {
        self.free_stack.push(page);
        debug_assert!(
            self.free_stack.len() <= self.len,
            "free stack may not exceed the chunk's watermark"
        );
        self.keys[page as usize] = 0;
    }

    /// Resets the chunk to fully empty, as part of whole-chunk eviction.
    /// Returns the keys that were occupied, so the caller can remove them
    /// from the slot map.
    pub(crate) fn evict_all(&mut self) -> Vec<u64> {
        let evicted: Vec<u64> = self.keys[..self.len]
            .iter()
            .copied()
            .filter(|&k| k != 0)
            .collect();
        for key in self.keys[..self.len].iter_mut() {
            *key = 0;
        }
        self.len = 0;
        self.free_stack.clear();
        evicted
    }

    fn page_ptr(&self, page: usize) -> *mut u8 {
        debug_assert!(page < self.pages_per_chunk);
        // SAFETY: `page < pages_per_chunk`, so this stays within the region.
        unsafe { self.region.as_ptr().add(page * self.page_size) }
    }

    fn sentinel_ptr(&self, page: usize) -> *mut u8 {
        // SAFETY: the sentinel lives at the last byte of the page.
        unsafe { self.page_ptr(page).add(self.page_size - 1) }
    }

    /// Volatile read of the raw sentinel byte (not yet corrected for the
    /// shadow bit). The volatile access is load-bearing: without it the
    /// compiler would be free to hoist this read across the later
    /// re-verification, defeating the whole detection scheme.
    pub(crate) fn read_sentinel_raw(&self, page: usize) -> u8 {
        // SAFETY: `sentinel_ptr` points within the chunk's live mapping.
        unsafe { ptr::read_volatile(self.sentinel_ptr(page)) }
    }

    /// The user's true value of the sentinel-position byte, with the shadow
    /// bit substituted back in for bit 0.
    pub(crate) fn reconstruct_user_byte(&self, page: usize, raw_sentinel: u8) -> u8 {
        let mut byte = raw_sentinel;
        if !self.shadow_bits.get(page) {
            byte &= !1;
        }
        byte
    }

    /// Commits the sentinel byte for a page the caller just finished writing:
    /// stashes the true low bit in the shadow bitset and forces the stored
    /// bit to 1 so the byte can never read back as zero while the page is
    /// live.
    pub(crate) fn commit_sentinel(&mut self, page: usize, user_byte: u8) {
        self.shadow_bits.set(page as usize, (user_byte & 1) != 0);
        let stored = user_byte | 1;
        // SAFETY: `sentinel_ptr` points within the chunk's live mapping.
        unsafe { ptr::write_volatile(self.sentinel_ptr(page), stored) };
    }

    /// Writes a single byte at `offset` within the page, for the upgrade
    /// interlock probe (`SPEC_FULL.md` §4.3 step 3).
    pub(crate) fn write_probe_byte(&mut self, page: usize, offset: usize, value: u8) {
        debug_assert!(offset < self.page_size - 1, "probe must not touch the sentinel");
        // SAFETY: `offset < page_size - 1 < page_size`.
        unsafe { ptr::write_volatile(self.page_ptr(page).add(offset), value) };
    }

    pub(crate) fn read_probe_byte(&self, page: usize, offset: usize) -> u8 {
        debug_assert!(offset < self.page_size - 1, "probe must not touch the sentinel");
        // SAFETY: `offset < page_size - 1 < page_size`.
        unsafe { ptr::read_volatile(self.page_ptr(page).add(offset)) }
    }

    /// Full page contents as a slice, for bulk reads/writes by the caller.
    /// Includes the sentinel byte; callers that go through `PageCache`'s
    /// public API never need to touch it directly.
    pub(crate) fn page_slice_mut(&mut self, page: usize) -> &mut [u8] {
        let ptr = self.page_ptr(page);
        // SAFETY: `ptr` is valid for `page_size` bytes within the chunk's
        // live mapping, and `&mut self` ensures exclusive access.
        unsafe { core::slice::from_raw_parts_mut(ptr, self.page_size) }
    }

    pub(crate) fn page_slice(&self, page: usize) -> &[u8] {
        let ptr = self.page_ptr(page);
        // SAFETY: `ptr` is valid for `page_size` bytes within the chunk's
        // live mapping.
        unsafe { core::slice::from_raw_parts(ptr, self.page_size) }
    }

    pub(crate) fn advise<A: PageAdvisor>(&self, advisor: &A, hint: AdviseHint) {
        advisor.advise(&self.region, hint);
    }

    /// Zeroes a page's sentinel byte directly, bypassing `madvise` entirely.
    /// Simulates the kernel having reclaimed the page, for tests that can't
    /// rely on real memory pressure to exercise the reclaim path.
    #[cfg(feature = "test-util")]
    pub(crate) fn debug_force_reclaim(&mut self, page: u32) {
        // SAFETY: `sentinel_ptr` points within the chunk's live mapping.
        unsafe { ptr::write_volatile(self.sentinel_ptr(page as usize), 0) };
    }
}
