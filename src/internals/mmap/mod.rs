//! Traits for the two pieces of operating-system cooperation the cache
//! needs: reserving the virtual memory for a chunk, and hinting to the
//! kernel that a chunk's pages are reclaimable.
//!
//! Concrete backends live in [`unix`] and [`windows`]; callers normally
//! reach for [`AnonymousMapper`]/[`FileBackedMapper`] and
//! [`MadviseAdvisor`]/[`NullAdvisor`] rather than implementing the traits
//! themselves.

use core::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::{page_size, AnonymousMapper, FileBackedMapper, MadviseAdvisor};
    } else if #[cfg(windows)] {
        mod windows;
        pub use windows::{page_size, AnonymousMapper, FileBackedMapper, MadviseAdvisor};
    } else {
        compile_error!("lazyfree-cache requires a unix or windows target");
    }
}

/// A single mapped region of virtual memory, backing one chunk.
///
/// Dropping a `MappedRegion` unmaps it. The region owns any file descriptor
/// needed to keep a file-backed mapping alive.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
    // kept only to keep a file-backed mapping's fd alive for as long as the
    // mapping itself; never read directly.
    _backing: Backing,
}

enum Backing {
    Anonymous,
    #[cfg_attr(windows, allow(dead_code))]
    File(std::fs::File),
}

impl MappedRegion {
    /// # Safety
    /// `ptr` must point to a unique mapping of `len` bytes that is valid to
    /// read and write for as long as the returned `MappedRegion` lives, and
    /// must be unmappable with the platform's unmap primitive.
    unsafe fn new(ptr: NonNull<u8>, len: usize, backing: Backing) -> Self {
        Self {
            ptr,
            len,
            _backing: backing,
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// Error returned by a [`PageMapper`] or [`PageAdvisor`].
#[derive(Debug, thiserror::Error)]
pub enum MmapError {
    #[error("failed to reserve {len} bytes of virtual memory: {source}")]
    Map {
        len: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create scratch file for file-backed chunk: {source}")]
    ScratchFile {
        #[source]
        source: std::io::Error,
    },
    #[error("madvise failed: {source}")]
    Advise {
        #[source]
        source: std::io::Error,
    },
}

/// Reserves the virtual memory backing one chunk.
///
/// Implementations must return zero-initialized, read/write memory; they
/// need not prefault it.
pub trait PageMapper {
    fn map_region(&self, len: usize) -> Result<MappedRegion, MmapError>;
}

/// The kernel hint issued when the cache is done writing to a chunk for now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdviseHint {
    /// The kernel may reclaim these pages under memory pressure and zero-fill
    /// them on next touch (`MADV_FREE` on Linux).
    LazyFree,
    /// The kernel should demote these pages to a colder tier without
    /// necessarily discarding them (`MADV_COLD` on Linux); used for
    /// file-backed chunks, where `MADV_FREE` does not apply.
    Cold,
    /// Discard the contents of these pages right now
    /// (`MADV_DONTNEED`-equivalent); used for whole-chunk eviction.
    DontNeed,
}

/// Issues a reclaim hint for a mapped region.
pub trait PageAdvisor {
    fn advise(&self, region: &MappedRegion, hint: AdviseHint);
}

/// Issues no hint at all. Anonymous pages mapped without ever being advised
/// are never silently dropped by the kernel; useful for tests and for
/// platforms with no equivalent of `madvise`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAdvisor;

impl PageAdvisor for NullAdvisor {
    fn advise(&self, _region: &MappedRegion, _hint: AdviseHint) {}
}
