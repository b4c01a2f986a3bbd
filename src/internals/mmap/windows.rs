//! Windows fallback bindings.
//!
//! Windows has no uniform equivalent of `madvise(MADV_FREE)`: reclaim hints
//! are either unavailable or require per-page-state APIs this crate does not
//! implement. [`MadviseAdvisor`] is therefore a no-op on this platform; the
//! cache still functions, it just never hints to the OS that chunks are
//! reclaimable. See `DESIGN.md` for the rationale.

use super::{AdviseHint, Backing, MappedRegion, MmapError, PageAdvisor, PageMapper};
use core::ptr::NonNull;
use windows::Win32::System::Memory::{VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

/// Returns the page size on the running system by querying `GetSystemInfo`.
pub fn page_size() -> usize {
    use windows::Win32::System::SystemInformation::GetSystemInfo;

    let mut info = Default::default();
    // SAFETY: `info` is a valid, empty `SYSTEM_INFO` to be filled in.
    unsafe { GetSystemInfo(&mut info) };
    info.dwPageSize as usize
}

/// Reserves and commits memory with `VirtualAlloc`. There is no file-backed
/// variant on this platform; `FileBackedMapper` and `AnonymousMapper` are the
/// same implementation, since a reclaim hint difference between them does
/// not exist here anyway.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousMapper;

impl PageMapper for AnonymousMapper {
    fn map_region(&self, len: usize) -> Result<MappedRegion, MmapError> {
        // SAFETY: requesting a fresh reserved+committed region.
        let ptr = unsafe { VirtualAlloc(None, len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) };
        if ptr.is_null() {
            return Err(MmapError::Map {
                len,
                source: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: checked non-null above.
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
        // SAFETY: `ptr` is a unique mapping of `len` bytes, released by `VirtualFree`.
        Ok(unsafe { MappedRegion::new(ptr, len, Backing::Anonymous) })
    }
}

/// No distinct file-backed mapping on Windows; see [`AnonymousMapper`].
pub type FileBackedMapper = AnonymousMapper;

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: `self.ptr` was reserved by `VirtualAlloc` above and is
        // released in full with `MEM_RELEASE`.
        let _ = unsafe { VirtualFree(self.ptr.as_ptr() as *mut _, 0, MEM_RELEASE) };
    }
}

/// No-op: see the module-level documentation.
#[derive(Clone, Copy, Debug, Default)]
pub struct MadviseAdvisor;

impl PageAdvisor for MadviseAdvisor {
    fn advise(&self, _region: &MappedRegion, _hint: AdviseHint) {}
}
