//! Unix `mmap`/`madvise` bindings, using the `rustix` crate the way the
//! teacher crate binds `mmap`/`mlock` for its secret-memory pages.

use super::{AdviseHint, Backing, MappedRegion, MmapError, PageAdvisor, PageMapper};
use core::ptr::NonNull;
use std::path::{Path, PathBuf};

/// Returns the page size on the running system using the `rustix` crate.
pub fn page_size() -> usize {
    rustix::param::page_size()
}

/// Maps chunks as private, anonymous, zero-filled memory.
///
/// This is the usual configuration: the kernel backs the pages with no
/// file, and `MADV_FREE` lets it reclaim them under pressure.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousMapper;

impl PageMapper for AnonymousMapper {
    fn map_region(&self, len: usize) -> Result<MappedRegion, MmapError> {
        use rustix::mm::{MapFlags, ProtFlags};

        let prot = ProtFlags::READ | ProtFlags::WRITE;
        // NORESERVE: don't reserve swap for these pages. Combined with
        // MADV_FREE this is what lets the kernel silently drop them.
        let flags = MapFlags::PRIVATE | MapFlags::NORESERVE;

        // SAFETY: `len` is a caller-supplied chunk size; `mmap_anonymous`
        // with a null address lets the kernel choose the mapping.
        let ptr = unsafe { rustix::mm::mmap_anonymous(core::ptr::null_mut(), len, prot, flags) }
            .map_err(|errno| MmapError::Map {
                len,
                source: errno.into(),
            })?;

        // SAFETY: a successful mmap never returns null.
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
        // SAFETY: `ptr` is a unique mapping of `len` bytes, unmapped by `munmap`.
        Ok(unsafe { MappedRegion::new(ptr, len, Backing::Anonymous) })
    }
}

/// Maps chunks as a shared mapping of a private scratch file.
///
/// Used when the caller wants chunk contents to be demotable with
/// `MADV_COLD` rather than discarded outright with `MADV_FREE`, which only
/// applies to anonymous/private mappings.
#[derive(Clone, Debug)]
pub struct FileBackedMapper {
    scratch_dir: PathBuf,
}

impl FileBackedMapper {
    /// `scratch_dir` must already exist; the mapper does not create it.
    pub fn new(scratch_dir: impl AsRef<Path>) -> Self {
        Self {
            scratch_dir: scratch_dir.as_ref().to_path_buf(),
        }
    }
}

impl PageMapper for FileBackedMapper {
    fn map_region(&self, len: usize) -> Result<MappedRegion, MmapError> {
        use rustix::mm::{MapFlags, ProtFlags};

        // `tempfile_in` creates the file and unlinks it immediately, so the
        // chunk's backing file disappears from the directory right away and
        // is reclaimed by the OS once the mapping and this handle are gone.
        let file =
            tempfile::tempfile_in(&self.scratch_dir).map_err(|source| MmapError::ScratchFile { source })?;
        file.set_len(len as u64)
            .map_err(|source| MmapError::ScratchFile { source })?;

        let prot = ProtFlags::READ | ProtFlags::WRITE;
        let flags = MapFlags::SHARED | MapFlags::NORESERVE;

        // SAFETY: `file` was just truncated to `len` bytes and stays alive in
        // the returned `MappedRegion`'s `Backing::File`, as required for the
        // mapping to stay valid.
        let ptr = unsafe { rustix::mm::mmap(core::ptr::null_mut(), len, prot, flags, &file, 0) }
            .map_err(|errno| MmapError::Map {
                len,
                source: errno.into(),
            })?;

        // SAFETY: a successful mmap never returns null.
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
        // SAFETY: `ptr` is a unique mapping of `len` bytes, unmapped by `munmap`.
        Ok(unsafe { MappedRegion::new(ptr, len, Backing::File(file)) })
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: `self.ptr`/`self.len` describe the mapping this
        // `MappedRegion` uniquely owns, created by one of the `PageMapper`
        // impls above.
        unsafe {
            rustix::mm::munmap(self.ptr.as_ptr() as *mut core::ffi::c_void, self.len)
                .expect("munmap of a chunk region failed");
        }
    }
}

/// Issues real `madvise` hints via `rustix`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MadviseAdvisor;

impl PageAdvisor for MadviseAdvisor {
    fn advise(&self, region: &MappedRegion, hint: AdviseHint) {
        use rustix::mm::Advice;

        let advice = match hint {
            AdviseHint::LazyFree => Advice::LinuxFree,
            AdviseHint::Cold => Advice::LinuxCold,
            AdviseHint::DontNeed => Advice::DontNeed,
        };

        // SAFETY: `region` owns a live mapping of `region.len()` bytes.
        let result = unsafe {
            rustix::mm::madvise(region.as_ptr() as *mut core::ffi::c_void, region.len(), advice)
        };
        if let Err(errno) = result {
            tracing::warn!(?hint, error = %errno, "madvise failed");
        }
    }
}
