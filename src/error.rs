//! Error types for construction-time failures.
//!
//! Everything past construction is either a normal miss (surfaced as
//! `false`/`None`, see [`crate::page_cache::ReadLock`]) or a programmer
//! error, which panics rather than returning a `Result` — matching the
//! teacher crate's own `assert`-on-misuse posture.

use crate::internals::mmap::MmapError;

/// Errors that can occur while building a [`crate::PageCache`] or
/// [`crate::FtCache`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Mmap(#[from] MmapError),
}
