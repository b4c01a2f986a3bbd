//! Low-level platform bindings and support data structures.
//!
//! Mirrors the split the teacher crate uses for its own OS-specific memory
//! primitives: the public API lives at the crate root, the unsafe/
//! platform-specific plumbing lives here.

pub(crate) mod bitset;
pub mod mmap;
