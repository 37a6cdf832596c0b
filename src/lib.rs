//! MeMS — a segmented free-list allocator that manages a private
//! virtual address space distinct from the host process's own.
//!
//! Callers get back opaque virtual handles from [`Mems::malloc`] and
//! translate them to real machine pointers on demand via
//! [`Mems::translate`]. The allocator draws its backing memory from an
//! abstract [`PageProvider`] in page-sized units, carving each region
//! into `Process` (occupied) and `Hole` (free) segments, and reuses
//! holes across allocations via first-fit search with splitting and
//! coalescing.
mod arena;
mod chain;
mod error;
mod mems;
mod page_provider;

pub use crate::error::MemsError;
pub use crate::mems::{Mems, NULL_HANDLE};
pub use crate::page_provider::{default_provider, OsPageProvider, PageProvider};

/// Page size in bytes. Fixed at compile time and independent of the
/// host's own page size, so that statistics are reproducible across
/// machines.
#[cfg(not(feature = "test_only_small_constants"))]
pub const P: usize = 4096;
#[cfg(feature = "test_only_small_constants")]
pub const P: usize = 64;

/// The origin of MeMS's private virtual address space.
#[cfg(not(feature = "test_only_small_constants"))]
pub const BASE: usize = 1000;
#[cfg(feature = "test_only_small_constants")]
pub const BASE: usize = 16;
