//! # Kernel Block Heap
//!
//! The kernel's memory allocation infrastructure: a block-based heap over a
//! fixed physical region, tracked by a byte-per-block entry table.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Kernel Heap Handle                     │
//! │    • spin::Once + spin::Mutex around the heap       │
//! │    • deterministic init() first in the boot flow    │
//! │    • GlobalAlloc adapter for the alloc crate        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  Block Heap                         │
//! │    • byte requests → whole-block allocations        │
//! │    • pointer ↔ block-offset arithmetic              │
//! │    • provider of the BlockAlloc capability          │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Entry Table                         │
//! │    • one state byte per block                       │
//! │    • FREE / USED / FIRST / LAST run markers         │
//! │    • first-fit scan, boundary-checked free          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The heap itself takes no locks and never suspends: every operation is a
//! bounded scan or plain arithmetic, which is what makes it safe to use from
//! interrupt handlers that run to completion with interrupts disabled. The
//! mutual exclusion for everyone else lives in the
//! [`kernel_heap`] handle, outside the hot paths.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod entry_table;
pub mod global_alloc;
pub mod heap;
pub mod kernel_heap;

pub use crate::entry_table::EntryTable;
pub use crate::global_alloc::KernelAllocator;
pub use crate::heap::Heap;

/// Failures of the heap layer.
///
/// Every variant is structural (retrying the same call cannot succeed) and
/// every variant is recoverable: the kernel keeps running, the caller
/// decides what the failure means.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    /// No contiguous run of free blocks is large enough.
    #[error("not enough contiguous free blocks")]
    AllocationFailure,

    /// A zero-sized request; the entry table cannot represent an empty
    /// allocation.
    #[error("can't allocate zero blocks")]
    InvalidArgument,

    /// A free of a pointer (or block offset) outside the managed region.
    #[error("address is out of the heap's range")]
    AddressOutOfRange,

    /// The entry-table run starting at the freed offset violates the
    /// FIRST..LAST invariant: a double free or outside corruption.
    #[error("allocation boundary markers are corrupted")]
    CorruptedAllocation,

    /// A free of a pointer that is not on a block boundary.
    #[error("address is not block aligned")]
    AlignmentViolation,
}
