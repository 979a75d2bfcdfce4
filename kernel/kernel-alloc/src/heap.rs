//! # Block Heap
//!
//! A block-based heap over a fixed raw region. The region is split into
//! contiguous blocks and allocation only ever hands out whole blocks; the
//! bookkeeping lives in an [`EntryTable`] that either occupies the tail of
//! the same region or a separate one.

use crate::entry_table::EntryTable;
use crate::HeapError;
use core::ptr::NonNull;
use kernel_vmem::{AllocError, BlockAlloc};

/// A block-based heap: byte requests are rounded up to whole blocks and
/// resolved to pointers into the memory pool.
pub struct Heap {
    block_size: usize,
    memory_pool: NonNull<u8>,
    entry_table: EntryTable,
}

// Safety: the heap exclusively owns its pool and table; access is serialized
// by whoever holds the heap (see `kernel_heap`).
unsafe impl Send for Heap {}

impl Heap {
    /// Initialize a heap whose entry table occupies the tail of the same
    /// region.
    ///
    /// The pool start is rounded up to the next block boundary; the usable
    /// size shrinks by the rounding slack. The block count is then
    /// `corrected_size / (block_size + 1)` so that blocks and their state
    /// bytes both fit, and the table starts right after the last block.
    ///
    /// # Safety
    /// - `heap_start .. heap_start + max_size` must be valid, writable
    ///   memory exclusive to this heap for its whole lifetime.
    /// - `block_size` must be non-zero.
    pub unsafe fn with_internal_table(
        heap_start: NonNull<u8>,
        max_size: usize,
        block_size: usize,
    ) -> Self {
        let memory_pool = round_up_to_nearest_block_size(heap_start, block_size);
        let corrected_size = max_size - (memory_pool.as_ptr() as usize - heap_start.as_ptr() as usize);

        let entry_amount = corrected_size / (block_size + EntryTable::ENTRY_SIZE);
        let table_start = unsafe { memory_pool.add(entry_amount * block_size) };

        Self {
            block_size,
            memory_pool,
            entry_table: unsafe { EntryTable::new(table_start, entry_amount) },
        }
    }

    /// Initialize a heap with its entry table in a separate region.
    ///
    /// # Safety
    /// - `heap_start .. heap_start + max_size` must be valid, writable
    ///   memory exclusive to this heap for its whole lifetime.
    /// - `table_start` must satisfy [`EntryTable::new`]'s contract for the
    ///   resulting block count (`corrected_size / block_size` bytes).
    /// - `block_size` must be non-zero.
    pub unsafe fn with_external_table(
        heap_start: NonNull<u8>,
        table_start: NonNull<u8>,
        max_size: usize,
        block_size: usize,
    ) -> Self {
        let memory_pool = round_up_to_nearest_block_size(heap_start, block_size);
        let corrected_size = max_size - (memory_pool.as_ptr() as usize - heap_start.as_ptr() as usize);

        let entry_amount = corrected_size / block_size;

        Self {
            block_size,
            memory_pool,
            entry_table: unsafe { EntryTable::new(table_start, entry_amount) },
        }
    }

    /// The number of blocks this heap manages.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.entry_table.total_entries()
    }

    /// The size of one block in bytes.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Allocate enough contiguous blocks to hold `bytes`.
    ///
    /// # Errors
    /// - [`HeapError::InvalidArgument`] for a zero-byte request.
    /// - [`HeapError::AllocationFailure`] when no contiguous run fits.
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, HeapError> {
        let blocks_to_allocate = bytes.div_ceil(self.block_size);
        let block_offset = self.entry_table.allocate(blocks_to_allocate)?;
        Ok(unsafe { self.memory_pool.add(block_offset * self.block_size) })
    }

    /// Free the allocation that starts at `address`.
    ///
    /// # Errors
    /// - [`HeapError::AddressOutOfRange`] when `address` is below the pool
    ///   or beyond its last block.
    /// - [`HeapError::AlignmentViolation`] when `address` is not on a block
    ///   boundary.
    /// - [`HeapError::CorruptedAllocation`] from the entry table when the
    ///   run's boundary markers are wrong (double free or corruption).
    ///
    /// Failures leave the heap unmodified.
    pub fn free(&mut self, address: NonNull<u8>) -> Result<(), HeapError> {
        let pool = self.memory_pool.as_ptr() as usize;
        let addr = address.as_ptr() as usize;

        if addr < pool {
            log::error!("trying to free an address below the heap pool");
            return Err(HeapError::AddressOutOfRange);
        }

        let distance = addr - pool;
        if distance % self.block_size != 0 {
            log::error!("trying to free an address inside a block");
            return Err(HeapError::AlignmentViolation);
        }

        self.entry_table.free(distance / self.block_size)
    }
}

/// Round an address up to the next multiple of `block_size`.
fn round_up_to_nearest_block_size(address: NonNull<u8>, block_size: usize) -> NonNull<u8> {
    let addr = address.as_ptr() as usize;
    let rounded = addr.div_ceil(block_size) * block_size;
    unsafe { address.add(rounded - addr) }
}

/// The heap is the kernel's provider of the paging layer's allocator
/// capability.
///
/// Paging structures need 4 KiB-aligned storage; blocks are aligned to the
/// pool's block grid, so with a block-aligned pool base (which the kernel
/// layout guarantees) and a 4 KiB block size every allocation qualifies.
impl BlockAlloc for Heap {
    fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate(size).map_err(|e| {
            log::error!("capability allocation of {size} bytes failed: {e}");
            AllocError
        })
    }

    fn try_free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        self.free(ptr).map_err(|e| {
            log::error!("capability free failed: {e}");
            AllocError
        })
    }
}
