//! # Global Allocator Adapter
//!
//! Lets the `alloc` crate's containers draw from the kernel heap. The
//! kernel binary installs an instance:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL_ALLOCATOR: KernelAllocator = KernelAllocator;
//! ```
//!
//! This library only provides the type; installing a global allocator from
//! a library would also hijack host-side test binaries.

use crate::kernel_heap;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{null_mut, NonNull};
use kernel_info::memory::HEAP_BLOCK_SIZE;

/// The kernel's global allocator: whole heap blocks per allocation.
///
/// Coarse for small objects, but dependable during bring-up; every pointer
/// handed out is block-aligned, so any `Layout` alignment up to the block
/// size is satisfied for free.
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    /// Allocate at least `layout.size()` bytes.
    ///
    /// Returns null before [`kernel_heap::init`] has run, on OOM, and for
    /// alignments beyond the block size.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(heap) = kernel_heap::get() else {
            return null_mut();
        };
        if layout.align() > HEAP_BLOCK_SIZE {
            return null_mut();
        }
        heap.lock()
            .allocate(layout.size().max(1))
            .map_or(null_mut(), NonNull::as_ptr)
    }

    /// Deallocate a block previously returned by [`alloc`](Self::alloc).
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(heap) = kernel_heap::get() else {
            return;
        };
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        if heap.lock().free(ptr).is_err() {
            log::error!("dealloc of a pointer the kernel heap doesn't own");
        }
    }
}
