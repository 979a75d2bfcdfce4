//! # The Kernel Heap
//!
//! One heap serves the whole kernel. It used to be tempting to make it a
//! plain global constructed alongside every other static, but nothing
//! guarantees construction order there, and any static wanting to allocate
//! during its own setup would race the heap's. So the handle here is
//! explicit: [`init`] runs first in the boot sequence, everything else goes
//! through [`get`].

use crate::heap::Heap;
use core::ptr::NonNull;
use kernel_info::memory;
use spin::{Mutex, Once};

static KERNEL_HEAP: Once<Mutex<Heap>> = Once::new();

/// Initialize the kernel heap over the region described by `kernel-info`:
/// the block pool at [`memory::KERNEL_HEAP`] with its entry table parked in
/// the low-memory gap at [`memory::KERNEL_HEAP_ENTRY_TABLE`].
///
/// Idempotent; the first call builds the heap, later calls return the same
/// handle.
///
/// # Safety
/// - Must run in protected mode with the heap region and entry-table region
///   present, writable and unused by anything else.
/// - Must run before any code that expects [`get`] to return a heap.
pub unsafe fn init() -> &'static Mutex<Heap> {
    KERNEL_HEAP.call_once(|| {
        // SAFETY: both bases are non-zero link-time constants.
        let heap_start = unsafe { NonNull::new_unchecked(memory::KERNEL_HEAP as usize as *mut u8) };
        let table_start =
            unsafe { NonNull::new_unchecked(memory::KERNEL_HEAP_ENTRY_TABLE as usize as *mut u8) };

        let heap = unsafe {
            Heap::with_external_table(
                heap_start,
                table_start,
                memory::KERNEL_HEAP_SIZE,
                memory::HEAP_BLOCK_SIZE,
            )
        };
        log::info!(
            "kernel heap: {} blocks of {} bytes at {:#x}",
            heap.block_count(),
            heap.block_size(),
            memory::KERNEL_HEAP
        );
        Mutex::new(heap)
    })
}

/// The kernel heap, or `None` before [`init`] has run.
#[must_use]
pub fn get() -> Option<&'static Mutex<Heap>> {
    KERNEL_HEAP.get()
}
