//! # Memory Layout
//!
//! Physical layout of the machine as the kernel sees it in protected mode.
//! The bootloader leaves real-mode structures below `0x7e00`; the kernel
//! image is loaded at 1 MiB and the heap pool starts at 16 MiB.

/// Start of the kernel heap's entry table.
///
/// Sits in the gap above the boot sector, below the EBDA. One byte per heap
/// block, so 100 MiB of heap at 4 KiB blocks needs 25600 bytes here.
pub const KERNEL_HEAP_ENTRY_TABLE: u32 = 0x7e00;

/// Start of the text-mode video memory (owned by the display driver).
pub const VIDEO: u32 = 0xb_8000;

/// Where the kernel image is loaded (LMA and VMA; paging starts as 1:1).
pub const KERNEL_LOAD: u32 = 0x10_0000; // 1 MiB

/// Start of the kernel heap's block pool.
pub const KERNEL_HEAP: u32 = 0x100_0000; // 16 MiB

/// Total size of the region reserved for the kernel heap pool.
pub const KERNEL_HEAP_SIZE: usize = 100 * 1024 * 1024;

/// Size of one heap block.
pub const HEAP_BLOCK_SIZE: usize = 4096;

/// Size of one hardware page.
pub const PAGE_SIZE: usize = 4096;

/// Entries per page table and per page directory.
pub const TABLE_ENTRY_COUNT: usize = 1024;

/// Virtual address span covered by one page table (4 MiB).
pub const TABLE_SPAN: usize = TABLE_ENTRY_COUNT * PAGE_SIZE;

const _: () = {
    assert!(HEAP_BLOCK_SIZE.is_power_of_two());
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(KERNEL_HEAP % HEAP_BLOCK_SIZE as u32 == 0);
    assert!(KERNEL_HEAP_ENTRY_TABLE < KERNEL_LOAD);
    assert!(KERNEL_HEAP > KERNEL_LOAD);
    // The entry table must fit below video memory.
    assert!(
        KERNEL_HEAP_ENTRY_TABLE + (KERNEL_HEAP_SIZE / HEAP_BLOCK_SIZE) as u32 <= VIDEO
    );
};
