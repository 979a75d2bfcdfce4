//! # x86 Page Directory
//!
//! The upper paging level: [`PageDirectoryEntry`] (PDE) points at one
//! [`PageTable`](crate::PageTable) and guards a 4 MiB region, and
//! [`PageDirectory`] is the 4 KiB-aligned array of 1024 PDEs whose base
//! address goes into CR3.
//!
//! ## Invariants & Notes
//!
//! - This kernel maps 4 KiB pages only, so PS is always 0 and every PDE
//!   points at a page table (never a 4 MiB leaf).
//! - A PDE's permission bits gate the whole region: the effective permission
//!   is the intersection of PDE and PTE bits, which is why
//!   [`Paging::map`](crate::Paging::map) widens PDE bits and never narrows
//!   them.
//! - The table base stored in a PDE is 4 KiB-aligned by construction.

use crate::addresses::{DirectoryIndex, PhysicalAddress};
use crate::{EntryFlags, IndexOutOfRange};
use bitfield_struct::bitfield;
use kernel_info::memory::TABLE_ENTRY_COUNT;

/// A single Page Directory entry in its raw 32-bit hardware form.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P` (present)   | Table below is valid if set |
/// | 1     | `RW`            | Region writable if set |
/// | 2     | `US`            | Region user-accessible if set |
/// | 3     | `PWT`           | Write-through caching for the walk |
/// | 4     | `PCD`           | Disable caching for the walk |
/// | 5     | `A`             | Accessed (set by the CPU) |
/// | 6     | —               | Ignored in a non-leaf entry |
/// | 7     | `PS`            | Page size; 0 = points at a page table |
/// | 8     | —               | Ignored in a non-leaf entry |
/// | 9–11  | OS avail        | Ignored by hardware |
/// | 12–31 | `addr`          | Page table base bits [31:12] |
#[doc(alias = "PDE")]
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageDirectoryEntry {
    /// Present (P, bit 0). Clear means the whole 4 MiB region faults.
    pub present: bool,

    /// Writable (RW, bit 1). Must be set for any page below to be writable.
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Must be set for any page below to be
    /// user-accessible.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU when the walk uses this entry.
    pub accessed: bool,

    /// Bit 6 is ignored when the entry points at a page table.
    #[bits(1)]
    __d_ignored: u8,

    /// Page Size (PS, bit 7). Must be 0 here; 1 would make this a 4 MiB
    /// leaf, which this kernel never produces.
    pub page_size: bool,

    /// Bit 8 is ignored when the entry points at a page table.
    #[bits(1)]
    __g_ignored: u8,

    /// OS-available (bits 9..=11). Hardware doesn't interpret these.
    #[bits(3)]
    pub os_available: u8,

    /// Page table base bits [31:12] (bits 12..=31).
    #[bits(20)]
    table_frame: u32,
}

impl PageDirectoryEntry {
    /// Build a PDE targeting the page table at `table_address` with the
    /// kernel's fixed policy.
    ///
    /// PS is forced to 0 (4 KiB translation only), accessed starts cleared,
    /// caching is disabled and write-through selected. The caller controls
    /// only present, writable and user access through `flags`.
    ///
    /// `table_address` must be 4 KiB-aligned; only its bits [31:12] are
    /// representable.
    #[must_use]
    pub const fn make(table_address: PhysicalAddress, flags: EntryFlags) -> Self {
        debug_assert!(table_address.is_page_aligned());
        let mut entry = Self::new()
            .with_page_size(false)
            .with_accessed(false)
            .with_cache_disabled(true)
            .with_write_through(true)
            .with_user_access(flags.privilege.is_user())
            .with_writable(flags.access.is_writable())
            .with_present(flags.present);
        entry.set_table_address(table_address);
        entry
    }

    /// The page table this entry points at.
    #[inline]
    #[must_use]
    pub const fn table_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.table_frame() << 12)
    }

    /// Point this entry at a new page table (bits [31:12] of `address`).
    #[inline]
    pub const fn set_table_address(&mut self, address: PhysicalAddress) {
        self.set_table_frame(address.as_u32() >> 12);
    }
}

/// The Page Directory: 1024 entries, 4 KiB-aligned, covering 4 GiB.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageDirectoryEntry; TABLE_ENTRY_COUNT],
}

impl PageDirectory {
    /// Create a fully zeroed directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageDirectoryEntry::new(); TABLE_ENTRY_COUNT],
        }
    }

    /// Read the entry at `i`. Plain load; no TLB synchronization implied.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PageDirectoryEntry {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller handles any required TLB invalidation when changing the active
    /// directory.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PageDirectoryEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Bounds-checked access by raw index.
    ///
    /// # Errors
    /// [`IndexOutOfRange`] when `index >= 1024`.
    #[inline]
    pub const fn entry(&self, index: usize) -> Result<&PageDirectoryEntry, IndexOutOfRange> {
        if index < TABLE_ENTRY_COUNT {
            Ok(&self.entries[index])
        } else {
            Err(IndexOutOfRange {
                index,
                len: TABLE_ENTRY_COUNT,
            })
        }
    }

    /// Bounds-checked mutable access by raw index.
    ///
    /// # Errors
    /// [`IndexOutOfRange`] when `index >= 1024`.
    #[inline]
    pub const fn entry_mut(
        &mut self,
        index: usize,
    ) -> Result<&mut PageDirectoryEntry, IndexOutOfRange> {
        if index < TABLE_ENTRY_COUNT {
            Ok(&mut self.entries[index])
        } else {
            Err(IndexOutOfRange {
                index,
                len: TABLE_ENTRY_COUNT,
            })
        }
    }
}
