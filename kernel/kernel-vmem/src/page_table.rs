//! # x86 Page Table
//!
//! The lower paging level: [`PageTableEntry`] (PTE) maps exactly one 4 KiB
//! virtual page to one physical page, and [`PageTable`] is the 4 KiB-aligned
//! array of 1024 PTEs the hardware walks after resolving the directory.
//!
//! ## Invariants & Notes
//!
//! - The page base stored in a PTE is 4 KiB-aligned (the low 12 bits do not
//!   exist in the record).
//! - [`PageTableEntry::make`] applies the kernel's fixed cache policy:
//!   caching disabled, write-through, not global, PAT unused, accessed and
//!   dirty cleared. Only present/writable/user come from the caller.
//! - After modifying active mappings the caller owns any TLB maintenance.

use crate::addresses::{PhysicalAddress, TableIndex};
use crate::{EntryFlags, IndexOutOfRange, InitializationMode};
use bitfield_struct::bitfield;
use kernel_info::memory::{PAGE_SIZE, TABLE_ENTRY_COUNT};

/// A single Page Table entry in its raw 32-bit hardware form.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P` (present)   | Valid mapping if set |
/// | 1     | `RW`            | Writable if set |
/// | 2     | `US`            | User-mode accessible if set |
/// | 3     | `PWT`           | Write-through caching |
/// | 4     | `PCD`           | Disable caching |
/// | 5     | `A`             | Accessed (set by the CPU) |
/// | 6     | `D`             | Dirty (set by the CPU on write) |
/// | 7     | `PAT`           | Page Attribute Table index bit |
/// | 8     | `G`             | Global translation |
/// | 9–11  | OS avail        | Ignored by hardware |
/// | 12–31 | `addr`          | Physical page base bits [31:12] |
#[doc(alias = "PTE")]
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Present (P, bit 0). Clear means any access faults.
    pub present: bool,

    /// Writable (RW, bit 1). Clear makes the page read-only.
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Clear restricts to supervisor.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access; software may
    /// clear it to track usage.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write; software may clear
    /// it to track writes.
    pub dirty: bool,

    /// Page Attribute Table (PAT, bit 7). Unused by this kernel, always 0.
    pub page_attribute_table: bool,

    /// Global (G, bit 8). Keeps the TLB entry across CR3 reloads when
    /// CR4.PGE is on. This kernel never sets it.
    pub global_translation: bool,

    /// OS-available (bits 9..=11). Hardware doesn't interpret these.
    #[bits(3)]
    pub os_available: u8,

    /// Physical page base bits [31:12] (bits 12..=31).
    ///
    /// Reconstruct the full address as `(bits << 12)`.
    #[bits(20)]
    page_frame: u32,
}

impl PageTableEntry {
    /// Build a PTE targeting `page_address` with the kernel's fixed policy.
    ///
    /// Caching is disabled and write-through selected on every mapping;
    /// global, PAT, dirty and accessed start cleared. The caller controls
    /// only present, writable and user access through `flags`.
    ///
    /// `page_address` keeps only its bits [31:12]; the low bits are
    /// discarded by the field layout.
    #[must_use]
    pub const fn make(page_address: PhysicalAddress, flags: EntryFlags) -> Self {
        let mut entry = Self::new()
            .with_global_translation(false)
            .with_page_attribute_table(false)
            .with_dirty(false)
            .with_accessed(false)
            .with_cache_disabled(true)
            .with_write_through(true)
            .with_user_access(flags.privilege.is_user())
            .with_writable(flags.access.is_writable())
            .with_present(flags.present);
        entry.set_page_address(page_address);
        entry
    }

    /// The physical page this entry targets.
    #[inline]
    #[must_use]
    pub const fn page_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.page_frame() << 12)
    }

    /// Point this entry at a new physical page (bits [31:12] of `address`).
    #[inline]
    pub const fn set_page_address(&mut self, address: PhysicalAddress) {
        self.set_page_frame(address.as_u32() >> 12);
    }
}

/// The Page Table: 1024 entries, 4 KiB-aligned, covering 4 MiB.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; TABLE_ENTRY_COUNT],
}

impl PageTable {
    /// Create a fully zeroed table (all entries non-present, address 0).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::new(); TABLE_ENTRY_COUNT],
        }
    }

    /// Build a table whose entries all carry `flags`, with addresses chosen
    /// by `mode`: ZEROED targets page 0 everywhere, LINEAR targets
    /// `base_offset + i * PAGE_SIZE` so that a directory full of these forms
    /// an identity map.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_mode(flags: EntryFlags, mode: InitializationMode, base_offset: u32) -> Self {
        let mut entries = [PageTableEntry::new(); TABLE_ENTRY_COUNT];
        for (i, entry) in entries.iter_mut().enumerate() {
            let address = match mode {
                InitializationMode::Zeroed => PhysicalAddress::new(0),
                InitializationMode::Linear => {
                    PhysicalAddress::new(base_offset + i as u32 * PAGE_SIZE as u32)
                }
            };
            *entry = PageTableEntry::make(address, flags);
        }
        Self { entries }
    }

    /// Read the entry at `i`. Plain load; no TLB synchronization implied.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageTableEntry {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller handles any required TLB invalidation when changing active
    /// mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Bounds-checked access by raw index.
    ///
    /// # Errors
    /// [`IndexOutOfRange`] when `index >= 1024`.
    #[inline]
    pub const fn entry(&self, index: usize) -> Result<&PageTableEntry, IndexOutOfRange> {
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
    pub const fn entry_mut(&mut self, index: usize) -> Result<&mut PageTableEntry, IndexOutOfRange> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{get_field, get_flag};
    use crate::{AccessType, PrivilegeLevel};

    #[test]
    fn make_is_bit_exact() {
        let e = PageTableEntry::make(PhysicalAddress::new(0x50_0000), EntryFlags::KERNEL_RW);
        // address | PCD | PWT | RW | P
        assert_eq!(e.into_bits(), 0x50_0000 | 0x10 | 0x8 | 0x2 | 0x1);
    }

    #[test]
    fn make_applies_the_fixed_policy() {
        let e = PageTableEntry::make(
            PhysicalAddress::new(0x1000),
            EntryFlags {
                privilege: PrivilegeLevel::User,
                access: AccessType::ReadOnly,
                present: false,
            },
        );
        let raw = e.into_bits();
        assert!(!get_flag(raw, 0), "present comes from the caller");
        assert!(!get_flag(raw, 1), "read-only");
        assert!(get_flag(raw, 2), "user");
        assert!(get_flag(raw, 3), "write-through is fixed on");
        assert!(get_flag(raw, 4), "cache-disable is fixed on");
        assert!(!get_flag(raw, 5), "starts not accessed");
        assert!(!get_flag(raw, 6), "starts clean");
        assert!(!get_flag(raw, 7), "PAT unused");
        assert!(!get_flag(raw, 8), "never global");
        assert_eq!(get_field(raw, 31, 12), 0x1);
    }

    #[test]
    fn single_bit_mutators_touch_only_their_bit() {
        let mut e = PageTableEntry::make(PhysicalAddress::new(0x3000), EntryFlags::KERNEL_RW);
        let before = e.into_bits();

        e.set_present(false);
        assert_eq!(e.into_bits(), before & !0x1);
        e.set_present(true);
        assert_eq!(e.into_bits(), before);

        e.set_writable(false);
        assert_eq!(e.into_bits(), before & !0x2);
        e.set_writable(true);

        e.set_user_access(true);
        assert_eq!(e.into_bits(), before | 0x4);
        e.set_user_access(false);

        e.set_accessed(true);
        assert!(e.accessed());
        e.set_accessed(false);
        assert!(!e.accessed());
        assert_eq!(e.into_bits(), before);
    }

    #[test]
    fn page_address_round_trips_and_rounds_down() {
        let mut e = PageTableEntry::new();
        e.set_page_address(PhysicalAddress::new(0xDEAD_B000));
        assert_eq!(e.page_address().as_u32(), 0xDEAD_B000);

        // Low bits are not representable and fall away.
        e.set_page_address(PhysicalAddress::new(0xDEAD_BEEF));
        assert_eq!(e.page_address().as_u32(), 0xDEAD_B000);
        assert!(!e.present(), "address writes leave the flags alone");
    }

    #[test]
    fn linear_mode_covers_the_table_span() {
        let table = PageTable::with_mode(EntryFlags::KERNEL_RW, InitializationMode::Linear, 0);
        for i in 0..TABLE_ENTRY_COUNT {
            let e = table.entry(i).unwrap();
            assert_eq!(e.page_address().as_u32(), i as u32 * 4096);
            assert!(e.present());
        }
    }

    #[test]
    fn linear_mode_honors_the_base_offset() {
        let base = 3 * 1024 * 4096; // fourth directory slot
        let table = PageTable::with_mode(EntryFlags::KERNEL_RW, InitializationMode::Linear, base);
        assert_eq!(table.get(TableIndex::new(0)).page_address().as_u32(), base);
        assert_eq!(
            table.get(TableIndex::new(7)).page_address().as_u32(),
            base + 7 * 4096
        );
    }

    #[test]
    fn zeroed_mode_targets_page_zero() {
        let table = PageTable::with_mode(EntryFlags::KERNEL_RW, InitializationMode::Zeroed, 0);
        for i in 0..TABLE_ENTRY_COUNT {
            assert_eq!(table.entry(i).unwrap().page_address().as_u32(), 0);
        }
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut table = PageTable::zeroed();
        assert!(table.entry(1023).is_ok());
        let err = table.entry(1024).unwrap_err();
        assert_eq!(err.index, 1024);
        assert_eq!(err.len, 1024);
        assert!(table.entry_mut(usize::MAX).is_err());
    }
}
