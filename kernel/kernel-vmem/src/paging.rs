//! # Paging Orchestrator
//!
//! [`Paging`] owns one page directory and the 1024 page tables behind it,
//! obtained through the [`BlockAlloc`] capability, and exposes the mapping
//! operation plus the hooks that hand the structures to the CPU.
//!
//! ## Lifecycle
//!
//! ```text
//! UNINITIALIZED ──make()──► BUILT ──load()──► LOADED ──enable()──► ENABLED
//! ```
//!
//! `map` is legal in BUILT or LOADED. There is no way back to UNINITIALIZED
//! except destruction, which returns every table, the table arena and the
//! directory to the allocator. A `make` that fails partway performs the same
//! teardown before reporting; the arena's slots are nullable precisely so
//! teardown can tell what exists.

use crate::addresses::{DirectoryIndex, PhysicalAddress, VirtualAddress};
use crate::page_directory::{PageDirectory, PageDirectoryEntry};
use crate::page_table::PageTable;
use crate::{BlockAlloc, EntryFlags, IndexOutOfRange, InitializationMode, MapFlags};
use core::ptr::NonNull;
use kernel_info::memory::{TABLE_ENTRY_COUNT, TABLE_SPAN};

/// Per-directory-slot table arena: one nullable pointer per PDE.
///
/// `map` reaches page tables exclusively through this array, never by
/// decoding a PDE's address field; the PDE word is for the hardware.
type TableSlots = [Option<NonNull<PageTable>>; TABLE_ENTRY_COUNT];

/// Failures of the paging layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    /// The backing allocator could not provide storage for the directory,
    /// the table arena or a page table.
    #[error("out of memory while building paging structures")]
    AllocationFailure,

    /// A `map` call addressed a region whose directory entry is not present.
    #[error("can't map address because of non-present page table")]
    NonPresentPageTable,

    /// An address or an allocator-provided block was not page aligned.
    #[error("address is not page aligned")]
    AlignmentViolation,

    /// A raw table index was outside the fixed 1024-entry range.
    #[error(transparent)]
    IndexOutOfRange(#[from] IndexOutOfRange),
}

/// Exclusive owner of one page directory and its page tables.
pub struct Paging<'a, A: BlockAlloc> {
    alloc: &'a mut A,
    directory: NonNull<PageDirectory>,
    tables: NonNull<TableSlots>,
}

impl<'a, A: BlockAlloc> Paging<'a, A> {
    /// Build a complete two-level structure: one directory and one page
    /// table per directory slot.
    ///
    /// In [`InitializationMode::Linear`] the leaf addresses rise by 4096
    /// per entry starting at 0, covering all 4 GiB with a 1:1 map; in
    /// [`InitializationMode::Zeroed`] every leaf targets page 0. Every PDE
    /// is built from its table's address after that table exists and
    /// carries `directory_flags`; leaves carry `table_flags`.
    ///
    /// # Errors
    /// [`PagingError::AllocationFailure`] when the allocator runs out, and
    /// [`PagingError::AlignmentViolation`] when it hands back storage that
    /// is not 4 KiB-aligned. Either way everything allocated so far has
    /// been returned before this function reports the failure.
    pub fn make(
        alloc: &'a mut A,
        directory_flags: EntryFlags,
        table_flags: EntryFlags,
        mode: InitializationMode,
    ) -> Result<Self, PagingError> {
        let tables = allocate_as::<A, TableSlots>(alloc)?;
        unsafe {
            tables.as_ptr().write([None; TABLE_ENTRY_COUNT]);
        }

        let directory = match allocate_as::<A, PageDirectory>(alloc) {
            Ok(directory) => directory,
            Err(e) => {
                release(alloc, tables, None);
                return Err(e);
            }
        };
        unsafe {
            directory.as_ptr().write(PageDirectory::zeroed());
        }

        for index in 0..TABLE_ENTRY_COUNT {
            let table = match allocate_as::<A, PageTable>(alloc) {
                Ok(table) => table,
                Err(e) => {
                    release(alloc, tables, Some(directory));
                    return Err(e);
                }
            };

            #[allow(clippy::cast_possible_truncation)]
            let base_offset = (index * TABLE_SPAN) as u32;
            unsafe {
                table
                    .as_ptr()
                    .write(PageTable::with_mode(table_flags, mode, base_offset));
                (*tables.as_ptr())[index] = Some(table);
                (*directory.as_ptr()).set(
                    DirectoryIndex::new(index as u16),
                    PageDirectoryEntry::make(
                        PhysicalAddress::from_ptr(table.as_ptr().cast()),
                        directory_flags,
                    ),
                );
            }
        }

        Ok(Self {
            alloc,
            directory,
            tables,
        })
    }

    /// Map one 4 KiB virtual page onto one physical page.
    ///
    /// Rewrites the target PTE's address and permission bits, widens the
    /// covering PDE's writable/user bits when the leaf requests more than
    /// the PDE currently grants (never narrows them; other pages share the
    /// region), and marks the PTE present.
    ///
    /// # Errors
    /// - [`PagingError::AlignmentViolation`] when either address has low
    ///   bits set; nothing is written.
    /// - [`PagingError::NonPresentPageTable`] when the covering PDE is not
    ///   present; nothing is written.
    pub fn map(
        &mut self,
        virtual_address: VirtualAddress,
        physical_address: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), PagingError> {
        if !virtual_address.is_page_aligned() || !physical_address.is_page_aligned() {
            log::error!("map request is not page aligned: {virtual_address} -> {physical_address}");
            return Err(PagingError::AlignmentViolation);
        }

        let directory_index = virtual_address.directory_index();
        let directory = unsafe { self.directory.as_mut() };
        let pde = directory.get(directory_index);
        if !pde.present() {
            log::error!(
                "can't map {virtual_address}: directory entry {} is not present",
                directory_index.as_usize()
            );
            return Err(PagingError::NonPresentPageTable);
        }

        let Some(table) = unsafe { self.tables.as_ref() }[directory_index.as_usize()] else {
            // A present PDE without a backing table means something outside
            // this module corrupted the instance; report it, don't crash.
            log::error!(
                "directory entry {} is present but has no backing table",
                directory_index.as_usize()
            );
            return Err(PagingError::NonPresentPageTable);
        };
        let table = unsafe { &mut *table.as_ptr() };

        let table_index = virtual_address.table_index();
        let mut pte = table.get(table_index);
        pte.set_page_address(physical_address);
        pte.set_writable(flags.access.is_writable());
        pte.set_user_access(flags.privilege.is_user());
        pte.set_present(true);
        table.set(table_index, pte);

        let mut widened = pde;
        if pte.writable() && !pde.writable() {
            widened.set_writable(true);
        }
        if pte.user_access() && !pde.user_access() {
            widened.set_user_access(true);
        }
        if widened != pde {
            directory.set(directory_index, widened);
        }

        Ok(())
    }

    /// Base address of the page directory, as loaded into CR3.
    #[must_use]
    pub fn directory_address(&self) -> PhysicalAddress {
        PhysicalAddress::from_ptr(self.directory.as_ptr().cast())
    }

    /// Borrow the page directory.
    #[must_use]
    pub fn directory(&self) -> &PageDirectory {
        unsafe { self.directory.as_ref() }
    }

    /// Borrow the page table behind directory slot `index`, if one exists.
    #[must_use]
    pub fn table(&self, index: DirectoryIndex) -> Option<&PageTable> {
        (unsafe { self.tables.as_ref() })[index.as_usize()].map(|table| unsafe { &*table.as_ptr() })
    }
}

impl<A: BlockAlloc> Drop for Paging<'_, A> {
    fn drop(&mut self) {
        release(self.alloc, self.tables, Some(self.directory));
    }
}

/// Allocate storage for a `T` through the capability and check alignment.
fn allocate_as<A: BlockAlloc, T>(alloc: &mut A) -> Result<NonNull<T>, PagingError> {
    let raw = alloc.try_allocate(size_of::<T>()).map_err(|_| {
        log::error!(
            "allocation of {} bytes for a paging structure failed",
            size_of::<T>()
        );
        PagingError::AllocationFailure
    })?;
    if (raw.as_ptr() as usize) % align_of::<T>() != 0 {
        log::error!("backing allocator returned a misaligned block for a paging structure");
        if alloc.try_free(raw).is_err() {
            log::error!("leaked the misaligned block as well");
        }
        return Err(PagingError::AlignmentViolation);
    }
    Ok(raw.cast())
}

/// Return every table, the arena and (if built) the directory to the
/// allocator, in that order.
///
/// Tolerates any partially-built state: slots still `None` are skipped.
/// Free failures are logged and skipped; teardown must finish.
fn release<A: BlockAlloc>(
    alloc: &mut A,
    tables: NonNull<TableSlots>,
    directory: Option<NonNull<PageDirectory>>,
) {
    let slots = unsafe { &mut *tables.as_ptr() };
    for slot in slots.iter_mut() {
        if let Some(table) = slot.take() {
            if alloc.try_free(table.cast()).is_err() {
                log::error!("leaked a page table during paging teardown");
            }
        }
    }
    if alloc.try_free(tables.cast()).is_err() {
        log::error!("leaked the table arena during paging teardown");
    }
    if let Some(directory) = directory {
        if alloc.try_free(directory.cast()).is_err() {
            log::error!("leaked the page directory during paging teardown");
        }
    }
}

/// Make the paging unit use `instance`'s directory.
///
/// # Safety
/// - Requires Ring 0.
/// - The instance must stay alive (and its mappings valid for all code and
///   data the CPU touches) for as long as it is loaded.
#[cfg(feature = "asm")]
pub unsafe fn load<A: BlockAlloc>(instance: &Paging<'_, A>) {
    use kernel_registers::{Cr3, StoreRegisterUnsafe};
    let cr3 = Cr3::from_directory_phys(instance.directory_address().as_u32(), false, false);
    unsafe { cr3.store_unsafe() }
}

/// Enable paging in the processor.
///
/// # Safety
/// A page directory must have been loaded with [`load`] first. Enabling the
/// paging unit with a stale or absent CR3 faults the processor beyond
/// recovery; this cannot be reported as an error, the caller must uphold
/// the ordering.
#[cfg(feature = "asm")]
pub unsafe fn enable() {
    use kernel_registers::{Cr0, LoadRegisterUnsafe, StoreRegisterUnsafe};
    unsafe {
        let cr0 = Cr0::load_unsafe().with_pg_paging(true);
        cr0.store_unsafe();
    }
}

/// Disable paging in the processor.
///
/// # Safety
/// - Requires Ring 0.
/// - Execution must be able to continue on physical addresses (the code
///   performing the switch must be identity-mapped).
#[cfg(feature = "asm")]
pub unsafe fn disable() {
    use kernel_registers::{Cr0, LoadRegisterUnsafe, StoreRegisterUnsafe};
    unsafe {
        let cr0 = Cr0::load_unsafe().with_pg_paging(false);
        cr0.store_unsafe();
    }
}
