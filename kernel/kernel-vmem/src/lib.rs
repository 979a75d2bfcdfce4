//! # Virtual Memory Support
//!
//! Two-level x86 protected-mode paging structures for the kernel.
//!
//! ## What you get
//! - [`VirtualAddress`]/[`PhysicalAddress`] newtypes (u32) to avoid mixing
//!   address kinds.
//! - Bit-exact [`PageTableEntry`]/[`PageDirectoryEntry`] hardware records.
//! - 4 KiB-aligned [`PageTable`]/[`PageDirectory`] containers of 1024 entries.
//! - The [`Paging`] orchestrator that owns one directory plus its tables and
//!   drives the CPU's paging unit.
//! - A tiny allocator interface ([`BlockAlloc`]) through which the paging
//!   structures obtain their storage.
//!
//! ## x86 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! The CPU uses the first two fields as **indices** into two levels of page
//! tables, each level containing 1024 (2¹⁰) entries of 4 bytes (32 bits):
//!
//! ```text
//!  Page Directory  →  Page Table  →  Physical Page
//!        │                │
//!        │                └───► PTE (Page Table Entry) → maps one 4 KiB page
//!        └────────────────────► PDE (Page Directory Entry) → points at one PT
//! ```
//!
//! A page table covers 4 MiB of address space; the directory covers 4 GiB.
//! The final offset field selects the byte inside the 4 KiB page.
//!
//! Caching is disabled on every mapping by policy (PCD=1, PWT=1); this kernel
//! never produces a cacheable translation.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod addresses;
pub mod bits;
pub mod page_directory;
pub mod page_table;
pub mod paging;

use core::ptr::NonNull;

pub use crate::addresses::{DirectoryIndex, PhysicalAddress, TableIndex, VirtualAddress};
pub use crate::page_directory::{PageDirectory, PageDirectoryEntry};
pub use crate::page_table::{PageTable, PageTableEntry};
pub use crate::paging::{Paging, PagingError};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Whether a mapping is visible to usermode or only to the kernel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrivilegeLevel {
    /// Supervisor only (US=0).
    Kernel,
    /// User accessible (US=1).
    User,
}

/// Whether a mapping can be written to or only read from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessType {
    /// Read-only (RW=0).
    ReadOnly,
    /// Read-write (RW=1).
    ReadWrite,
}

impl PrivilegeLevel {
    /// The US bit value this level encodes to.
    #[must_use]
    pub const fn is_user(self) -> bool {
        matches!(self, Self::User)
    }
}

impl AccessType {
    /// The RW bit value this access type encodes to.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Caller-controlled bits of a freshly built PTE or PDE.
///
/// Everything else (cache policy, accessed/dirty state) is fixed by
/// [`PageTableEntry::make`]/[`PageDirectoryEntry::make`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EntryFlags {
    pub privilege: PrivilegeLevel,
    pub access: AccessType,
    pub present: bool,
}

impl EntryFlags {
    /// Present kernel read-write entry, the common choice for the boot map.
    pub const KERNEL_RW: Self = Self {
        privilege: PrivilegeLevel::Kernel,
        access: AccessType::ReadWrite,
        present: true,
    };
}

/// Permission bits requested by a [`Paging::map`] call.
///
/// `map` always marks the leaf present, so there is no present field here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MapFlags {
    pub privilege: PrivilegeLevel,
    pub access: AccessType,
}

/// How a page table's addresses are initialized.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InitializationMode {
    /// Every entry targets physical address 0.
    Zeroed,
    /// `entry[i]` targets `base_offset + i * PAGE_SIZE`; across a whole
    /// [`Paging`] instance this builds the boot-time identity map.
    Linear,
}

/// The backing allocator could not satisfy a request.
///
/// The implementor logs the underlying cause; at this interface only the
/// fact of the failure travels.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("backing allocator could not satisfy the request")]
pub struct AllocError;

/// Minimal allocator capability used to obtain storage for paging structures.
///
/// The implementation decides where the memory comes from (the kernel's block
/// heap, a static arena, etc.). Blocks handed out for page tables and the
/// directory **must** be 4 KiB-aligned; [`Paging::make`] verifies this.
pub trait BlockAlloc {
    /// Allocate at least `size` bytes.
    fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Release an allocation previously returned by
    /// [`try_allocate`](Self::try_allocate).
    fn try_free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError>;
}

/// An index was outside its table's fixed 1024-entry range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("index {index} is out of range for a {len}-entry table")]
pub struct IndexOutOfRange {
    pub index: usize,
    pub len: usize,
}
