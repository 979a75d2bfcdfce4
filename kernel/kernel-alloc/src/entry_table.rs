//! # Heap Entry Table
//!
//! Marks which blocks of a heap are allocated and which are free. Each
//! entry table belongs to a single heap; the heap hands it a raw region to
//! keep the state bytes in (either carved out of the heap's own region or
//! somewhere else entirely) and talks to it purely in block offsets.

use crate::HeapError;
use core::ptr::{self, NonNull};

bitflags::bitflags! {
    /// One byte of allocation state per heap block.
    ///
    /// `FIRST` and `LAST` both carry the `USED` bit, so a walk over an
    /// allocation sees `USED` everywhere and the boundary markers on top.
    /// A single-block allocation is `FIRST | LAST`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub(crate) struct Entry: u8 {
        const USED  = 0b001;
        const FIRST = 0b011;
        const LAST  = 0b101;
    }
}

/// Allocation state for `total_entries` blocks, one byte per block, living
/// in caller-supplied memory.
pub struct EntryTable {
    table_start: NonNull<Entry>,
    total_entries: usize,
}

// Safety: the table exclusively owns its state bytes; access is serialized
// by whoever owns the surrounding heap.
unsafe impl Send for EntryTable {}

impl EntryTable {
    /// Size of one entry in bytes.
    pub(crate) const ENTRY_SIZE: usize = size_of::<Entry>();

    /// Create a table over `total_entries` state bytes at `table_start`,
    /// all initialized to FREE.
    ///
    /// # Safety
    /// - `table_start .. table_start + total_entries` must be valid,
    ///   writable memory exclusive to this table for its whole lifetime.
    pub unsafe fn new(table_start: NonNull<u8>, total_entries: usize) -> Self {
        unsafe {
            ptr::write_bytes(table_start.as_ptr(), 0, total_entries);
        }
        Self {
            table_start: table_start.cast(),
            total_entries,
        }
    }

    /// The number of blocks this table tracks.
    #[must_use]
    pub const fn total_entries(&self) -> usize {
        self.total_entries
    }

    /// Allocate `entry_amount` contiguous free blocks, first fit.
    ///
    /// Scans from offset 0 and takes the lowest run that is large enough,
    /// marking it FIRST/…/LAST. Returns the offset of the run's first block.
    ///
    /// # Errors
    /// - [`HeapError::InvalidArgument`] when `entry_amount` is zero.
    /// - [`HeapError::AllocationFailure`] when no run is long enough.
    ///
    /// Failures leave the table unmodified.
    pub fn allocate(&mut self, entry_amount: usize) -> Result<usize, HeapError> {
        if entry_amount == 0 {
            log::error!("refusing to allocate zero entries");
            return Err(HeapError::InvalidArgument);
        }

        let mut contiguous_free_entries = 0;
        for index in 0..self.total_entries {
            if self.get(index).is_empty() {
                contiguous_free_entries += 1;
            } else {
                contiguous_free_entries = 0;
            }

            if contiguous_free_entries == entry_amount {
                let first = index + 1 - entry_amount;
                self.mark_entries_as_used(first, entry_amount);
                return Ok(first);
            }
        }

        log::error!("no run of {entry_amount} contiguous free entries");
        Err(HeapError::AllocationFailure)
    }

    /// Free the allocation that starts at `entry_offset`.
    ///
    /// The run is validated first and only then cleared, so a corrupted
    /// table is reported without making it worse.
    ///
    /// # Errors
    /// - [`HeapError::AddressOutOfRange`] when the offset has no entry.
    /// - [`HeapError::CorruptedAllocation`] when the entry at the offset is
    ///   not FIRST (double free, or a free into the middle of a run), when
    ///   a non-USED entry shows up before LAST, or when the run reaches the
    ///   end of the table without a LAST.
    ///
    /// Failures leave the table unmodified.
    pub fn free(&mut self, entry_offset: usize) -> Result<(), HeapError> {
        if entry_offset >= self.total_entries {
            log::error!("trying to free entry {entry_offset} beyond the table");
            return Err(HeapError::AddressOutOfRange);
        }

        if !self.get(entry_offset).contains(Entry::FIRST) {
            log::error!("entry {entry_offset} is not the start of an allocation");
            return Err(HeapError::CorruptedAllocation);
        }

        let mut last = entry_offset;
        while !self.get(last).contains(Entry::LAST) {
            if !self.get(last).contains(Entry::USED) {
                log::error!("free entry inside the allocation at {entry_offset}");
                return Err(HeapError::CorruptedAllocation);
            }
            last += 1;
            if last == self.total_entries {
                log::error!("allocation at {entry_offset} has no end marker");
                return Err(HeapError::CorruptedAllocation);
            }
        }

        for index in entry_offset..=last {
            self.set(index, Entry::empty());
        }

        Ok(())
    }

    fn get(&self, index: usize) -> Entry {
        debug_assert!(index < self.total_entries);
        unsafe { self.table_start.as_ptr().add(index).read() }
    }

    fn set(&mut self, index: usize, entry: Entry) {
        debug_assert!(index < self.total_entries);
        unsafe {
            self.table_start.as_ptr().add(index).write(entry);
        }
    }

    /// Mark a run as allocated: FIRST, then USED, then LAST, or the
    /// combined FIRST|LAST for a single block.
    fn mark_entries_as_used(&mut self, first: usize, entry_amount: usize) {
        if entry_amount == 1 {
            self.set(first, Entry::FIRST | Entry::LAST);
            return;
        }

        for i in 0..entry_amount {
            let marker = if i == 0 {
                Entry::FIRST
            } else if i == entry_amount - 1 {
                Entry::LAST
            } else {
                Entry::USED
            };
            self.set(first + i, marker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A table over `entries` zeroed state bytes; the buffer keeps the
    /// storage alive for the test's duration.
    fn table(buf: &mut Vec<u8>, entries: usize) -> EntryTable {
        buf.resize(entries, 0xAA); // dirty on purpose; new() must zero it
        unsafe {
            EntryTable::new(
                NonNull::new(buf.as_mut_ptr()).expect("vec storage is never null"),
                entries,
            )
        }
    }

    fn snapshot(t: &EntryTable) -> Vec<u8> {
        (0..t.total_entries()).map(|i| t.get(i).bits()).collect()
    }

    #[test]
    fn entry_bytes_are_bit_exact() {
        assert_eq!(Entry::USED.bits(), 1);
        assert_eq!(Entry::FIRST.bits(), 3);
        assert_eq!(Entry::LAST.bits(), 5);
        assert_eq!((Entry::FIRST | Entry::LAST).bits(), 7);
    }

    #[test]
    fn construction_zeroes_the_state() {
        let mut buf = Vec::new();
        let t = table(&mut buf, 8);
        assert_eq!(snapshot(&t), vec![0; 8]);
    }

    #[test]
    fn runs_are_marked_first_used_last() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        assert_eq!(t.allocate(4), Ok(0));
        assert_eq!(snapshot(&t), vec![3, 1, 1, 5, 0, 0, 0, 0]);
    }

    #[test]
    fn single_block_gets_the_combined_marker() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 4);
        assert_eq!(t.allocate(1), Ok(0));
        assert_eq!(snapshot(&t), vec![7, 0, 0, 0]);
    }

    #[test]
    fn allocate_then_free_round_trips_for_every_size() {
        let total = 16;
        for k in 1..=total {
            let mut buf = Vec::new();
            let mut t = table(&mut buf, total);
            let offset = t.allocate(k).expect("allocate");
            assert_eq!(offset, 0);
            t.free(offset).expect("free");
            assert_eq!(snapshot(&t), vec![0; total], "k = {k}");
        }
    }

    #[test]
    fn first_fit_takes_the_lowest_run() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 16);
        assert_eq!(t.allocate(2), Ok(0));
        assert_eq!(t.allocate(1), Ok(2));
        assert_eq!(t.allocate(4), Ok(3));
        t.free(0).expect("free");
        // A run of 2 fits in the hole at the front again.
        assert_eq!(t.allocate(2), Ok(0));
        // A run of 3 does not; it goes after the tail allocation.
        assert_eq!(t.allocate(3), Ok(7));
    }

    #[test]
    fn zero_entries_is_rejected_without_mutation() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        assert_eq!(t.allocate(0), Err(HeapError::InvalidArgument));
        assert_eq!(snapshot(&t), vec![0; 8]);
    }

    #[test]
    fn oversized_request_fails_and_leaves_state_alone() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        assert_eq!(t.allocate(3), Ok(0));
        let before = snapshot(&t);
        assert_eq!(t.allocate(6), Err(HeapError::AllocationFailure));
        assert_eq!(snapshot(&t), before);
    }

    #[test]
    fn fragmented_table_rejects_a_run_that_only_fits_in_total() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        assert_eq!(t.allocate(2), Ok(0));
        assert_eq!(t.allocate(2), Ok(2));
        t.free(0).expect("free");
        // 6 blocks are free but only runs of 2 and 4 exist.
        assert_eq!(t.allocate(5), Err(HeapError::AllocationFailure));
        assert_eq!(t.allocate(4), Ok(4));
    }

    #[test]
    fn free_out_of_range_is_rejected() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        assert_eq!(t.free(8), Err(HeapError::AddressOutOfRange));
        assert_eq!(t.free(usize::MAX), Err(HeapError::AddressOutOfRange));
    }

    #[test]
    fn double_free_is_detected() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        let offset = t.allocate(3).expect("allocate");
        t.free(offset).expect("first free");
        assert_eq!(t.free(offset), Err(HeapError::CorruptedAllocation));
    }

    #[test]
    fn free_from_the_middle_of_a_run_is_detected() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        t.allocate(4).expect("allocate");
        assert_eq!(t.free(1), Err(HeapError::CorruptedAllocation));
        assert_eq!(t.free(3), Err(HeapError::CorruptedAllocation));
        // The run is still intact and freeable from its start.
        t.free(0).expect("free");
        assert_eq!(snapshot(&t), vec![0; 8]);
    }

    #[test]
    fn a_hole_inside_a_run_is_reported_without_mutation() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 8);
        t.allocate(4).expect("allocate");
        // Corrupt the middle of the run.
        t.set(2, Entry::empty());
        let before = snapshot(&t);
        assert_eq!(t.free(0), Err(HeapError::CorruptedAllocation));
        assert_eq!(snapshot(&t), before);
    }

    #[test]
    fn a_run_without_an_end_marker_is_reported() {
        let mut buf = Vec::new();
        let mut t = table(&mut buf, 4);
        t.allocate(4).expect("allocate");
        // Strip the LAST marker; the walk must stop at the table's end.
        t.set(3, Entry::USED);
        let before = snapshot(&t);
        assert_eq!(t.free(0), Err(HeapError::CorruptedAllocation));
        assert_eq!(snapshot(&t), before);
    }
}
