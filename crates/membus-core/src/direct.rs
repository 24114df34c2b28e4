//! Last-resolved-range cache for repeated reads from backed memory.
//!
//! The cache keeps, per handler slot, the contiguous windows already derived from the read table,
//! and one live [`DirectAccessEntry`] holding the base pointer of the window most recently used.
//! Installs drop every window they intersect; bank retargets drop the live entry.

use std::cell::RefCell;

use crate::table::SUBTABLE_BASE;
use crate::{BackingPtr, DataWidth, Endianness, Offset};

/// A resolved window: every byte in `valid_start..=valid_end` dispatches to `table_entry`, whose
/// storage begins at `base`.
#[derive(Debug, Clone)]
pub struct DirectAccessEntry {
    /// Read-table slot index the window resolves to.
    pub table_entry: u16,
    /// First byte of the window.
    pub valid_start: Offset,
    /// Last byte of the window.
    pub valid_end: Offset,
    base: BackingPtr,
    slot_start: Offset,
    slot_mask: Offset,
}

impl DirectAccessEntry {
    pub(crate) const fn new(
        table_entry: u16,
        valid_start: Offset,
        valid_end: Offset,
        base: BackingPtr,
        slot_start: Offset,
        slot_mask: Offset,
    ) -> Self {
        Self {
            table_entry,
            valid_start,
            valid_end,
            base,
            slot_start,
            slot_mask,
        }
    }

    /// Storage the window reads from.
    #[must_use]
    pub const fn base(&self) -> &BackingPtr {
        &self.base
    }

    fn read(&self, byteaddress: Offset, width: DataWidth, endianness: Endianness) -> Option<u64> {
        let last = byteaddress.checked_add(width.bytes() - 1)?;
        if byteaddress < self.valid_start || last > self.valid_end {
            return None;
        }
        let first_offset = byteaddress.wrapping_sub(self.slot_start) & self.slot_mask;
        let last_offset = last.wrapping_sub(self.slot_start) & self.slot_mask;
        // the unit must not straddle a folded mirror boundary
        if last_offset.checked_sub(first_offset)? != width.bytes() - 1 {
            return None;
        }
        self.base.read(first_offset as usize, width, endianness)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirectRange {
    start: Offset,
    end: Offset,
}

/// Per-space direct-access cache.
#[derive(Debug)]
pub struct DirectCache {
    ranges: RefCell<Vec<Vec<DirectRange>>>,
    current: RefCell<Option<DirectAccessEntry>>,
}

impl Default for DirectCache {
    fn default() -> Self {
        Self {
            ranges: RefCell::new(vec![Vec::new(); usize::from(SUBTABLE_BASE)]),
            current: RefCell::new(None),
        }
    }
}

impl DirectCache {
    /// Snapshot of the live window, if any.
    #[must_use]
    pub fn current(&self) -> Option<DirectAccessEntry> {
        self.current.borrow().clone()
    }

    /// Number of windows remembered for `entry`.
    #[must_use]
    pub fn cached_ranges(&self, entry: u16) -> usize {
        self.ranges
            .borrow()
            .get(usize::from(entry))
            .map_or(0, Vec::len)
    }

    /// Reads through the live window; `None` on a miss.
    pub(crate) fn read(
        &self,
        byteaddress: Offset,
        width: DataWidth,
        endianness: Endianness,
    ) -> Option<u64> {
        self.current
            .borrow()
            .as_ref()?
            .read(byteaddress, width, endianness)
    }

    /// Window previously derived for `entry` that contains `byteaddress`.
    pub(crate) fn find_range(&self, entry: u16, byteaddress: Offset) -> Option<(Offset, Offset)> {
        self.ranges
            .borrow()
            .get(usize::from(entry))?
            .iter()
            .find(|range| range.start <= byteaddress && byteaddress <= range.end)
            .map(|range| (range.start, range.end))
    }

    pub(crate) fn record_range(&self, entry: u16, start: Offset, end: Offset) {
        if let Some(list) = self.ranges.borrow_mut().get_mut(usize::from(entry)) {
            list.insert(0, DirectRange { start, end });
        }
    }

    pub(crate) fn set_current(&self, entry: Option<DirectAccessEntry>) {
        *self.current.borrow_mut() = entry;
    }

    /// Forgets every window intersecting `start..=end`, including the live one.
    pub fn remove_intersecting_ranges(&self, start: Offset, end: Offset) {
        for list in self.ranges.borrow_mut().iter_mut() {
            list.retain(|range| !(start <= range.end && end >= range.start));
        }
        let mut current = self.current.borrow_mut();
        if current
            .as_ref()
            .is_some_and(|live| start <= live.valid_end && end >= live.valid_start)
        {
            *current = None;
        }
    }

    /// Drops the live window if it resolves to `entry`.
    pub fn force_update_entry(&self, entry: u16) {
        let mut current = self.current.borrow_mut();
        if current.as_ref().is_some_and(|live| live.table_entry == entry) {
            *current = None;
        }
    }

    /// Drops the live window unconditionally; remembered windows stay valid because the table
    /// itself did not change.
    pub fn force_update(&self) {
        *self.current.borrow_mut() = None;
    }
}
