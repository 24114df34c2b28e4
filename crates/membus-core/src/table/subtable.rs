//! Level-2 subtable pool: allocation, copy-on-write sharing and duplicate merging.

use super::{DispatchTable, SUBTABLE_ALLOC, SUBTABLE_BASE, SUBTABLE_COUNT};
use crate::handler::STATIC_INVALID;
use crate::{MemoryError, Offset};

impl DispatchTable {
    fn subtable_index(entry: u16) -> usize {
        usize::from(entry - SUBTABLE_BASE)
    }

    fn subtable_cells(&self, entry: u16) -> std::ops::Range<usize> {
        let base = self.level2_index(entry, 0);
        base..base + (1 << self.level2_bits)
    }

    /// Number of subtables currently in use.
    #[must_use]
    pub fn live_subtables(&self) -> usize {
        self.subtables
            .iter()
            .filter(|subtable| subtable.usecount != 0)
            .count()
    }

    /// Claims an unused subtable, growing the cell array in groups and merging duplicates when the
    /// pool is full.
    pub(super) fn subtable_alloc(&mut self) -> Result<u16, MemoryError> {
        loop {
            if let Some(index) = self
                .subtables
                .iter()
                .position(|subtable| subtable.usecount == 0)
            {
                #[allow(clippy::cast_possible_truncation)]
                let index = index as u16;
                if index >= self.subtable_alloc {
                    self.subtable_alloc += SUBTABLE_ALLOC;
                    let len = (1usize << self.level1_bits)
                        + (usize::from(self.subtable_alloc) << self.level2_bits);
                    self.cells.resize(len, STATIC_INVALID);
                }
                self.subtables[usize::from(index)].usecount += 1;
                return Ok(SUBTABLE_BASE + index);
            }
            if self.subtable_merge() == 0 {
                return Err(MemoryError::SubtablesExhausted {
                    table: self.kind.label(),
                });
            }
        }
    }

    pub(super) fn subtable_realloc(&mut self, entry: u16) {
        let subtable = &mut self.subtables[Self::subtable_index(entry)];
        debug_assert!(subtable.usecount != 0, "reallocating a free subtable");
        subtable.usecount += 1;
    }

    /// Drops one level-1 reference; a subtable reaching zero releases every cell it held.
    pub(super) fn subtable_release(&mut self, entry: u16) {
        let index = Self::subtable_index(entry);
        debug_assert!(self.subtables[index].usecount != 0, "releasing a free subtable");
        self.subtables[index].usecount = self.subtables[index].usecount.saturating_sub(1);
        if self.subtables[index].usecount == 0 {
            self.subtables[index].checksum_valid = false;
            self.subtables[index].checksum = 0;
            for cell in self.subtable_cells(entry) {
                let old = self.cells[cell];
                self.slots.release(old);
            }
        }
    }

    fn subtable_checksum(&self, entry: u16) -> u32 {
        self.cells[self.subtable_cells(entry)]
            .chunks(2)
            .fold(0u32, |sum, pair| {
                let low = u32::from(pair[0]);
                let high = pair.get(1).map_or(0, |cell| u32::from(*cell));
                sum.wrapping_add(low | (high << 16))
            })
    }

    /// Folds subtables with identical contents together. Returns the number of level-1 cells
    /// that were repointed.
    pub(super) fn subtable_merge(&mut self) -> usize {
        for index in 0..usize::from(SUBTABLE_COUNT) {
            let data = self.subtables[index];
            if data.usecount != 0 && !data.checksum_valid {
                #[allow(clippy::cast_possible_truncation)]
                let checksum = self.subtable_checksum(SUBTABLE_BASE + index as u16);
                self.subtables[index].checksum = checksum;
                self.subtables[index].checksum_valid = true;
            }
        }

        let mut merged = 0;
        for keep in 0..SUBTABLE_COUNT {
            if self.subtables[usize::from(keep)].usecount == 0 {
                continue;
            }
            let keep_entry = SUBTABLE_BASE + keep;
            for dup in keep + 1..SUBTABLE_COUNT {
                let dup_entry = SUBTABLE_BASE + dup;
                let candidate = self.subtables[usize::from(dup)];
                if candidate.usecount == 0
                    || candidate.checksum != self.subtables[usize::from(keep)].checksum
                    || self.cells[self.subtable_cells(keep_entry)]
                        != self.cells[self.subtable_cells(dup_entry)]
                {
                    continue;
                }
                for l1index in 0..1usize << self.level1_bits {
                    if self.cells[l1index] == dup_entry {
                        self.subtable_release(dup_entry);
                        self.subtable_realloc(keep_entry);
                        self.cells[l1index] = keep_entry;
                        merged += 1;
                    }
                }
            }
        }
        if merged != 0 {
            log::info!(
                "{} table: merged {merged} duplicate subtable references",
                self.kind.label()
            );
        }
        merged
    }

    /// Makes the subtable behind `l1index` private and writable, creating it from a direct
    /// level-1 entry or copying it away from other users. Returns the index of its first cell.
    pub(super) fn subtable_open(&mut self, l1index: Offset) -> Result<usize, MemoryError> {
        let l1index = l1index as usize;
        let mut subentry = self.cells[l1index];

        if subentry < SUBTABLE_BASE {
            let newentry = self.subtable_alloc()?;
            let size = 1u32 << self.level2_bits;
            // the level-1 cell held one reference; the subtable holds one per cell
            self.slots.add_ref(subentry, size - 1);
            let cells = self.subtable_cells(newentry);
            self.cells[cells].fill(subentry);
            self.cells[l1index] = newentry;
            subentry = newentry;
        } else if self.subtables[Self::subtable_index(subentry)].usecount > 1 {
            let newentry = self.subtable_alloc()?;
            // allocation may have merged; the cell might name a different subtable now
            subentry = self.cells[l1index];
            let source = self.subtable_cells(subentry);
            for cell in source.clone() {
                let held = self.cells[cell];
                self.slots.add_ref(held, 1);
            }
            let target = self.subtable_cells(newentry).start;
            self.cells.copy_within(source, target);
            self.subtable_release(subentry);
            self.cells[l1index] = newentry;
            subentry = newentry;
        }

        self.subtables[Self::subtable_index(subentry)].checksum_valid = false;
        Ok(self.subtable_cells(subentry).start)
    }
}
