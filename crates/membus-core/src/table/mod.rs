//! Two-level dispatch table mapping byte addresses to handler slots.
//!
//! Small spaces use a single level with one cell per byte. Larger spaces split the address into a
//! level-1 index and a [`LEVEL2_BITS`]-bit level-2 index: a level-1 cell either names a slot for
//! its whole block or points at one of [`SUBTABLE_COUNT`] shared subtables.
//!
//! Every table keeps a parallel tap template of the same level-1 shape whose cells all name
//! [`STATIC_TAP`]. Tapping a table flips a selector; lookups from then on come from the template.

use std::cell::Cell;
use std::rc::Rc;

mod subtable;

use crate::handler::{
    HandlerSlot, SlotPool, SLOT_COUNT, STATIC_COUNT, STATIC_INVALID, STATIC_NOP, STATIC_TAP,
    STATIC_UNMAP,
};
use crate::{AccessKind, DirectCache, MemoryError, Offset};

/// First cell value that names a subtable instead of a slot.
pub const SUBTABLE_BASE: u16 = SLOT_COUNT;
/// Number of subtables a table can hold.
pub const SUBTABLE_COUNT: u16 = 64;
/// Total distinct cell values.
pub const TOTAL_ENTRIES: u16 = SUBTABLE_BASE + SUBTABLE_COUNT;
/// Subtables are allocated in groups of this many.
pub const SUBTABLE_ALLOC: u16 = 8;
/// Address bits resolved by a subtable.
pub const LEVEL2_BITS: u32 = 14;
/// Spaces up to this many byte-address bits use a single-level table.
pub const SINGLE_LEVEL_MAX_BITS: u32 = 18;

const _: () = assert_table_layout();

const fn assert_table_layout() {
    assert!(TOTAL_ENTRIES == 512, "cell values must fit the 512-entry layout");
    assert!(STATIC_COUNT < SUBTABLE_BASE, "fixed slots must precede subtables");
    assert!(SUBTABLE_COUNT % SUBTABLE_ALLOC == 0, "subtable groups must tile the pool");
    assert!(STATIC_TAP < STATIC_COUNT, "tap proxy must be a fixed slot");
}

/// Which array answers live lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LiveTable {
    Normal,
    Tap,
}

/// Builds the tap template for a table with `level1_len` level-1 cells.
#[must_use]
pub fn tap_template(level1_len: usize) -> Rc<[u16]> {
    vec![STATIC_TAP; level1_len].into()
}

/// Number of level-1 cells a table covering `bytemask` needs.
#[must_use]
pub const fn level1_len(bytemask: Offset) -> usize {
    let (level1_bits, _) = table_shape(bytemask);
    1 << level1_bits
}

const fn table_shape(bytemask: Offset) -> (u32, u32) {
    let bits = Offset::BITS - bytemask.leading_zeros();
    if bits > SINGLE_LEVEL_MAX_BITS {
        (bits - LEVEL2_BITS, LEVEL2_BITS)
    } else {
        (bits, 0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SubtableData {
    checksum_valid: bool,
    checksum: u32,
    usecount: u32,
}

/// One of a space's three dispatch tables together with its slot pool.
#[derive(Debug)]
pub struct DispatchTable {
    kind: AccessKind,
    bytemask: Offset,
    level1_bits: u32,
    level2_bits: u32,
    cells: Vec<u16>,
    tap_cells: Rc<[u16]>,
    live: Cell<LiveTable>,
    subtables: Vec<SubtableData>,
    subtable_alloc: u16,
    slots: SlotPool,
}

impl DispatchTable {
    /// Creates a table for a space decoding `bytemask`, every cell initially unmapped (no-op for
    /// the set-address table). `tap_cells` must have [`level1_len`] cells.
    #[must_use]
    pub fn new(kind: AccessKind, bytemask: Offset, tap_cells: Rc<[u16]>) -> Self {
        let (level1_bits, level2_bits) = table_shape(bytemask);
        let fill = match kind {
            AccessKind::Read | AccessKind::Write => STATIC_UNMAP,
            AccessKind::SetAddress => STATIC_NOP,
        };
        debug_assert_eq!(tap_cells.len(), 1 << level1_bits);
        Self {
            kind,
            bytemask,
            level1_bits,
            level2_bits,
            cells: vec![fill; 1 << level1_bits],
            tap_cells,
            live: Cell::new(LiveTable::Normal),
            subtables: vec![SubtableData::default(); usize::from(SUBTABLE_COUNT)],
            subtable_alloc: 0,
            slots: SlotPool::new(bytemask),
        }
    }

    /// Which accesses this table dispatches.
    #[must_use]
    pub const fn kind(&self) -> AccessKind {
        self.kind
    }

    /// Byte mask of the space.
    #[must_use]
    pub const fn bytemask(&self) -> Offset {
        self.bytemask
    }

    /// Level-1 index width in bits.
    #[must_use]
    pub const fn level1_bits(&self) -> u32 {
        self.level1_bits
    }

    /// Level-2 index width in bits; zero for single-level tables.
    #[must_use]
    pub const fn level2_bits(&self) -> u32 {
        self.level2_bits
    }

    /// Slot pool of the table.
    #[must_use]
    pub const fn slots(&self) -> &SlotPool {
        &self.slots
    }

    /// Slot at `entry`.
    #[must_use]
    pub fn slot(&self, entry: u16) -> &HandlerSlot {
        self.slots.get(entry)
    }

    pub(crate) fn slot_mut(&mut self, entry: u16) -> &mut HandlerSlot {
        self.slots.get_mut(entry)
    }

    /// Display name of the slot at `entry`.
    #[must_use]
    pub fn handler_name(&self, entry: u16) -> String {
        if entry == STATIC_INVALID {
            "invalid".to_string()
        } else {
            self.slots.get(entry).kind().name()
        }
    }

    /// True while the tap template answers live lookups.
    #[must_use]
    pub fn is_tapped(&self) -> bool {
        self.live.get() == LiveTable::Tap
    }

    pub(crate) fn set_tapped(&self, tapped: bool) {
        self.live.set(if tapped {
            LiveTable::Tap
        } else {
            LiveTable::Normal
        });
    }

    pub(crate) fn swap_live(&self, live: LiveTable) -> LiveTable {
        self.live.replace(live)
    }

    pub(crate) fn restore_live(&self, live: LiveTable) {
        self.live.set(live);
    }

    #[inline]
    const fn level1_index(&self, byteaddress: Offset) -> usize {
        ((byteaddress & self.bytemask) >> self.level2_bits) as usize
    }

    #[inline]
    fn level2_index(&self, l1entry: u16, byteaddress: Offset) -> usize {
        let level2_mask = (1 << self.level2_bits) - 1;
        (1 << self.level1_bits)
            + (usize::from(l1entry - SUBTABLE_BASE) << self.level2_bits)
            + (byteaddress & level2_mask) as usize
    }

    /// Slot the normal table assigns to `byteaddress`, ignoring any tap.
    #[inline]
    #[must_use]
    pub fn lookup(&self, byteaddress: Offset) -> u16 {
        let entry = self.cells[self.level1_index(byteaddress)];
        if entry >= SUBTABLE_BASE {
            self.cells[self.level2_index(entry, byteaddress)]
        } else {
            entry
        }
    }

    /// Slot the currently selected table assigns to `byteaddress`.
    #[inline]
    #[must_use]
    pub fn lookup_live(&self, byteaddress: Offset) -> u16 {
        match self.live.get() {
            LiveTable::Normal => self.lookup(byteaddress),
            LiveTable::Tap => self.tap_cells[self.level1_index(byteaddress)],
        }
    }

    /// Grabs a free dynamic slot, merging subtables once if the pool is empty.
    pub(crate) fn allocate_slot(&mut self) -> Result<u16, MemoryError> {
        if let Some(entry) = self.slots.allocate() {
            return Ok(entry);
        }
        self.subtable_merge();
        self.slots.allocate().ok_or(MemoryError::SlotPoolExhausted {
            table: self.kind.label(),
        })
    }

    /// Points every byte of `bytestart..=byteend` at `entry`.
    pub(crate) fn populate_range(
        &mut self,
        bytestart: Offset,
        byteend: Offset,
        entry: u16,
    ) -> Result<(), MemoryError> {
        if bytestart > byteend {
            return Ok(());
        }
        let l2mask: Offset = (1 << self.level2_bits) - 1;
        let mut l1start = bytestart >> self.level2_bits;
        let l2start = bytestart & l2mask;
        let mut l1stop = byteend >> self.level2_bits;
        let l2stop = byteend & l2mask;

        // leading partial block
        if l2start != 0 {
            let base = self.subtable_open(l1start)?;
            if l1start == l1stop {
                self.fill_cells(base + l2start as usize, base + l2stop as usize, entry);
                return Ok(());
            }
            self.fill_cells(base + l2start as usize, base + l2mask as usize, entry);
            l1start += 1;
        }

        // trailing partial block
        if l2stop != l2mask {
            let base = self.subtable_open(l1stop)?;
            self.fill_cells(base, base + l2stop as usize, entry);
            if l1start == l1stop {
                return Ok(());
            }
            l1stop -= 1;
        }

        // whole blocks; take the new references first so the old ones can drop to zero safely
        self.slots.add_ref(entry, l1stop - l1start + 1);
        for l1index in l1start..=l1stop {
            let old = self.cells[l1index as usize];
            if old >= SUBTABLE_BASE {
                self.subtable_release(old);
            } else {
                self.slots.release(old);
            }
            self.cells[l1index as usize] = entry;
        }
        Ok(())
    }

    fn fill_cells(&mut self, first: usize, last: usize, entry: u16) {
        #[allow(clippy::cast_possible_truncation)]
        self.slots.add_ref(entry, (last - first + 1) as u32);
        for index in first..=last {
            let old = self.cells[index];
            self.slots.release(old);
            self.cells[index] = entry;
        }
    }

    /// Points every mirror copy of `bytestart..=byteend` at `entry`.
    ///
    /// Copies that land entirely inside one level-1 block whose contents match the previous copy
    /// share that block's subtable instead of filling a new one.
    pub(crate) fn populate_range_mirrored(
        &mut self,
        bytestart: Offset,
        byteend: Offset,
        bytemirror: Offset,
        entry: u16,
        cache: &DirectCache,
    ) -> Result<(), MemoryError> {
        let l2mask: Offset = (1 << self.level2_bits) - 1;
        let lmirrorbits: Vec<Offset> = mirror_bit_positions(bytemirror & l2mask);
        let hmirrorbits: Vec<Offset> = mirror_bit_positions(bytemirror & !l2mask);
        let lmirrorcount = 1u32 << lmirrorbits.len();
        let hmirrorcount = 1u32 << hmirrorbits.len();

        let mut prev_entry = STATIC_INVALID;
        let mut prev_index = 0;
        for hmirror in 0..hmirrorcount {
            let hmirrorbase = combine_mirror_bits(hmirror, &hmirrorbits);
            for lmirror in 0..lmirrorcount {
                let lmirrorbase = hmirrorbase | combine_mirror_bits(lmirror, &lmirrorbits);
                cache.remove_intersecting_ranges(bytestart + lmirrorbase, byteend + lmirrorbase);
            }

            let cur_index = self.level1_index(bytestart + hmirrorbase);
            if cur_index == self.level1_index(byteend + hmirrorbase) {
                if hmirror != 0 && prev_entry == self.cells[cur_index] {
                    // same block contents as the previous copy: share its subtable
                    let current = self.cells[cur_index];
                    if current >= SUBTABLE_BASE {
                        self.subtable_release(current);
                    } else {
                        self.slots.release(current);
                    }
                    let shared = self.cells[prev_index];
                    if shared >= SUBTABLE_BASE {
                        self.subtable_realloc(shared);
                    } else {
                        self.slots.add_ref(shared, 1);
                    }
                    self.cells[cur_index] = shared;
                    continue;
                }
                prev_index = cur_index;
                prev_entry = self.cells[cur_index];
            }

            for lmirror in 0..lmirrorcount {
                let lmirrorbase = hmirrorbase | combine_mirror_bits(lmirror, &lmirrorbits);
                self.populate_range(bytestart + lmirrorbase, byteend + lmirrorbase, entry)?;
            }
        }
        Ok(())
    }

    /// Largest contiguous range around `byteaddress` that dispatches to the same slot, clipped to
    /// the mirror copy of that slot containing the address.
    #[must_use]
    pub fn derive_range(&self, byteaddress: Offset) -> (u16, Offset, Offset) {
        let l2mask: Offset = (1 << self.level2_bits) - 1;
        let byteaddress = byteaddress & self.bytemask;
        let l1entry = self.cells[self.level1_index(byteaddress)];
        let entry = self.resolve(l1entry, byteaddress);
        let (minscan, maxscan) = self.slots.get(entry).mirrored_start_end(byteaddress);
        let maxscan = maxscan.min(self.bytemask);

        let mut curl1 = l1entry;
        let mut cur = entry;
        let mut start = byteaddress;
        loop {
            if curl1 != cur {
                let minindex = self.level2_index(curl1, 0);
                let mut index = self.level2_index(curl1, start);
                while index > minindex && self.cells[index - 1] == entry {
                    index -= 1;
                    start -= 1;
                }
                if index != minindex {
                    break;
                }
            }
            start &= !l2mask;
            if start <= minscan {
                break;
            }
            curl1 = self.cells[self.level1_index(start - 1)];
            cur = self.resolve(curl1, start - 1);
            if cur != entry {
                break;
            }
            start -= 1;
        }

        let mut curl1 = l1entry;
        let mut cur = entry;
        let mut end = byteaddress;
        loop {
            if curl1 != cur {
                let maxindex = self.level2_index(curl1, l2mask);
                let mut index = self.level2_index(curl1, end);
                while index < maxindex && self.cells[index + 1] == entry {
                    index += 1;
                    end += 1;
                }
                if index != maxindex {
                    break;
                }
            }
            end |= l2mask;
            if end >= maxscan {
                break;
            }
            curl1 = self.cells[self.level1_index(end + 1)];
            cur = self.resolve(curl1, end + 1);
            if cur != entry {
                break;
            }
            end += 1;
        }

        (entry, start, end)
    }

    #[inline]
    fn resolve(&self, l1entry: u16, byteaddress: Offset) -> u16 {
        if l1entry >= SUBTABLE_BASE {
            self.cells[self.level2_index(l1entry, byteaddress)]
        } else {
            l1entry
        }
    }

    /// Reference counts recomputed by walking the cells; subtables shared by several level-1
    /// cells are counted once.
    #[must_use]
    pub fn scan_reference_counts(&self) -> Vec<u32> {
        let mut counts = vec![0; usize::from(SLOT_COUNT - STATIC_COUNT)];
        let mut seen = [false; SUBTABLE_COUNT as usize];
        let mut count = |entry: u16| {
            if entry >= STATIC_COUNT {
                counts[usize::from(entry - STATIC_COUNT)] += 1;
            }
        };
        let level2_len = 1usize << self.level2_bits;
        for &l1entry in &self.cells[..1 << self.level1_bits] {
            if l1entry >= SUBTABLE_BASE {
                let subtable = usize::from(l1entry - SUBTABLE_BASE);
                if seen[subtable] {
                    continue;
                }
                seen[subtable] = true;
                let base = self.level2_index(l1entry, 0);
                for &cell in &self.cells[base..base + level2_len] {
                    count(cell);
                }
            } else {
                count(l1entry);
            }
        }
        counts
    }

    /// Checks tracked slot and subtable reference counts against the table contents.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ReferenceCountMismatch`] for the first disagreeing slot or
    /// subtable.
    pub fn verify_reference_counts(&self) -> Result<(), MemoryError> {
        let scanned = self.scan_reference_counts();
        for (dynamic, (&tracked, &found)) in self.slots.refcounts().iter().zip(&scanned).enumerate()
        {
            if tracked != found {
                #[allow(clippy::cast_possible_truncation)]
                return Err(MemoryError::ReferenceCountMismatch {
                    slot: dynamic as u16 + STATIC_COUNT,
                    tracked,
                    scanned: found,
                });
            }
        }

        let mut users = vec![0u32; usize::from(SUBTABLE_COUNT)];
        for &l1entry in &self.cells[..1 << self.level1_bits] {
            if l1entry >= SUBTABLE_BASE {
                users[usize::from(l1entry - SUBTABLE_BASE)] += 1;
            }
        }
        for (subtable, (data, &found)) in self.subtables.iter().zip(&users).enumerate() {
            if data.usecount != found {
                #[allow(clippy::cast_possible_truncation)]
                return Err(MemoryError::ReferenceCountMismatch {
                    slot: subtable as u16 + SUBTABLE_BASE,
                    tracked: data.usecount,
                    scanned: found,
                });
            }
        }
        Ok(())
    }
}

/// Positions of the set bits of `mirror`, lowest first.
fn mirror_bit_positions(mirror: Offset) -> Vec<Offset> {
    (0..Offset::BITS).filter(|bit| mirror & (1 << bit) != 0).collect()
}

/// Spreads the bits of `index` over the mirror bit positions.
fn combine_mirror_bits(index: u32, bits: &[Offset]) -> Offset {
    bits.iter()
        .enumerate()
        .filter(|(position, _)| index & (1 << position) != 0)
        .fold(0, |acc, (_, bit)| acc | (1 << bit))
}
