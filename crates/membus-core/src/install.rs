//! Range validation and the table-side half of every install.
//!
//! Install requests arrive in logical address units. They are validated against the space,
//! normalised (mask defaulted to the changing bits, select folded into mask and mirror, trailing
//! mirror bits folded into the end when the range spans a whole power-of-two zone) and converted
//! to byte addresses before any table is touched.

use std::collections::BTreeMap;

use crate::handler::STATIC_COUNT;
use crate::table::DispatchTable;
use crate::{AccessKind, DataWidth, DirectCache, MemoryError, Offset, RangeViolation, SpaceConfig};

/// A validated range in byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte.
    pub start: Offset,
    /// Last byte.
    pub end: Offset,
    /// Mask applied to offsets inside the range.
    pub mask: Offset,
    /// Bits replicating the range.
    pub mirror: Offset,
}

/// Smears `start ^ end` down to the lowest bit: every bit that varies somewhere in the range.
const fn changing_bits(start: Offset, end: Offset) -> Offset {
    let mut bits = start ^ end;
    bits |= bits >> 1;
    bits |= bits >> 2;
    bits |= bits >> 4;
    bits |= bits >> 8;
    bits |= bits >> 16;
    bits
}

fn violation(
    operation: &'static str,
    start: Offset,
    end: Offset,
) -> impl Fn(RangeViolation) -> MemoryError {
    move |violation| MemoryError::InvalidRange {
        operation,
        start,
        end,
        violation,
    }
}

fn check_bounds(
    config: &SpaceConfig,
    operation: &'static str,
    start: Offset,
    end: Offset,
) -> Result<(), MemoryError> {
    let fail = violation(operation, start, end);
    let addrmask = config.address_mask();
    if start > end {
        return Err(fail(RangeViolation::StartAfterEnd));
    }
    if start & !addrmask != 0 {
        return Err(fail(RangeViolation::StartOutsideMask {
            mask: addrmask,
            suggestion: start & addrmask,
        }));
    }
    if end & !addrmask != 0 {
        return Err(fail(RangeViolation::EndOutsideMask {
            mask: addrmask,
            suggestion: end & addrmask,
        }));
    }
    let lowbits = config.low_bits_mask();
    if start & lowbits != 0 {
        return Err(fail(RangeViolation::StartLowBitsSet {
            suggestion: start & !lowbits,
        }));
    }
    if !end & lowbits != 0 {
        return Err(fail(RangeViolation::EndLowBitsUnset {
            suggestion: end | lowbits,
        }));
    }
    Ok(())
}

/// Removes mirror bits the range already spans, growing the end instead.
fn fold_mirror(start: Offset, end: &mut Offset, mirror: &mut Offset, mut changing: Offset) {
    if *mirror == 0 || start & changing != 0 || !*end & changing != 0 {
        return;
    }
    loop {
        let bit = *mirror & changing.wrapping_add(1);
        if bit == 0 {
            break;
        }
        *mirror &= !bit;
        *end |= bit;
        changing |= bit;
    }
}

/// Converts a normalised logical range to bytes.
fn adjust_addresses(
    config: &SpaceConfig,
    start: Offset,
    end: Offset,
    mask: Offset,
    mirror: Offset,
) -> ByteRange {
    let addrmask = config.address_mask();
    let mask = mask & addrmask;
    let start = start & !mirror & addrmask;
    let end = end & !mirror & addrmask;
    ByteRange {
        start: config.address_to_byte(start),
        end: config.address_to_byte_end(end),
        mask: config.address_to_byte_end(mask),
        mirror: config.address_to_byte(mirror),
    }
}

/// Validates a range that carries only a mirror (memory, banks, ports, unmaps).
///
/// # Errors
///
/// Returns [`MemoryError::InvalidRange`] naming the first rule broken.
pub fn check_optimize_mirror(
    config: &SpaceConfig,
    operation: &'static str,
    start: Offset,
    end: Offset,
    mirror: Offset,
) -> Result<ByteRange, MemoryError> {
    check_bounds(config, operation, start, end)?;
    let fail = violation(operation, start, end);
    let addrmask = config.address_mask();
    let set_bits = start | end;
    let changing = changing_bits(start, end);

    if mirror & !addrmask != 0 {
        return Err(fail(RangeViolation::MirrorOutsideGlobal {
            mask: addrmask,
            suggestion: mirror & addrmask,
        }));
    }
    if mirror & changing != 0 {
        return Err(fail(RangeViolation::MirrorTouchesChangingBit {
            suggestion: mirror & !changing,
        }));
    }
    if mirror & set_bits != 0 {
        return Err(fail(RangeViolation::MirrorTouchesSetBit {
            suggestion: mirror & !set_bits,
        }));
    }

    // the mask keeps the unfolded width so every folded copy aliases the same offsets
    let mut nend = end;
    let mut nmirror = mirror;
    fold_mirror(start, &mut nend, &mut nmirror, changing);
    Ok(adjust_addresses(config, start, nend, changing, nmirror))
}

/// Validates a callback range with address mask, mirror and select bits.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidRange`] naming the first rule broken.
pub fn check_optimize_all(
    config: &SpaceConfig,
    operation: &'static str,
    start: Offset,
    end: Offset,
    mask: Offset,
    mirror: Offset,
    select: Offset,
) -> Result<ByteRange, MemoryError> {
    check_bounds(config, operation, start, end)?;
    let fail = violation(operation, start, end);
    let addrmask = config.address_mask();
    let set_bits = start | end;
    let changing = changing_bits(start, end);

    if mask & !addrmask != 0 {
        return Err(fail(RangeViolation::MaskOutsideGlobal {
            mask: addrmask,
            suggestion: mask & addrmask,
        }));
    }
    if mirror & !addrmask != 0 {
        return Err(fail(RangeViolation::MirrorOutsideGlobal {
            mask: addrmask,
            suggestion: mirror & addrmask,
        }));
    }
    if select & !addrmask != 0 {
        return Err(fail(RangeViolation::SelectOutsideGlobal {
            mask: addrmask,
            suggestion: select & addrmask,
        }));
    }
    if mask & !changing != 0 {
        return Err(fail(RangeViolation::MaskUnmasksUnchangingBit {
            suggestion: mask & changing,
        }));
    }
    if mirror & changing != 0 {
        return Err(fail(RangeViolation::MirrorTouchesChangingBit {
            suggestion: mirror & !changing,
        }));
    }
    if select & changing != 0 {
        return Err(fail(RangeViolation::SelectTouchesChangingBit {
            suggestion: select & !changing,
        }));
    }
    if mirror & set_bits != 0 {
        return Err(fail(RangeViolation::MirrorTouchesSetBit {
            suggestion: mirror & !set_bits,
        }));
    }
    if select & set_bits != 0 {
        return Err(fail(RangeViolation::SelectTouchesSetBit {
            suggestion: select & !set_bits,
        }));
    }
    if mirror & select != 0 {
        return Err(fail(RangeViolation::MirrorTouchesSelectBit {
            suggestion: mirror & !select,
        }));
    }

    let mut nend = end;
    let nmask = if mask == 0 { changing } else { mask } | select;
    let mut nmirror = mirror | select;
    fold_mirror(start, &mut nend, &mut nmirror, changing);
    Ok(adjust_addresses(config, start, nend, nmask, nmirror))
}

impl DispatchTable {
    /// Configures `entry` for `range` (dynamic slots only) and populates every mirror copy.
    pub(crate) fn map_range(
        &mut self,
        range: &ByteRange,
        entry: u16,
        bus_width: DataWidth,
        cache: &DirectCache,
    ) -> Result<(), MemoryError> {
        if entry >= STATIC_COUNT {
            self.slot_mut(entry)
                .configure(range.start, range.end, range.mask, bus_width);
        }
        self.populate_range_mirrored(range.start, range.end, range.mirror, entry, cache)?;
        if self.kind() == AccessKind::Read {
            cache.force_update_entry(entry);
        }
        Ok(())
    }

    /// Prepares the slots a callback install will bind to and returns them.
    ///
    /// A unit mask covering no lane or every lane takes one fresh slot. A partial unit mask
    /// splits the range by current occupant: cells whose occupant the new lanes fully override
    /// share one fresh slot, and each stitched occupant that keeps lanes gets a copy with the
    /// conflicting lanes removed.
    pub(crate) fn setup_range(
        &mut self,
        range: &ByteRange,
        unit_mask: u64,
        bus_width: DataWidth,
        cache: &DirectCache,
    ) -> Result<Vec<u16>, MemoryError> {
        let testmask = bus_width.mask();
        if unit_mask & testmask == 0 || unit_mask & testmask == testmask {
            let entry = self.allocate_slot()?;
            self.map_range(range, entry, bus_width, cache)?;
            return Ok(vec![entry]);
        }
        self.setup_range_masked(range, unit_mask, bus_width, cache)
    }

    fn setup_range_masked(
        &mut self,
        range: &ByteRange,
        unit_mask: u64,
        bus_width: DataWidth,
        cache: &DirectCache,
    ) -> Result<Vec<u16>, MemoryError> {
        let mut overrides: Vec<(Offset, Offset)> = Vec::new();
        let mut partials: BTreeMap<u16, Vec<(Offset, Offset)>> = BTreeMap::new();

        let mut base_mirror: Offset = 0;
        loop {
            let mut base_address = base_mirror | range.start;
            let end_address = base_mirror | range.end;
            loop {
                let (entry, _, range_end) = self.derive_range(base_address);
                let stop = range_end.min(end_address);
                if entry < STATIC_COUNT || self.slot(entry).overridden_by(unit_mask) {
                    overrides.push((base_address, stop));
                } else {
                    partials.entry(entry).or_default().push((base_address, stop));
                }
                if stop >= end_address {
                    break;
                }
                base_address = stop + 1;
            }
            // next combination of mirror bits
            base_mirror = base_mirror.wrapping_add(1).wrapping_add(!range.mirror) & range.mirror;
            if base_mirror == 0 {
                break;
            }
        }

        let mut entries = Vec::new();
        if !overrides.is_empty() {
            let entry = self.allocate_slot()?;
            self.slot_mut(entry)
                .configure(range.start, range.end, range.mask, bus_width);
            for &(start, end) in &overrides {
                self.populate_range(start, end, entry)?;
                cache.remove_intersecting_ranges(start, end);
            }
            entries.push(entry);
        }

        for (base_entry, pieces) in partials {
            let entry = self.allocate_slot()?;
            let mut copy = self.slot(base_entry).clone();
            copy.clear_conflicting(unit_mask);
            let previous = copy.bytemask();
            copy.configure(range.start, range.end, range.mask, bus_width);
            copy.expand_bytemask(previous);
            *self.slot_mut(entry) = copy;
            for (start, end) in pieces {
                self.populate_range(start, end, entry)?;
                cache.remove_intersecting_ranges(start, end);
            }
            entries.push(entry);
        }

        if self.kind() == AccessKind::Read {
            for &entry in &entries {
                cache.force_update_entry(entry);
            }
        }
        Ok(entries)
    }
}
