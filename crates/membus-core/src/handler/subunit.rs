//! Width adaptation for handlers narrower than their bus.
//!
//! A narrow handler installed under a wide bus occupies one or more lanes of every native access.
//! Each lane gets a [`SubunitDescriptor`] recording where it sits in the wide value and how a
//! native offset maps into the handler's own address space:
//!
//! ```text
//! handler_offset = (native_offset * multiplier + lane_offset) & lane_bytemask
//! ```
//!
//! Lanes are numbered from the least-significant end on little-endian buses and from the
//! most-significant end on big-endian ones, so lane 0 always answers the lowest byte address.

use crate::{DataWidth, Endianness, MemoryError, Offset, ReadDelegate, WriteDelegate};

/// The callback a lane forwards to.
#[derive(Debug, Clone)]
pub enum SubunitTarget {
    /// Lane of a read handler.
    Read(ReadDelegate),
    /// Lane of a write handler.
    Write(WriteDelegate),
}

impl SubunitTarget {
    /// Width of the wrapped delegate.
    #[must_use]
    pub const fn width(&self) -> DataWidth {
        match self {
            Self::Read(delegate) => delegate.width(),
            Self::Write(delegate) => delegate.width(),
        }
    }

    /// Name of the wrapped delegate.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Read(delegate) => delegate.name(),
            Self::Write(delegate) => delegate.name(),
        }
    }
}

/// Placement of one narrow lane inside a native access.
#[derive(Debug, Clone)]
pub struct SubunitDescriptor {
    shift: u32,
    mask: u64,
    multiplier: u32,
    offset: i32,
    bytemask: Offset,
    target: SubunitTarget,
}

impl SubunitDescriptor {
    /// Bit position of the lane inside the native value.
    #[must_use]
    pub const fn shift(&self) -> u32 {
        self.shift
    }

    /// All-ones mask of the lane width.
    #[must_use]
    pub const fn mask(&self) -> u64 {
        self.mask
    }

    /// Native offset multiplier.
    #[must_use]
    pub const fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Offset added after multiplying.
    #[must_use]
    pub const fn offset(&self) -> i32 {
        self.offset
    }

    /// Mask applied to the handler offset.
    #[must_use]
    pub const fn bytemask(&self) -> Offset {
        self.bytemask
    }

    /// Width of the lane's handler.
    #[must_use]
    pub fn width(&self) -> DataWidth {
        self.target.width()
    }

    fn handler_offset(&self, offset: Offset) -> Offset {
        offset
            .wrapping_mul(self.multiplier)
            .wrapping_add_signed(self.offset)
            & self.bytemask
    }

    fn conflicts_with(&self, unit_mask: u64) -> bool {
        (unit_mask >> self.shift) & self.mask != 0
    }
}

/// Counts the lanes `unit_mask` selects for a `handler_width` handler on a `bus_width` bus.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidUnitMask`] when the mask selects nothing or splits a lane.
pub fn count_lanes(
    unit_mask: u64,
    handler_width: DataWidth,
    bus_width: DataWidth,
) -> Result<u32, MemoryError> {
    let handler_bits = handler_width.bits();
    let lane_mask = handler_width.mask();
    let invalid = MemoryError::InvalidUnitMask {
        mask: unit_mask,
        handler_bits,
        bus_bits: bus_width.bits(),
    };
    let mut count = 0;
    for unit in 0..bus_width.bits() / handler_bits {
        let lanes = (unit_mask >> (unit * handler_bits)) & lane_mask;
        if lanes != 0 && lanes != lane_mask {
            return Err(invalid);
        }
        if lanes != 0 {
            count += 1;
        }
    }
    if count == 0 {
        return Err(invalid);
    }
    Ok(count)
}

/// Lanes of a stitched handler plus the mask of bits no lane answers.
#[derive(Debug, Clone)]
pub struct SubunitSet {
    units: Vec<SubunitDescriptor>,
    inv_mask: u64,
}

impl Default for SubunitSet {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            inv_mask: u64::MAX,
        }
    }
}

impl SubunitSet {
    /// Lane descriptors in installation order.
    #[must_use]
    pub fn descriptors(&self) -> &[SubunitDescriptor] {
        &self.units
    }

    /// Number of populated lanes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when no lane is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Bits of the native value no lane answers.
    #[must_use]
    pub const fn inv_mask(&self) -> u64 {
        self.inv_mask
    }

    /// Adds the lanes selected by `unit_mask` for a handler narrower than `bus_width`.
    pub(crate) fn configure(
        &mut self,
        unit_mask: u64,
        bus_width: DataWidth,
        endianness: Endianness,
        slot_bytemask: Offset,
        target: &SubunitTarget,
    ) -> Result<(), MemoryError> {
        let handler_width = target.width();
        let handler_bits = handler_width.bits();
        let lane_mask = handler_width.mask();
        let max_units = bus_width.bits() / handler_bits;
        let count = count_lanes(unit_mask, handler_width, bus_width)?;

        // smallest divisor of max_units not below the lane count
        let mut multiplier = count;
        while max_units % multiplier != 0 {
            multiplier += 1;
        }

        let xor = match endianness {
            Endianness::Little => 0,
            Endianness::Big => max_units - 1,
        };
        let mut lane_offset = 0;
        for unit in 0..max_units {
            let shift = (unit ^ xor) * handler_bits;
            if (unit_mask >> shift) & lane_mask != 0 {
                self.units.push(SubunitDescriptor {
                    shift,
                    mask: lane_mask,
                    multiplier,
                    offset: lane_offset,
                    bytemask: slot_bytemask / (max_units / multiplier),
                    target: target.clone(),
                });
                lane_offset += 1;
            }
        }
        self.recompute_inv_mask();
        Ok(())
    }

    /// Shifts every lane offset after the owning slot moved its start from `old_start` to
    /// `new_start`, so addresses keep reaching the same handler offsets.
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn rebase(&mut self, old_start: Offset, new_start: Offset, bus_width: DataWidth) {
        let native_delta = (new_start.wrapping_sub(old_start) as i32) >> bus_width.bytes_log2();
        for unit in &mut self.units {
            let step = native_delta.wrapping_mul(unit.multiplier as i32);
            unit.offset = unit.offset.wrapping_add(step);
        }
    }

    /// Drops every lane overlapping `unit_mask` (zero means all lanes).
    pub(crate) fn clear_conflicting(&mut self, unit_mask: u64) {
        if unit_mask == 0 {
            self.units.clear();
        } else {
            self.units.retain(|unit| !unit.conflicts_with(unit_mask));
        }
        self.recompute_inv_mask();
    }

    /// True when installing `unit_mask` would leave no existing lane alive.
    #[must_use]
    pub fn overridden_by(&self, unit_mask: u64) -> bool {
        unit_mask == 0 || self.units.iter().all(|unit| unit.conflicts_with(unit_mask))
    }

    fn recompute_inv_mask(&mut self) {
        self.inv_mask = !self
            .units
            .iter()
            .fold(0, |acc, unit| acc | (unit.mask << unit.shift));
    }

    /// Recomposes a native read. Lanes outside `mask` are not called; bits no lane answers come
    /// from `unmap`.
    #[must_use]
    pub fn read(&self, offset: Offset, mask: u64, unmap: u64) -> u64 {
        let mut result = unmap & self.inv_mask;
        for unit in &self.units {
            let SubunitTarget::Read(delegate) = &unit.target else {
                continue;
            };
            let submask = (mask >> unit.shift) & unit.mask;
            if submask != 0 {
                let value = delegate.call(unit.handler_offset(offset), submask);
                result |= (value & unit.mask) << unit.shift;
            }
        }
        result
    }

    /// Decomposes a native write into the lanes `mask` touches.
    pub fn write(&self, offset: Offset, data: u64, mask: u64) {
        for unit in &self.units {
            let SubunitTarget::Write(delegate) = &unit.target else {
                continue;
            };
            let submask = (mask >> unit.shift) & unit.mask;
            if submask != 0 {
                delegate.call(unit.handler_offset(offset), data >> unit.shift, submask);
            }
        }
    }

    /// One `bits:shift:offset:multiplier:bytemask:name` group per lane.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut text = String::new();
        for (index, unit) in self.units.iter().enumerate() {
            if index != 0 {
                text.push(' ');
            }
            text.push_str(&format!(
                "{}:{}:{:x}:{}:{:x}:{}",
                unit.target.width().bits(),
                unit.shift,
                unit.offset,
                unit.multiplier,
                unit.bytemask,
                unit.target.name()
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rstest::rstest;

    use super::{SubunitSet, SubunitTarget};
    use crate::{DataWidth, Endianness, MemoryError, ReadDelegate, WriteDelegate};

    fn echo_offset(width: DataWidth) -> SubunitTarget {
        SubunitTarget::Read(ReadDelegate::new("echo", width, |offset, _| {
            u64::from(offset)
        }))
    }

    #[rstest]
    #[case(Endianness::Little, &[(8, 0), (24, 1)])]
    #[case(Endianness::Big, &[(24, 0), (8, 1)])]
    fn lanes_are_numbered_from_the_lowest_byte_address(
        #[case] endianness: Endianness,
        #[case] expected: &[(u32, i32)],
    ) {
        let mut set = SubunitSet::default();
        set.configure(
            0xFF00_FF00,
            DataWidth::Bits32,
            endianness,
            0xFFF,
            &echo_offset(DataWidth::Bits8),
        )
        .expect("two whole lanes");
        let placed: Vec<(u32, i32)> = set
            .descriptors()
            .iter()
            .map(|unit| (unit.shift(), unit.offset()))
            .collect();
        assert_eq!(placed, expected);
        assert!(set.descriptors().iter().all(|unit| unit.multiplier() == 2));
        assert_eq!(set.descriptors()[0].bytemask(), 0x7FF);
        assert_eq!(set.inv_mask(), !0xFF00_FF00);
    }

    #[test]
    fn partial_lanes_are_rejected() {
        let mut set = SubunitSet::default();
        let error = set
            .configure(
                0x0F00,
                DataWidth::Bits16,
                Endianness::Little,
                0xFF,
                &echo_offset(DataWidth::Bits8),
            )
            .expect_err("half a lane");
        assert!(matches!(error, MemoryError::InvalidUnitMask { .. }));
        assert!(set
            .configure(
                0,
                DataWidth::Bits16,
                Endianness::Little,
                0xFF,
                &echo_offset(DataWidth::Bits8)
            )
            .is_err());
    }

    #[test]
    fn read_fills_unanswered_lanes_from_unmap() {
        let mut set = SubunitSet::default();
        set.configure(
            0x0000_FF00,
            DataWidth::Bits32,
            Endianness::Little,
            0xFFF,
            &SubunitTarget::Read(ReadDelegate::new("reg", DataWidth::Bits8, |_, _| 0x33)),
        )
        .expect("one lane");
        assert_eq!(set.read(0, 0xFFFF_FFFF, 0xFFFF_FFFF), 0xFFFF_33FF);
        // lane not selected by the access mask is not consulted
        assert_eq!(set.read(0, 0x0000_00FF, 0), 0);
    }

    #[test]
    fn write_only_reaches_selected_lanes() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let mut set = SubunitSet::default();
        set.configure(
            0xFFFF,
            DataWidth::Bits16,
            Endianness::Big,
            0xFF,
            &SubunitTarget::Write(WriteDelegate::new(
                "pair",
                DataWidth::Bits8,
                move |offset, data, _| sink.borrow_mut().push((offset, data)),
            )),
        )
        .expect("both lanes");
        set.write(3, 0xABCD, 0xFF00);
        assert_eq!(*log.borrow(), vec![(6, 0xAB)]);
        set.write(3, 0xABCD, 0xFFFF);
        assert_eq!(*log.borrow(), vec![(6, 0xAB), (6, 0xAB), (7, 0xCD)]);
    }

    #[test]
    fn clearing_conflicts_keeps_disjoint_lanes() {
        let mut set = SubunitSet::default();
        set.configure(
            0xFFFF,
            DataWidth::Bits16,
            Endianness::Little,
            0xFF,
            &echo_offset(DataWidth::Bits8),
        )
        .expect("both lanes");
        assert!(!set.overridden_by(0x00FF));
        assert!(set.overridden_by(0xFFFF));
        set.clear_conflicting(0x00FF);
        assert_eq!(set.len(), 1);
        assert_eq!(set.descriptors()[0].shift(), 8);
        assert_eq!(set.inv_mask(), !0xFF00);
        set.clear_conflicting(0);
        assert!(set.is_empty());
        assert!(set.describe().is_empty());
    }

    #[test]
    fn rebase_moves_lane_offsets_with_the_slot() {
        let mut set = SubunitSet::default();
        set.configure(
            0xFF,
            DataWidth::Bits16,
            Endianness::Little,
            0xFF,
            &echo_offset(DataWidth::Bits8),
        )
        .expect("low lane");
        set.rebase(0x100, 0x140, DataWidth::Bits16);
        assert_eq!(set.descriptors()[0].offset(), 0x20);
        assert_eq!(set.describe(), "8:0:20:1:7f:echo");
    }
}
