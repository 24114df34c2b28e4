use thiserror::Error;

use crate::Offset;

/// Error classes used to decide how an embedding aborts setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorClass {
    /// The described system is inconsistent (bad range, unknown name, bad width).
    Configuration,
    /// A fixed-capacity pool (handler slots, subtables) ran out.
    Exhaustion,
    /// A range that needs backing memory ended up without any.
    Backing,
}

/// Reasons a range request fails validation. Variants that can be corrected mechanically carry
/// the value the caller most likely meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RangeViolation {
    /// `start > end`.
    #[error("start address is after the end address")]
    StartAfterEnd,
    /// Start has bits outside the global mask.
    #[error(
        "start address is outside the global address mask {mask:#x}, did you mean {suggestion:#x}?"
    )]
    StartOutsideMask {
        /// Global mask of the space.
        mask: Offset,
        /// Start with the offending bits removed.
        suggestion: Offset,
    },
    /// End has bits outside the global mask.
    #[error(
        "end address is outside the global address mask {mask:#x}, did you mean {suggestion:#x}?"
    )]
    EndOutsideMask {
        /// Global mask of the space.
        mask: Offset,
        /// End with the offending bits removed.
        suggestion: Offset,
    },
    /// Start is not aligned to the bus unit.
    #[error("start address has low bits set, did you mean {suggestion:#x}?")]
    StartLowBitsSet {
        /// Start rounded down to the unit.
        suggestion: Offset,
    },
    /// End is not the last address of a bus unit.
    #[error("end address has low bits unset, did you mean {suggestion:#x}?")]
    EndLowBitsUnset {
        /// End rounded up to the unit.
        suggestion: Offset,
    },
    /// Address mask has bits outside the global mask.
    #[error("mask is outside the global address mask {mask:#x}, did you mean {suggestion:#x}?")]
    MaskOutsideGlobal {
        /// Global mask of the space.
        mask: Offset,
        /// Mask clipped to the global mask.
        suggestion: Offset,
    },
    /// Mirror has bits outside the global mask.
    #[error(
        "mirror is outside the global address mask {mask:#x}, did you mean {suggestion:#x}?"
    )]
    MirrorOutsideGlobal {
        /// Global mask of the space.
        mask: Offset,
        /// Mirror clipped to the global mask.
        suggestion: Offset,
    },
    /// Select has bits outside the global mask.
    #[error(
        "select is outside the global address mask {mask:#x}, did you mean {suggestion:#x}?"
    )]
    SelectOutsideGlobal {
        /// Global mask of the space.
        mask: Offset,
        /// Select clipped to the global mask.
        suggestion: Offset,
    },
    /// Mask tries to pass through a bit that is constant over the range.
    #[error("mask is trying to unmask an unchanging address bit, did you mean {suggestion:#x}?")]
    MaskUnmasksUnchangingBit {
        /// Mask restricted to the changing bits.
        suggestion: Offset,
    },
    /// Mirror overlaps the bits that vary inside the range.
    #[error("mirror touches a changing address bit, did you mean {suggestion:#x}?")]
    MirrorTouchesChangingBit {
        /// Mirror without the changing bits.
        suggestion: Offset,
    },
    /// Select overlaps the bits that vary inside the range.
    #[error("select touches a changing address bit, did you mean {suggestion:#x}?")]
    SelectTouchesChangingBit {
        /// Select without the changing bits.
        suggestion: Offset,
    },
    /// Mirror overlaps bits set in start or end.
    #[error("mirror touches a set address bit, did you mean {suggestion:#x}?")]
    MirrorTouchesSetBit {
        /// Mirror without the set bits.
        suggestion: Offset,
    },
    /// Select overlaps bits set in start or end.
    #[error("select touches a set address bit, did you mean {suggestion:#x}?")]
    SelectTouchesSetBit {
        /// Select without the set bits.
        suggestion: Offset,
    },
    /// Mirror and select share bits.
    #[error("mirror touches a select bit, did you mean {suggestion:#x}?")]
    MirrorTouchesSelectBit {
        /// Mirror without the select bits.
        suggestion: Offset,
    },
}

/// Every failure the engine reports. All of them are raised while configuring or allocating;
/// the access path never fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The space description itself is unusable.
    #[error("space '{space}': {reason}")]
    InvalidSpaceConfig {
        /// Space name.
        space: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A range request failed validation.
    #[error("{operation}: in range {start:#x}-{end:#x}, {violation}")]
    InvalidRange {
        /// Install operation that was called.
        operation: &'static str,
        /// Requested start.
        start: Offset,
        /// Requested end.
        end: Offset,
        /// First rule the request broke.
        violation: RangeViolation,
    },
    /// A unit mask selects no lanes, or only part of a lane.
    #[error(
        "unit mask {mask:#x} does not select whole {handler_bits}-bit lanes of a {bus_bits}-bit bus"
    )]
    InvalidUnitMask {
        /// Offending mask.
        mask: u64,
        /// Handler width in bits.
        handler_bits: u32,
        /// Bus width in bits.
        bus_bits: u32,
    },
    /// A callback is wider than the bus it is installed on.
    #[error("handler '{name}' is {handler_bits} bits wide but the bus is only {bus_bits} bits")]
    HandlerTooWide {
        /// Handler name.
        name: String,
        /// Handler width in bits.
        handler_bits: u32,
        /// Bus width in bits.
        bus_bits: u32,
    },
    /// No dynamic handler slot is left in a dispatch table.
    #[error("out of handler slots in the {table} table")]
    SlotPoolExhausted {
        /// Table label.
        table: &'static str,
    },
    /// No subtable is left and merging reclaimed nothing.
    #[error("ran out of subtables in the {table} table")]
    SubtablesExhausted {
        /// Table label.
        table: &'static str,
    },
    /// Reference counts drifted from the table contents.
    #[error("slot {slot:#x} tracks {tracked} references but the table holds {scanned}")]
    ReferenceCountMismatch {
        /// Slot index.
        slot: u16,
        /// Count kept by the pool.
        tracked: u32,
        /// Count found by rescanning.
        scanned: u32,
    },
    /// Named region was never added.
    #[error("reference to non-existent region '{name}'")]
    UnknownRegion {
        /// Region name.
        name: String,
    },
    /// Range extends past the end of its region.
    #[error(
        "{length:#x} bytes at offset {offset:#x} extend beyond region '{name}' ({size:#x} bytes)"
    )]
    RegionTooSmall {
        /// Region name.
        name: String,
        /// Offset requested inside the region.
        offset: usize,
        /// Bytes the range needs.
        length: usize,
        /// Bytes the region holds.
        size: usize,
    },
    /// Named port was never registered.
    #[error("attempted to map non-existent port '{name}'")]
    UnknownPort {
        /// Port name.
        name: String,
    },
    /// Named bank does not exist.
    #[error("unknown bank '{tag}'")]
    UnknownBank {
        /// Bank tag.
        tag: String,
    },
    /// Anonymous banks back plain RAM and cannot switch entries.
    #[error("bank '{tag}' is anonymous and has no selectable entries")]
    AnonymousBankEntry {
        /// Bank tag.
        tag: String,
    },
    /// Entry index beyond the configured entries.
    #[error("bank '{tag}' has no entry {entry} ({count} configured)")]
    BankEntryOutOfRange {
        /// Bank tag.
        tag: String,
        /// Requested entry.
        entry: usize,
        /// Number of configured entries.
        count: usize,
    },
    /// Entry slot exists but holds no pointer.
    #[error("bank '{tag}' entry {entry} has no backing memory")]
    BankEntryUnconfigured {
        /// Bank tag.
        tag: String,
        /// Requested entry.
        entry: usize,
    },
    /// A backing pointer would run past the end of its storage.
    #[error("backing offset {offset:#x} + {length:#x} bytes exceeds storage of {size:#x} bytes")]
    BackingOutOfBounds {
        /// Offset into the storage.
        offset: usize,
        /// Bytes required.
        length: usize,
        /// Storage size.
        size: usize,
    },
    /// A range that needs memory has none after allocation.
    #[error("space '{space}': range {start:#x}-{end:#x} has no backing memory")]
    MissingBacking {
        /// Space name.
        space: String,
        /// First byte of the range.
        start: Offset,
        /// Last byte of the range.
        end: Offset,
    },
    /// Operation is not allowed in the manager's current phase.
    #[error("{operation} is not allowed while the memory manager is {phase}")]
    WrongPhase {
        /// Attempted operation.
        operation: &'static str,
        /// Current phase label.
        phase: &'static str,
    },
    /// Snapshot was produced by an unknown schema.
    #[error("unsupported memory snapshot version {version}")]
    UnsupportedSnapshot {
        /// Wire version found.
        version: u16,
    },
}

impl MemoryError {
    /// Returns the class this error belongs to.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::SlotPoolExhausted { .. } | Self::SubtablesExhausted { .. } => {
                ErrorClass::Exhaustion
            }
            Self::MissingBacking { .. } | Self::BackingOutOfBounds { .. } => ErrorClass::Backing,
            _ => ErrorClass::Configuration,
        }
    }
}
