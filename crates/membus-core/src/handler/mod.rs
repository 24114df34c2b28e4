//! Handler slots: the records a dispatch-table entry resolves to.
//!
//! Indices below [`STATIC_COUNT`] are fixed for the life of a table; every other index is handed
//! out by the slot pool on install and recycled once no table cell refers to it any more.

use std::fmt;
use std::rc::Rc;

/// Callable handler targets and ports.
pub mod delegate;
/// Free-list allocator for dynamic slots.
pub mod pool;
/// Lane stitching for narrow handlers.
pub mod subunit;

pub use delegate::{IoPort, LatchPort, PortHandle, ReadDelegate, SetAddressDelegate, WriteDelegate};
pub use pool::SlotPool;
pub use subunit::{count_lanes, SubunitDescriptor, SubunitSet, SubunitTarget};

use crate::{BankHandle, DataWidth, Endianness, MemoryError, Offset};

/// Never dispatched to; marks cells that were not initialised.
pub const STATIC_INVALID: u16 = 0;
/// Unmapped: reads return the unmapped value, writes are dropped.
pub const STATIC_UNMAP: u16 = 1;
/// Silent no-op.
pub const STATIC_NOP: u16 = 2;
/// Tap proxy, the only entry the tap template contains.
pub const STATIC_TAP: u16 = 3;
/// Number of fixed slots.
pub const STATIC_COUNT: u16 = 4;
/// Number of handler slots per table, fixed and dynamic together.
pub const SLOT_COUNT: u16 = 448;

/// A named port bound into a bus range.
#[derive(Clone)]
pub struct PortBinding {
    name: Rc<str>,
    port: PortHandle,
}

impl PortBinding {
    /// Binds `port` under `name`.
    pub fn new(name: impl Into<Rc<str>>, port: PortHandle) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port itself.
    #[must_use]
    pub const fn port(&self) -> &PortHandle {
        &self.port
    }
}

impl fmt::Debug for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortBinding")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Callback payload of a slot.
#[derive(Debug, Clone)]
pub enum CallbackTarget {
    /// Full-width read callback.
    Read(ReadDelegate),
    /// Full-width write callback.
    Write(WriteDelegate),
    /// Address notification callback.
    SetAddress(SetAddressDelegate),
    /// One or more narrow callbacks stitched into the bus width.
    Stitched(SubunitSet),
}

/// What a slot does when an access lands on it.
#[derive(Debug, Clone, Default)]
pub enum HandlerKind {
    /// Reads return the space's unmapped value; writes are dropped.
    #[default]
    Unmapped,
    /// Reads return the unmapped value without diagnostics; writes are dropped.
    NoOp,
    /// Direct access to the bank's current backing memory.
    Bank(BankHandle),
    /// Forward to a callback.
    Callback(CallbackTarget),
    /// Forward to a registered port.
    Port(PortBinding),
    /// Invoke the tap hook, then redo the access against the normal table.
    TapProxy,
}

impl HandlerKind {
    /// Display name for dumps.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Unmapped => "unmapped".to_string(),
            Self::NoOp => "nop".to_string(),
            Self::Bank(bank) => bank.tag().to_string(),
            Self::Callback(CallbackTarget::Read(delegate)) => delegate.name().to_string(),
            Self::Callback(CallbackTarget::Write(delegate)) => delegate.name().to_string(),
            Self::Callback(CallbackTarget::SetAddress(delegate)) => delegate.name().to_string(),
            Self::Callback(CallbackTarget::Stitched(set)) => set.describe(),
            Self::Port(binding) => binding.name().to_string(),
            Self::TapProxy => "tap".to_string(),
        }
    }
}

/// One handler record: its behaviour plus the byte range it was configured for.
#[derive(Debug, Clone, Default)]
pub struct HandlerSlot {
    kind: HandlerKind,
    populated: bool,
    bytestart: Offset,
    byteend: Offset,
    bytemask: Offset,
}

impl HandlerSlot {
    /// A fixed slot answering the whole space.
    pub(crate) const fn fixed(kind: HandlerKind, space_bytemask: Offset) -> Self {
        Self {
            kind,
            populated: true,
            bytestart: 0,
            byteend: space_bytemask,
            bytemask: Offset::MAX,
        }
    }

    /// Behaviour of the slot.
    #[must_use]
    pub const fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    /// True once configured for a range.
    #[must_use]
    pub const fn is_populated(&self) -> bool {
        self.populated
    }

    /// First byte of the configured range.
    #[must_use]
    pub const fn bytestart(&self) -> Offset {
        self.bytestart
    }

    /// Last byte of the configured range.
    #[must_use]
    pub const fn byteend(&self) -> Offset {
        self.byteend
    }

    /// Mask applied to offsets inside the range.
    #[must_use]
    pub const fn bytemask(&self) -> Offset {
        self.bytemask
    }

    /// Offset of `byteaddress` relative to the slot start, folded by the slot mask.
    #[must_use]
    pub const fn byteoffset(&self, byteaddress: Offset) -> Offset {
        byteaddress.wrapping_sub(self.bytestart) & self.bytemask
    }

    /// Range of the mirror copy containing `byteaddress`.
    #[must_use]
    pub const fn mirrored_start_end(&self, byteaddress: Offset) -> (Offset, Offset) {
        let mirrorbits = byteaddress.wrapping_sub(self.bytestart) & !self.bytemask;
        (self.bytestart | mirrorbits, self.byteend | mirrorbits)
    }

    /// True when the slot was configured with exactly these parameters.
    #[must_use]
    pub const fn matches_exactly(
        &self,
        bytestart: Offset,
        byteend: Offset,
        bytemask: Offset,
    ) -> bool {
        self.populated
            && self.bytestart == bytestart
            && self.byteend == byteend
            && self.bytemask == bytemask
    }

    /// True when installing `unit_mask` leaves nothing of this slot worth keeping.
    #[must_use]
    pub fn overridden_by(&self, unit_mask: u64) -> bool {
        match &self.kind {
            HandlerKind::Callback(CallbackTarget::Stitched(set)) => set.overridden_by(unit_mask),
            _ => true,
        }
    }

    /// Lanes of a stitched callback, if any.
    #[must_use]
    pub const fn subunits(&self) -> Option<&SubunitSet> {
        match &self.kind {
            HandlerKind::Callback(CallbackTarget::Stitched(set)) => Some(set),
            _ => None,
        }
    }

    /// Sets the range, shifting existing lanes so they keep answering the same addresses.
    pub(crate) fn configure(
        &mut self,
        bytestart: Offset,
        byteend: Offset,
        bytemask: Offset,
        bus_width: DataWidth,
    ) {
        if self.populated {
            let old_start = self.bytestart;
            if let HandlerKind::Callback(CallbackTarget::Stitched(set)) = &mut self.kind {
                set.rebase(old_start, bytestart, bus_width);
            }
        }
        self.bytestart = bytestart;
        self.byteend = byteend;
        self.bytemask = bytemask;
        self.populated = true;
    }

    pub(crate) fn expand_bytemask(&mut self, previous: Offset) {
        self.bytemask |= previous;
    }

    pub(crate) fn deconfigure(&mut self) {
        self.kind = HandlerKind::Unmapped;
        self.populated = false;
    }

    pub(crate) fn set_kind(&mut self, kind: HandlerKind) {
        self.kind = kind;
    }

    pub(crate) fn clear_conflicting(&mut self, unit_mask: u64) {
        if let HandlerKind::Callback(CallbackTarget::Stitched(set)) = &mut self.kind {
            set.clear_conflicting(unit_mask);
        }
    }

    /// Binds a read or write callback, stitching it when narrower than the bus.
    pub(crate) fn set_delegate(
        &mut self,
        target: SubunitTarget,
        unit_mask: u64,
        bus_width: DataWidth,
        endianness: Endianness,
    ) -> Result<(), MemoryError> {
        let handler_width = target.width();
        if handler_width > bus_width {
            return Err(MemoryError::HandlerTooWide {
                name: target.name().to_string(),
                handler_bits: handler_width.bits(),
                bus_bits: bus_width.bits(),
            });
        }
        if handler_width == bus_width {
            self.kind = HandlerKind::Callback(match target {
                SubunitTarget::Read(delegate) => CallbackTarget::Read(delegate),
                SubunitTarget::Write(delegate) => CallbackTarget::Write(delegate),
            });
            return Ok(());
        }

        let unit_mask = if unit_mask == 0 {
            bus_width.mask()
        } else {
            unit_mask
        };
        let mut set = match &self.kind {
            HandlerKind::Callback(CallbackTarget::Stitched(set)) => set.clone(),
            _ => SubunitSet::default(),
        };
        set.configure(unit_mask, bus_width, endianness, self.bytemask, &target)?;
        self.kind = HandlerKind::Callback(CallbackTarget::Stitched(set));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CallbackTarget, HandlerKind, HandlerSlot, SubunitTarget};
    use crate::{DataWidth, Endianness, MemoryError, ReadDelegate};

    fn narrow_reader(name: &str) -> SubunitTarget {
        SubunitTarget::Read(ReadDelegate::new(name, DataWidth::Bits8, |_, _| 0))
    }

    #[test]
    fn mirrored_bounds_follow_the_copy_containing_the_address() {
        let mut slot = HandlerSlot::default();
        slot.configure(0x1000, 0x13FF, 0x03FF, DataWidth::Bits8);
        assert_eq!(slot.mirrored_start_end(0x1010), (0x1000, 0x13FF));
        assert_eq!(slot.mirrored_start_end(0x5010), (0x5000, 0x53FF));
        assert_eq!(slot.byteoffset(0x5010), 0x10);
        assert!(slot.matches_exactly(0x1000, 0x13FF, 0x03FF));
    }

    #[test]
    fn full_width_delegates_bind_directly() {
        let mut slot = HandlerSlot::default();
        slot.configure(0, 0xFF, 0xFF, DataWidth::Bits16);
        slot.set_delegate(
            SubunitTarget::Read(ReadDelegate::new("wide", DataWidth::Bits16, |_, _| 1)),
            0,
            DataWidth::Bits16,
            Endianness::Little,
        )
        .expect("same width");
        assert!(matches!(
            slot.kind(),
            HandlerKind::Callback(CallbackTarget::Read(_))
        ));
        assert_eq!(slot.kind().name(), "wide");
    }

    #[test]
    fn wider_than_bus_is_rejected() {
        let mut slot = HandlerSlot::default();
        let error = slot
            .set_delegate(
                SubunitTarget::Read(ReadDelegate::new("huge", DataWidth::Bits32, |_, _| 0)),
                0,
                DataWidth::Bits16,
                Endianness::Little,
            )
            .expect_err("too wide");
        assert!(matches!(error, MemoryError::HandlerTooWide { .. }));
    }

    #[test]
    fn narrow_delegates_accumulate_lanes() {
        let mut slot = HandlerSlot::default();
        slot.configure(0, 0xFF, 0xFF, DataWidth::Bits16);
        slot.set_delegate(narrow_reader("lo"), 0x00FF, DataWidth::Bits16, Endianness::Little)
            .expect("low lane");
        assert!(!slot.overridden_by(0xFF00));
        slot.set_delegate(narrow_reader("hi"), 0xFF00, DataWidth::Bits16, Endianness::Little)
            .expect("high lane");
        assert_eq!(slot.subunits().map(|set| set.len()), Some(2));
        assert!(slot.overridden_by(0xFFFF));
        slot.clear_conflicting(0x00FF);
        assert_eq!(slot.subunits().map(|set| set.len()), Some(1));
    }

    #[test]
    fn deconfigure_returns_to_unmapped() {
        let mut slot = HandlerSlot::default();
        slot.configure(0, 0xFF, 0xFF, DataWidth::Bits8);
        slot.set_kind(HandlerKind::NoOp);
        slot.deconfigure();
        assert!(!slot.is_populated());
        assert!(matches!(slot.kind(), HandlerKind::Unmapped));
    }
}
