//! Whole-table interception for debuggers and tracers.
//!
//! Enabling a tap flips the table's selector to a template whose every cell names the tap proxy.
//! The proxy reports the access to the space's [`TapHook`], then performs it for real with the
//! normal table selected through a [`TapBypass`] guard.

use crate::table::{DispatchTable, LiveTable};
use crate::{AddressSpace, Offset};

/// An intercepted access, reported before it is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapAccess {
    /// Native-width read.
    Read {
        /// Byte address.
        address: Offset,
        /// Access mask.
        mask: u64,
    },
    /// Native-width write.
    Write {
        /// Byte address.
        address: Offset,
        /// Data being written.
        data: u64,
        /// Access mask.
        mask: u64,
    },
    /// Address-only notification.
    SetAddress {
        /// Byte address.
        address: Offset,
    },
}

/// Receiver for tapped accesses.
///
/// Accesses the hook issues on `space` are themselves tapped; a hook that reads memory must guard
/// against recursing into itself.
pub trait TapHook {
    /// Called before the intercepted access is performed.
    fn on_access(&self, space: &AddressSpace, access: TapAccess);
}

/// Selects the normal table for its lifetime and restores the previous selection on drop,
/// including when unwinding.
#[derive(Debug)]
pub struct TapBypass<'a> {
    table: &'a DispatchTable,
    previous: LiveTable,
}

impl<'a> TapBypass<'a> {
    /// Switches `table` to its normal cells.
    #[must_use]
    pub fn engage(table: &'a DispatchTable) -> Self {
        let previous = table.swap_live(LiveTable::Normal);
        Self { table, previous }
    }
}

impl Drop for TapBypass<'_> {
    fn drop(&mut self) {
        self.table.restore_live(self.previous);
    }
}
