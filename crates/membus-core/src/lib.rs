//! Address-bus dispatch engine.
//!
//! An [`AddressSpace`] routes every read, write and address notification through a two-level
//! [`DispatchTable`] of handler slots: bank-backed memory, ports, callbacks (stitched to the bus
//! width when narrower), or the static unmapped/no-op slots. Memory is owned by a
//! [`MemoryManager`] shared between spaces, which tracks banks, regions, shares and the blocks
//! allocated by [`initialize`].

/// Space configuration and scalar types.
pub mod config;
pub use config::{
    AccessKind, AccessMode, DataWidth, Endianness, Offset, SpaceConfig, MAX_BYTE_ADDRESS_BITS,
};

/// Error taxonomy for configuration-time operations.
pub mod error;
pub use error::{ErrorClass, MemoryError, RangeViolation};

/// Handler slots, delegates and width stitching.
pub mod handler;
pub use handler::{
    HandlerKind, HandlerSlot, IoPort, LatchPort, PortHandle, ReadDelegate, SetAddressDelegate,
    WriteDelegate,
};

/// Backing storage, banks, blocks and the shared manager.
pub mod memory;
pub use memory::{
    BackingPtr, BankHandle, ConfigPhase, MemoryBank, MemoryBlock, MemoryManager, MemoryRegion,
    SharedManager, SpaceId, Storage, MEMORY_BLOCK_CHUNK,
};

/// Two-level dispatch tables.
pub mod table;
pub use table::DispatchTable;

/// Direct-access cache for memory reads.
pub mod direct;
pub use direct::{DirectAccessEntry, DirectCache};

/// Range validation and table population.
pub mod install;
pub use install::{check_optimize_all, check_optimize_mirror, ByteRange};

/// Whole-table access interception.
pub mod tap;
pub use tap::{TapAccess, TapBypass, TapHook};

/// Persisted bank selections.
pub mod snapshot;
pub use snapshot::{BankState, MemorySnapshot, SnapshotVersion};

/// Address spaces and their access paths.
pub mod space;
pub use space::{initialize, AddressSpace, BackingRequest, MapDump, MapDumpEntry};

/// Declarative address maps.
pub mod map;
pub use map::{AddressMap, MapEntry, MapHandler, RangeDescriptor, RangeKind};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
