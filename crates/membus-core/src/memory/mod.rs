//! Backing memory: byte storage, banks, blocks, regions and the manager tying them together.

/// Shared byte storage and typed unit access.
pub mod backing;
/// Retargetable bank cells.
pub mod bank;
/// Allocated blocks and supplied regions.
pub mod block;
/// Registry shared by every space.
pub mod manager;

pub use backing::{decode_unit, encode_unit, BackingPtr, Storage};
pub use bank::{BankHandle, MemoryBank};
pub use block::{MemoryBlock, MemoryRegion};
pub use manager::{ConfigPhase, MemoryManager, SharedManager, SpaceId, MEMORY_BLOCK_CHUNK};
