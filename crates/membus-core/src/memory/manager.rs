//! Owner of everything shared between spaces: banks, blocks, regions, shares, ports and tap
//! templates.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::block::{MemoryBlock, MemoryRegion};
use crate::handler::PortBinding;
use crate::table::tap_template;
use crate::{
    BackingPtr, BankHandle, BankState, MemoryBank, MemoryError, MemorySnapshot, Offset,
    PortHandle, SnapshotVersion,
};

/// Granularity, in bytes, of the windows the allocation pass grows when coalescing unbacked
/// ranges.
pub const MEMORY_BLOCK_CHUNK: Offset = 0x1_0000;

/// Manager handle shared by every space built on it.
pub type SharedManager = Rc<RefCell<MemoryManager>>;

/// Identifies a space registered with a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(usize);

impl SpaceId {
    /// Wraps a raw registration index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw registration index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ConfigPhase {
    /// Maps are being installed; RAM without backing is allocated later in one pass.
    Configuring,
    /// The allocation pass ran; new RAM installs allocate immediately.
    Initialized,
    /// The machine runs; RAM installs must bring their own backing.
    Running,
}

impl ConfigPhase {
    /// Lowercase label used in diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Configuring => "configuring",
            Self::Initialized => "initialized",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for ConfigPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Registry of shared memory resources.
#[derive(Debug)]
pub struct MemoryManager {
    phase: ConfigPhase,
    spaces: Vec<String>,
    banks: BTreeMap<String, BankHandle>,
    blocks: Vec<MemoryBlock>,
    regions: BTreeMap<String, MemoryRegion>,
    shares: BTreeMap<String, BackingPtr>,
    ports: BTreeMap<String, PortBinding>,
    tap_templates: BTreeMap<usize, Rc<[u16]>>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    /// Creates an empty manager in the configuring phase.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: ConfigPhase::Configuring,
            spaces: Vec::new(),
            banks: BTreeMap::new(),
            blocks: Vec::new(),
            regions: BTreeMap::new(),
            shares: BTreeMap::new(),
            ports: BTreeMap::new(),
            tap_templates: BTreeMap::new(),
        }
    }

    /// Creates an empty manager behind a shared handle.
    #[must_use]
    pub fn shared() -> SharedManager {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> ConfigPhase {
        self.phase
    }

    pub(crate) fn mark_initialized(&mut self) {
        if self.phase == ConfigPhase::Configuring {
            self.phase = ConfigPhase::Initialized;
        }
    }

    /// Moves an initialized manager into the running phase.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WrongPhase`] before initialization.
    pub fn start_running(&mut self) -> Result<(), MemoryError> {
        if self.phase == ConfigPhase::Configuring {
            return Err(MemoryError::WrongPhase {
                operation: "start_running",
                phase: self.phase.label(),
            });
        }
        self.phase = ConfigPhase::Running;
        Ok(())
    }

    pub(crate) fn register_space(&mut self, name: &str) -> SpaceId {
        self.spaces.push(name.to_string());
        SpaceId(self.spaces.len() - 1)
    }

    /// Name a space registered under.
    #[must_use]
    pub fn space_name(&self, space: SpaceId) -> Option<&str> {
        self.spaces.get(space.0).map(String::as_str)
    }

    /// Shared all-tap template for tables with `level1_len` first-level cells.
    pub fn tap_template(&mut self, level1_len: usize) -> Rc<[u16]> {
        Rc::clone(
            self.tap_templates
                .entry(level1_len)
                .or_insert_with(|| tap_template(level1_len)),
        )
    }

    /// Adds a named region; an existing region of the same name is replaced.
    pub fn add_region(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> &MemoryRegion {
        let name = name.into();
        let region = MemoryRegion::new(name.clone(), bytes);
        self.regions.insert(name.clone(), region);
        &self.regions[&name]
    }

    /// Region registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownRegion`] when none is.
    pub fn region(&self, name: &str) -> Result<&MemoryRegion, MemoryError> {
        self.regions.get(name).ok_or_else(|| MemoryError::UnknownRegion {
            name: name.to_string(),
        })
    }

    /// Registers a port under `name`.
    pub fn register_port(&mut self, name: impl Into<String>, port: PortHandle) {
        let name = name.into();
        self.ports
            .insert(name.clone(), PortBinding::new(name.as_str(), port));
    }

    /// Port registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownPort`] when none is.
    pub fn port(&self, name: &str) -> Result<PortBinding, MemoryError> {
        self.ports
            .get(name)
            .cloned()
            .ok_or_else(|| MemoryError::UnknownPort {
                name: name.to_string(),
            })
    }

    /// Bank registered under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownBank`] when none is.
    pub fn bank(&self, tag: &str) -> Result<BankHandle, MemoryError> {
        self.banks
            .get(tag)
            .cloned()
            .ok_or_else(|| MemoryError::UnknownBank {
                tag: tag.to_string(),
            })
    }

    /// Every bank, in tag order.
    pub fn banks(&self) -> impl Iterator<Item = &BankHandle> {
        self.banks.values()
    }

    /// Returns the named bank, creating it on first use. Anonymous requests reuse the anonymous
    /// bank created for exactly the same byte range of the same space.
    pub(crate) fn bank_find_or_allocate(
        &mut self,
        space: SpaceId,
        tag: Option<&str>,
        bytestart: Offset,
        byteend: Offset,
    ) -> BankHandle {
        let (tag, anonymous) = match tag {
            Some(tag) => (tag.to_string(), false),
            None => (format!("~{}:{bytestart:x}-{byteend:x}~", space.0), true),
        };
        Rc::clone(
            self.banks
                .entry(tag.clone())
                .or_insert_with(|| Rc::new(MemoryBank::new(tag, anonymous, bytestart, byteend))),
        )
    }

    /// Buffer bound to share `name`, if any.
    #[must_use]
    pub fn share(&self, name: &str) -> Option<BackingPtr> {
        self.shares.get(name).cloned()
    }

    /// Binds `ptr` to share `name` unless an earlier request already did; returns the winner.
    pub(crate) fn bind_share(&mut self, name: &str, ptr: BackingPtr) -> BackingPtr {
        self.shares.entry(name.to_string()).or_insert(ptr).clone()
    }

    /// Every block allocated so far.
    #[must_use]
    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    /// Records `bytestart..=byteend` of `space` as backed, by `memory` or by a fresh zeroed
    /// allocation.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when `memory` is too short for the range.
    pub(crate) fn allocate_block(
        &mut self,
        space: SpaceId,
        bytestart: Offset,
        byteend: Offset,
        memory: Option<BackingPtr>,
    ) -> Result<BackingPtr, MemoryError> {
        let block = match memory {
            Some(memory) => MemoryBlock::new(space, bytestart, byteend, memory)?,
            None => {
                log::debug!(
                    "{}: allocating block {bytestart:#x}-{byteend:#x}",
                    self.space_name(space).unwrap_or("?")
                );
                MemoryBlock::allocate(space, bytestart, byteend)
            }
        };
        let base = block.base().clone();
        self.blocks.push(block);
        Ok(base)
    }

    /// Memory already backing all of `bytestart..=byteend` of `space`.
    #[must_use]
    pub fn find_backing_memory(
        &self,
        space: SpaceId,
        bytestart: Offset,
        byteend: Offset,
    ) -> Option<BackingPtr> {
        self.blocks
            .iter()
            .find(|block| block.contains(space, bytestart, byteend))
            .and_then(|block| block.pointer_to(bytestart).ok())
    }

    /// Active entry of every named bank that has one selected.
    #[must_use]
    pub fn bank_states(&self) -> Vec<BankState> {
        self.banks
            .values()
            .filter(|bank| !bank.is_anonymous())
            .filter_map(|bank| {
                bank.entry().map(|entry| BankState {
                    tag: bank.tag().to_string(),
                    entry,
                })
            })
            .collect()
    }

    /// Reselects entry `entry` of bank `tag`.
    ///
    /// # Errors
    ///
    /// Fails when the bank is unknown or the entry cannot be selected.
    pub fn restore_bank_entry(&self, tag: &str, entry: usize) -> Result<(), MemoryError> {
        self.bank(tag)?.set_entry(entry)
    }

    /// Captures every bank selection.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot::new(self.bank_states())
    }

    /// Reapplies every selection in `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnsupportedSnapshot`] for unknown schema versions, or the first
    /// bank selection that fails.
    pub fn restore_snapshot(&self, snapshot: &MemorySnapshot) -> Result<(), MemoryError> {
        let version = snapshot.version as u16;
        if SnapshotVersion::from_u16(version).is_none() {
            return Err(MemoryError::UnsupportedSnapshot { version });
        }
        for state in &snapshot.banks {
            self.restore_bank_entry(&state.tag, state.entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::{ConfigPhase, MemoryManager, SpaceId};
    use crate::{LatchPort, MemoryError, Storage};

    #[test]
    fn anonymous_banks_are_reused_by_exact_range() {
        let mut manager = MemoryManager::new();
        let program = manager.register_space("program");
        let io = manager.register_space("io");
        let first = manager.bank_find_or_allocate(program, None, 0, 0xFFF);
        let again = manager.bank_find_or_allocate(program, None, 0, 0xFFF);
        let other = manager.bank_find_or_allocate(program, None, 0, 0x7FF);
        let elsewhere = manager.bank_find_or_allocate(io, None, 0, 0xFFF);
        assert!(Rc::ptr_eq(&first, &again));
        assert!(!Rc::ptr_eq(&first, &other));
        assert!(!Rc::ptr_eq(&first, &elsewhere));
        assert_eq!(first.tag(), "~0:0-fff~");
        let named = manager.bank_find_or_allocate(program, Some("rombank"), 0x8000, 0xBFFF);
        assert!(!named.is_anonymous());
        assert!(Rc::ptr_eq(&named, &manager.bank("rombank").expect("registered")));
    }

    #[test]
    fn first_share_binding_wins() {
        let mut manager = MemoryManager::new();
        let a = Storage::zeroed(4).at(0).expect("a");
        let b = Storage::zeroed(4).at(0).expect("b");
        let winner = manager.bind_share("vram", a.clone());
        let later = manager.bind_share("vram", b);
        assert!(winner.same_address(&a));
        assert!(later.same_address(&a));
    }

    #[test]
    fn blocks_answer_backing_queries() {
        let mut manager = MemoryManager::new();
        let space = manager.register_space("program");
        manager
            .allocate_block(space, 0x4000, 0x7FFF, None)
            .expect("zeroed block");
        let ptr = manager
            .find_backing_memory(space, 0x5000, 0x50FF)
            .expect("covered");
        assert_eq!(ptr.offset(), 0x1000);
        assert!(manager.find_backing_memory(space, 0x7F00, 0x80FF).is_none());
        assert!(manager
            .find_backing_memory(SpaceId::new(7), 0x5000, 0x50FF)
            .is_none());
    }

    #[test]
    fn phases_advance_in_order() {
        let mut manager = MemoryManager::new();
        assert!(matches!(
            manager.start_running(),
            Err(MemoryError::WrongPhase { .. })
        ));
        manager.mark_initialized();
        assert_eq!(manager.phase(), ConfigPhase::Initialized);
        manager.start_running().expect("initialized");
        assert_eq!(manager.phase().to_string(), "running");
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let mut manager = MemoryManager::new();
        manager.register_port("IN0", Rc::new(LatchPort::new(0)));
        assert!(manager.port("IN0").is_ok());
        assert!(matches!(
            manager.port("IN1"),
            Err(MemoryError::UnknownPort { .. })
        ));
        assert!(matches!(
            manager.region("gfx"),
            Err(MemoryError::UnknownRegion { .. })
        ));
        assert!(matches!(
            manager.bank("nope"),
            Err(MemoryError::UnknownBank { .. })
        ));
    }

    #[test]
    fn snapshots_restore_bank_selections() {
        let mut manager = MemoryManager::new();
        let bank = manager.bank_find_or_allocate(SpaceId::new(0), Some("rombank"), 0x8000, 0xBFFF);
        let storage = Storage::zeroed(0x8000);
        bank.configure_entries(0, 2, &storage.at(0).expect("base"), 0x4000)
            .expect("entries");
        bank.set_entry(1).expect("entry 1");
        let snapshot = manager.snapshot();
        bank.set_entry(0).expect("entry 0");
        manager.restore_snapshot(&snapshot).expect("restorable");
        assert_eq!(bank.entry(), Some(1));
        assert_eq!(manager.bank_states().len(), 1);
    }
}
