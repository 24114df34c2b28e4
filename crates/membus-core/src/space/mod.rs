//! Address spaces: one bus description, its three dispatch tables and the install surface.
//!
//! Install entry points take logical addresses and validate them before any table is touched, so
//! a failed install leaves the space unchanged. Access entry points live in `access` and take
//! byte addresses.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

mod access;
mod dump;
mod populate;

pub use dump::{MapDump, MapDumpEntry};
pub use populate::{initialize, BackingRequest};

use crate::handler::{
    count_lanes, CallbackTarget, HandlerKind, SubunitTarget, STATIC_NOP, STATIC_UNMAP,
};
use crate::install::{check_optimize_all, check_optimize_mirror, ByteRange};
use crate::memory::block::span_len;
use crate::table::{level1_len, DispatchTable};
use crate::{
    AccessKind, AccessMode, BackingPtr, BankHandle, DirectCache, MemoryError, Offset,
    ReadDelegate, SetAddressDelegate, SharedManager, SpaceConfig, SpaceId, TapHook,
    WriteDelegate,
};

/// One bus: configuration, dispatch tables, direct-access cache and tap hook.
pub struct AddressSpace {
    config: SpaceConfig,
    id: SpaceId,
    manager: SharedManager,
    bytemask: Offset,
    unmap: u64,
    read: DispatchTable,
    write: DispatchTable,
    set_address: DispatchTable,
    cache: Rc<DirectCache>,
    tap_hook: Option<Rc<dyn TapHook>>,
    log_unmapped: Cell<bool>,
    requests: Vec<BackingRequest>,
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("name", &self.config.name)
            .field("id", &self.id)
            .field("bytemask", &self.bytemask)
            .field("read_tapped", &self.read.is_tapped())
            .field("write_tapped", &self.write.is_tapped())
            .field("requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

impl AddressSpace {
    /// Validates `config` and registers a new space with `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidSpaceConfig`] when the configuration is unusable.
    pub fn new(manager: &SharedManager, config: SpaceConfig) -> Result<Self, MemoryError> {
        config.validate()?;
        let bytemask = config.byte_mask();
        let (id, tap_cells) = {
            let mut manager = manager.borrow_mut();
            let id = manager.register_space(&config.name);
            (id, manager.tap_template(level1_len(bytemask)))
        };
        log::debug!(
            "{}: {}-bit {:?}-endian space, byte mask {bytemask:#x}",
            config.name,
            config.data_width.bits(),
            config.endianness
        );
        Ok(Self {
            unmap: config.unmap_value & config.data_width.mask(),
            log_unmapped: Cell::new(config.log_unmapped),
            read: DispatchTable::new(AccessKind::Read, bytemask, Rc::clone(&tap_cells)),
            write: DispatchTable::new(AccessKind::Write, bytemask, Rc::clone(&tap_cells)),
            set_address: DispatchTable::new(AccessKind::SetAddress, bytemask, tap_cells),
            cache: Rc::new(DirectCache::default()),
            tap_hook: None,
            requests: Vec::new(),
            manager: Rc::clone(manager),
            bytemask,
            config,
            id,
        })
    }

    /// Bus description.
    #[must_use]
    pub const fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Space name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Identifier assigned by the manager.
    #[must_use]
    pub const fn id(&self) -> SpaceId {
        self.id
    }

    /// Manager this space registered with.
    #[must_use]
    pub const fn manager(&self) -> &SharedManager {
        &self.manager
    }

    /// Byte-address mask of the decoded space.
    #[must_use]
    pub const fn byte_mask(&self) -> Offset {
        self.bytemask
    }

    /// Value unmapped reads return, clipped to the bus width.
    #[must_use]
    pub const fn unmap_value(&self) -> u64 {
        self.unmap
    }

    /// Dispatch table for `kind`.
    #[must_use]
    pub const fn table(&self, kind: AccessKind) -> &DispatchTable {
        match kind {
            AccessKind::Read => &self.read,
            AccessKind::Write => &self.write,
            AccessKind::SetAddress => &self.set_address,
        }
    }

    /// Direct-access cache of the read table.
    #[must_use]
    pub fn direct_cache(&self) -> &DirectCache {
        &self.cache
    }

    /// Backing requests recorded during configuration.
    #[must_use]
    pub fn backing_requests(&self) -> &[BackingRequest] {
        &self.requests
    }

    fn table_and_cache(&mut self, kind: AccessKind) -> (&mut DispatchTable, &DirectCache) {
        let table = match kind {
            AccessKind::Read => &mut self.read,
            AccessKind::Write => &mut self.write,
            AccessKind::SetAddress => &mut self.set_address,
        };
        (table, &self.cache)
    }

    /// Maps `range` to a fresh slot doing `handler`.
    fn map_new_slot(
        &mut self,
        kind: AccessKind,
        range: &ByteRange,
        handler: HandlerKind,
    ) -> Result<u16, MemoryError> {
        let bus_width = self.config.data_width;
        let (table, cache) = self.table_and_cache(kind);
        let entry = table.allocate_slot()?;
        table.slot_mut(entry).set_kind(handler);
        table.map_range(range, entry, bus_width, cache)?;
        Ok(entry)
    }

    fn trace_install(&self, operation: &str, kind: AccessKind, range: &ByteRange, name: &str) {
        log::debug!(
            "{}: {operation} {:#x}-{:#x} mask {:#x} mirror {:#x} ({}) -> {name}",
            self.config.name,
            range.start,
            range.end,
            range.mask,
            range.mirror,
            kind.label()
        );
    }

    /// Installs RAM over `start..=end` for the directions in `mode`, backed by an anonymous bank.
    ///
    /// Before initialization the backing is deferred to [`initialize`]; afterwards it is found or
    /// allocated immediately.
    ///
    /// # Errors
    ///
    /// Fails on an invalid range, on slot exhaustion, and with [`MemoryError::MissingBacking`]
    /// when no backing can be found once the manager is running.
    pub fn install_ram(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
        mode: AccessMode,
    ) -> Result<BankHandle, MemoryError> {
        self.install_ram_generic("install_ram", start, end, mirror, mode, None, None)
    }

    /// Installs read-only memory; writes to the range keep whatever was there before.
    ///
    /// # Errors
    ///
    /// As for [`Self::install_ram`].
    pub fn install_rom(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
    ) -> Result<BankHandle, MemoryError> {
        self.install_ram_generic("install_rom", start, end, mirror, AccessMode::Read, None, None)
    }

    /// Installs RAM backed by caller-supplied memory.
    ///
    /// # Errors
    ///
    /// Fails on an invalid range, on slot exhaustion, and with
    /// [`MemoryError::BackingOutOfBounds`] when `memory` is too short.
    pub fn install_ram_backed(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
        mode: AccessMode,
        memory: BackingPtr,
    ) -> Result<BankHandle, MemoryError> {
        self.install_ram_generic("install_ram", start, end, mirror, mode, Some(memory), None)
    }

    /// Installs RAM whose backing is the named share, created by the first request that binds it.
    ///
    /// # Errors
    ///
    /// As for [`Self::install_ram`].
    pub fn install_shared_ram(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
        mode: AccessMode,
        share: &str,
    ) -> Result<BankHandle, MemoryError> {
        self.install_ram_generic("install_shared_ram", start, end, mirror, mode, None, Some(share))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn install_ram_generic(
        &mut self,
        operation: &'static str,
        start: Offset,
        end: Offset,
        mirror: Offset,
        mode: AccessMode,
        memory: Option<BackingPtr>,
        share: Option<&str>,
    ) -> Result<BankHandle, MemoryError> {
        let range = check_optimize_mirror(&self.config, operation, start, end, mirror)?;
        if let Some(memory) = &memory {
            memory.ensure_len(backing_len(&range))?;
        }
        let bank = self
            .manager
            .borrow_mut()
            .bank_find_or_allocate(self.id, None, range.start, range.end);
        self.attach_backing(&bank, &range, memory, share)?;

        if mode.reads() {
            self.map_new_slot(AccessKind::Read, &range, HandlerKind::Bank(Rc::clone(&bank)))?;
            bank.add_reference(&self.cache);
            self.trace_install(operation, AccessKind::Read, &range, bank.tag());
        }
        if mode.writes() {
            self.map_new_slot(AccessKind::Write, &range, HandlerKind::Bank(Rc::clone(&bank)))?;
            self.trace_install(operation, AccessKind::Write, &range, bank.tag());
        }
        Ok(bank)
    }

    /// Installs the named bank over `start..=end`, creating it on first use. Its memory comes
    /// from [`crate::MemoryBank::configure_entry`] or [`crate::MemoryBank::set_base`].
    ///
    /// # Errors
    ///
    /// Fails on an invalid range or slot exhaustion.
    pub fn install_bank(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
        tag: &str,
        mode: AccessMode,
    ) -> Result<BankHandle, MemoryError> {
        let range = check_optimize_mirror(&self.config, "install_bank", start, end, mirror)?;
        let bank = self
            .manager
            .borrow_mut()
            .bank_find_or_allocate(self.id, Some(tag), range.start, range.end);
        if mode.reads() {
            self.map_new_slot(AccessKind::Read, &range, HandlerKind::Bank(Rc::clone(&bank)))?;
            bank.add_reference(&self.cache);
            self.trace_install("install_bank", AccessKind::Read, &range, tag);
        }
        if mode.writes() {
            self.map_new_slot(AccessKind::Write, &range, HandlerKind::Bank(Rc::clone(&bank)))?;
            self.trace_install("install_bank", AccessKind::Write, &range, tag);
        }
        Ok(bank)
    }

    /// Binds registered ports: reads of the range go to `read_port`, writes to `write_port`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownPort`] for an unregistered name, before anything is
    /// installed; otherwise fails on an invalid range or slot exhaustion.
    pub fn install_port(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
        read_port: Option<&str>,
        write_port: Option<&str>,
    ) -> Result<(), MemoryError> {
        let range = check_optimize_mirror(&self.config, "install_port", start, end, mirror)?;
        let (read_binding, write_binding) = {
            let manager = self.manager.borrow();
            (
                read_port.map(|name| manager.port(name)).transpose()?,
                write_port.map(|name| manager.port(name)).transpose()?,
            )
        };
        if let Some(binding) = read_binding {
            let name = binding.name().to_string();
            self.map_new_slot(AccessKind::Read, &range, HandlerKind::Port(binding))?;
            self.trace_install("install_port", AccessKind::Read, &range, &name);
        }
        if let Some(binding) = write_binding {
            let name = binding.name().to_string();
            self.map_new_slot(AccessKind::Write, &range, HandlerKind::Port(binding))?;
            self.trace_install("install_port", AccessKind::Write, &range, &name);
        }
        Ok(())
    }

    /// Installs a read callback. A delegate narrower than the bus occupies the lanes selected by
    /// `unit_mask` (zero selects every lane); lanes already held by other narrow handlers in the
    /// range are kept.
    ///
    /// # Errors
    ///
    /// Fails on an invalid range, a delegate wider than the bus, a unit mask that splits a lane,
    /// or slot exhaustion.
    #[allow(clippy::too_many_arguments)]
    pub fn install_read_handler(
        &mut self,
        start: Offset,
        end: Offset,
        mask: Offset,
        mirror: Offset,
        select: Offset,
        delegate: ReadDelegate,
        unit_mask: u64,
    ) -> Result<(), MemoryError> {
        self.install_callback(
            "install_read_handler",
            AccessKind::Read,
            [start, end, mask, mirror, select],
            SubunitTarget::Read(delegate),
            unit_mask,
        )
    }

    /// Installs a write callback; see [`Self::install_read_handler`].
    ///
    /// # Errors
    ///
    /// As for [`Self::install_read_handler`].
    #[allow(clippy::too_many_arguments)]
    pub fn install_write_handler(
        &mut self,
        start: Offset,
        end: Offset,
        mask: Offset,
        mirror: Offset,
        select: Offset,
        delegate: WriteDelegate,
        unit_mask: u64,
    ) -> Result<(), MemoryError> {
        self.install_callback(
            "install_write_handler",
            AccessKind::Write,
            [start, end, mask, mirror, select],
            SubunitTarget::Write(delegate),
            unit_mask,
        )
    }

    fn install_callback(
        &mut self,
        operation: &'static str,
        kind: AccessKind,
        [start, end, mask, mirror, select]: [Offset; 5],
        target: SubunitTarget,
        unit_mask: u64,
    ) -> Result<(), MemoryError> {
        let range =
            check_optimize_all(&self.config, operation, start, end, mask, mirror, select)?;
        let bus_width = self.config.data_width;
        let endianness = self.config.endianness;
        let handler_width = target.width();
        if handler_width > bus_width {
            return Err(MemoryError::HandlerTooWide {
                name: target.name().to_string(),
                handler_bits: handler_width.bits(),
                bus_bits: bus_width.bits(),
            });
        }
        let unit_mask = if handler_width == bus_width {
            0
        } else {
            let lanes = if unit_mask == 0 {
                bus_width.mask()
            } else {
                unit_mask
            };
            count_lanes(lanes, handler_width, bus_width)?;
            unit_mask
        };

        let (table, cache) = self.table_and_cache(kind);
        let entries = table.setup_range(&range, unit_mask, bus_width, cache)?;
        for &entry in &entries {
            table
                .slot_mut(entry)
                .set_delegate(target.clone(), unit_mask, bus_width, endianness)?;
        }
        self.trace_install(operation, kind, &range, target.name());
        Ok(())
    }

    /// Installs a set-address callback, called with the native-unit offset into the range.
    ///
    /// # Errors
    ///
    /// Fails on an invalid range or slot exhaustion.
    pub fn install_set_address_handler(
        &mut self,
        start: Offset,
        end: Offset,
        mask: Offset,
        mirror: Offset,
        select: Offset,
        delegate: SetAddressDelegate,
    ) -> Result<(), MemoryError> {
        let operation = "install_set_address_handler";
        let range =
            check_optimize_all(&self.config, operation, start, end, mask, mirror, select)?;
        let name = delegate.name().to_string();
        self.map_new_slot(
            AccessKind::SetAddress,
            &range,
            HandlerKind::Callback(CallbackTarget::SetAddress(delegate)),
        )?;
        self.trace_install(operation, AccessKind::SetAddress, &range, &name);
        Ok(())
    }

    /// Returns `start..=end` to the unmapped state, or to silent no-ops when `quiet`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid range.
    pub fn unmap(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
        mode: AccessMode,
        quiet: bool,
    ) -> Result<(), MemoryError> {
        let operation = if quiet { "nop" } else { "unmap" };
        let range = check_optimize_mirror(&self.config, operation, start, end, mirror)?;
        let entry = if quiet { STATIC_NOP } else { STATIC_UNMAP };
        let bus_width = self.config.data_width;
        for kind in [AccessKind::Read, AccessKind::Write] {
            let selected = match kind {
                AccessKind::Read => mode.reads(),
                _ => mode.writes(),
            };
            if selected {
                let (table, cache) = self.table_and_cache(kind);
                table.map_range(&range, entry, bus_width, cache)?;
                self.trace_install(operation, kind, &range, operation);
            }
        }
        Ok(())
    }

    /// Shorthand for a quiet [`Self::unmap`].
    ///
    /// # Errors
    ///
    /// Fails on an invalid range.
    pub fn nop(
        &mut self,
        start: Offset,
        end: Offset,
        mirror: Offset,
        mode: AccessMode,
    ) -> Result<(), MemoryError> {
        self.unmap(start, end, mirror, mode, true)
    }

    /// Routes every access of `kind` through the tap hook while `enabled`.
    pub fn enable_tap(&self, kind: AccessKind, enabled: bool) {
        self.table(kind).set_tapped(enabled);
    }

    /// True while accesses of `kind` are tapped.
    #[must_use]
    pub fn is_tapped(&self, kind: AccessKind) -> bool {
        self.table(kind).is_tapped()
    }

    /// Replaces the tap hook. Tapped accesses with no hook are performed untouched.
    pub fn set_tap_hook(&mut self, hook: Option<Rc<dyn TapHook>>) {
        self.tap_hook = hook;
    }

    /// Turns unmapped-access warnings on or off.
    pub fn set_log_unmapped(&self, enabled: bool) {
        self.log_unmapped.set(enabled);
    }

    /// Slot `kind` dispatches `byteaddress` to, ignoring taps.
    #[must_use]
    pub fn lookup(&self, kind: AccessKind, byteaddress: Offset) -> u16 {
        self.table(kind).lookup(byteaddress & self.bytemask)
    }

    /// Contiguous window around `byteaddress` that dispatches to one slot.
    #[must_use]
    pub fn derive_range(&self, kind: AccessKind, byteaddress: Offset) -> (u16, Offset, Offset) {
        self.table(kind).derive_range(byteaddress)
    }

    /// Display name of `entry` in the `kind` table.
    #[must_use]
    pub fn handler_name(&self, kind: AccessKind, entry: u16) -> String {
        self.table(kind).handler_name(entry)
    }

    /// Rescans all three tables against their tracked reference counts.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ReferenceCountMismatch`] for the first slot that disagrees.
    pub fn verify_reference_counts(&self) -> Result<(), MemoryError> {
        self.read.verify_reference_counts()?;
        self.write.verify_reference_counts()?;
        self.set_address.verify_reference_counts()
    }
}

/// Bytes of backing a validated range actually addresses.
fn backing_len(range: &ByteRange) -> usize {
    span_len(range.start, range.start + (range.end - range.start).min(range.mask))
}
