//! Backing requests, the block-coalescing allocation pass and map population.

use std::rc::Rc;

use super::{backing_len, AddressSpace};
use crate::install::{check_optimize_mirror, ByteRange};
use crate::map::{AddressMap, MapEntry, MapHandler};
use crate::memory::block::span_len;
use crate::{
    AccessMode, BackingPtr, BankHandle, ConfigPhase, MemoryError, MemoryManager,
    Offset, MEMORY_BLOCK_CHUNK,
};

/// A byte range of one space that wants backing memory once allocation runs.
#[derive(Debug, Clone)]
pub struct BackingRequest {
    /// First byte.
    pub bytestart: Offset,
    /// Last byte.
    pub byteend: Offset,
    /// Share the range binds to, if any.
    pub share: Option<String>,
    /// Memory assigned so far.
    pub memory: Option<BackingPtr>,
    /// True when `memory` was supplied by the caller rather than allocated.
    pub supplied: bool,
    /// Bank whose base receives the memory.
    pub bank: Option<BankHandle>,
}

impl BackingRequest {
    /// True once memory is assigned.
    #[must_use]
    pub const fn is_backed(&self) -> bool {
        self.memory.is_some()
    }
}

/// Assigns memory to every request `base` covers and binds shares; returns the first request
/// still without memory.
fn assign_intersecting(
    requests: &mut [BackingRequest],
    manager: &mut MemoryManager,
    bytestart: Offset,
    byteend: Offset,
    base: Option<&BackingPtr>,
) -> Result<Option<usize>, MemoryError> {
    let mut unassigned = None;
    for (index, request) in requests.iter_mut().enumerate() {
        if request.memory.is_none() {
            if let Some(shared) = request.share.as_deref().and_then(|name| manager.share(name)) {
                shared.ensure_len(span_len(request.bytestart, request.byteend))?;
                request.memory = Some(shared);
            }
        }
        if request.memory.is_none() && request.bytestart >= bytestart && request.byteend <= byteend
        {
            if let Some(base) = base {
                request.memory = Some(base.advanced((request.bytestart - bytestart) as usize)?);
            }
        }
        if let (Some(memory), Some(share)) = (&request.memory, request.share.as_deref()) {
            manager.bind_share(share, memory.clone());
        }
        if request.memory.is_none() && unassigned.is_none() {
            unassigned = Some(index);
        }
    }
    Ok(unassigned)
}

impl AddressSpace {
    /// Records or merges a request for `range`.
    fn record_request(
        &mut self,
        range: &ByteRange,
        memory: Option<BackingPtr>,
        supplied: bool,
        share: Option<&str>,
        bank: &BankHandle,
    ) {
        let byteend = range.start + (backing_len(range) - 1) as Offset;
        if let Some(existing) = self
            .requests
            .iter_mut()
            .find(|request| request.bytestart == range.start && request.byteend == byteend)
        {
            if supplied || existing.memory.is_none() {
                existing.memory = memory;
                existing.supplied = supplied;
            }
            if share.is_some() {
                existing.share = share.map(str::to_string);
            }
            existing.bank = Some(Rc::clone(bank));
            return;
        }
        self.requests.push(BackingRequest {
            bytestart: range.start,
            byteend,
            share: share.map(str::to_string),
            memory,
            supplied,
            bank: Some(Rc::clone(bank)),
        });
    }

    /// Gives `bank` memory for `range`: the supplied pointer, a bound share, or memory already
    /// covering the range. Without any, allocation is deferred while configuring, immediate once
    /// initialized and an error once running.
    pub(super) fn attach_backing(
        &mut self,
        bank: &BankHandle,
        range: &ByteRange,
        memory: Option<BackingPtr>,
        share: Option<&str>,
    ) -> Result<(), MemoryError> {
        let length = backing_len(range);
        let byteend = range.start + (length - 1) as Offset;
        let supplied = memory.is_some();
        let manager = Rc::clone(&self.manager);
        let mut manager = manager.borrow_mut();

        let found = match memory {
            Some(memory) => Some(memory),
            None => {
                let shared = share.and_then(|name| manager.share(name));
                if let Some(shared) = &shared {
                    shared.ensure_len(length)?;
                }
                shared.or_else(|| manager.find_backing_memory(self.id, range.start, byteend))
            }
        };
        if let Some(found) = &found {
            bank.set_base(found.clone());
        }

        let phase = manager.phase();
        match phase {
            ConfigPhase::Configuring => {
                drop(manager);
                self.record_request(range, found, supplied, share, bank);
            }
            _ => {
                let base = match found {
                    Some(found) if supplied => {
                        manager.allocate_block(self.id, range.start, byteend, Some(found))?
                    }
                    Some(found) => found,
                    None if phase == ConfigPhase::Running => {
                        return Err(MemoryError::MissingBacking {
                            space: self.config.name.clone(),
                            start: range.start,
                            end: byteend,
                        });
                    }
                    None => {
                        let base = manager.allocate_block(self.id, range.start, byteend, None)?;
                        bank.set_base(base.clone());
                        base
                    }
                };
                if let Some(share) = share {
                    manager.bind_share(share, base);
                }
            }
        }
        Ok(())
    }

    /// Allocates memory for every request still unbacked, growing each new block over
    /// neighbouring unbacked requests in [`MEMORY_BLOCK_CHUNK`] steps.
    pub(crate) fn allocate_memory(&mut self) -> Result<(), MemoryError> {
        let manager = Rc::clone(&self.manager);
        let mut manager = manager.borrow_mut();

        // caller-supplied memory is registered first so backing lookups find it
        let mut supplied = Vec::new();
        for request in &self.requests {
            if let (true, Some(memory)) = (request.supplied, &request.memory) {
                manager.allocate_block(
                    self.id,
                    request.bytestart,
                    request.byteend,
                    Some(memory.clone()),
                )?;
                supplied.push((request.bytestart, request.byteend, memory.clone()));
            }
        }
        for (bytestart, byteend, memory) in &supplied {
            assign_intersecting(
                &mut self.requests,
                &mut manager,
                *bytestart,
                *byteend,
                Some(memory),
            )?;
        }
        let mut unassigned =
            assign_intersecting(&mut self.requests, &mut manager, Offset::MAX, 0, None)?;

        while let Some(index) = unassigned {
            let seed = &self.requests[index];
            let mut block_start = seed.bytestart / MEMORY_BLOCK_CHUNK;
            let mut block_end = seed.byteend / MEMORY_BLOCK_CHUNK;
            loop {
                let mut changed = false;
                for (other_index, other) in self.requests.iter().enumerate() {
                    if other.memory.is_some() || other_index == index {
                        continue;
                    }
                    let other_start = other.bytestart / MEMORY_BLOCK_CHUNK;
                    let other_end = other.byteend / MEMORY_BLOCK_CHUNK;
                    // intersecting or adjacent
                    if other_start <= block_end + 1 && other_end >= block_start.saturating_sub(1) {
                        if other_start < block_start {
                            block_start = other_start;
                            changed = true;
                        }
                        if other_end > block_end {
                            block_end = other_end;
                            changed = true;
                        }
                    }
                }
                if !changed {
                    break;
                }
            }

            let bytestart = block_start * MEMORY_BLOCK_CHUNK;
            let byteend = block_end * MEMORY_BLOCK_CHUNK + (MEMORY_BLOCK_CHUNK - 1);
            let base = manager.allocate_block(self.id, bytestart, byteend, None)?;
            unassigned = assign_intersecting(
                &mut self.requests,
                &mut manager,
                bytestart,
                byteend,
                Some(&base),
            )?;
        }
        Ok(())
    }

    /// Points every bank still without a base at the memory its request received.
    pub(crate) fn locate_memory(&self) -> Result<(), MemoryError> {
        for request in &self.requests {
            match (&request.bank, &request.memory) {
                (Some(bank), Some(memory)) if !bank.has_base() => bank.set_base(memory.clone()),
                (Some(bank), None) if !bank.has_base() => {
                    return Err(MemoryError::MissingBacking {
                        space: self.config.name.clone(),
                        start: request.bytestart,
                        end: request.byteend,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Installs every entry of `map` in declaration order; later entries win on overlap.
    ///
    /// # Errors
    ///
    /// Fails on the first entry that cannot be installed.
    pub fn populate_from_map(&mut self, map: &AddressMap) -> Result<(), MemoryError> {
        for entry in map.entries() {
            self.populate_side(entry, AccessMode::Read, &entry.read, |space, delegate| {
                space.install_read_handler(
                    entry.start,
                    entry.end,
                    entry.mask,
                    entry.mirror,
                    entry.select,
                    delegate.clone(),
                    entry.unit_mask,
                )
            })?;
            self.populate_side(entry, AccessMode::Write, &entry.write, |space, delegate| {
                space.install_write_handler(
                    entry.start,
                    entry.end,
                    entry.mask,
                    entry.mirror,
                    entry.select,
                    delegate.clone(),
                    entry.unit_mask,
                )
            })?;
            if let Some(delegate) = &entry.set_address {
                self.install_set_address_handler(
                    entry.start,
                    entry.end,
                    entry.mask,
                    entry.mirror,
                    entry.select,
                    delegate.clone(),
                )?;
            }
        }
        Ok(())
    }

    fn populate_side<D>(
        &mut self,
        entry: &MapEntry,
        mode: AccessMode,
        handler: &MapHandler<D>,
        install_callback: impl FnOnce(&mut Self, &D) -> Result<(), MemoryError>,
    ) -> Result<(), MemoryError> {
        let (start, end, mirror) = (entry.start, entry.end, entry.mirror);
        let writes = mode == AccessMode::Write;
        match handler {
            MapHandler::None => Ok(()),
            // writes to ROM are dropped silently
            MapHandler::Rom if writes => self.unmap(start, end, mirror, mode, true),
            MapHandler::Ram | MapHandler::Rom => self.install_map_memory(entry, mode),
            MapHandler::Unmapped => self.unmap(start, end, mirror, mode, false),
            MapHandler::NoOp => self.nop(start, end, mirror, mode),
            MapHandler::Bank(tag) => self.install_bank(start, end, mirror, tag, mode).map(|_| ()),
            MapHandler::Port(name) if writes => {
                self.install_port(start, end, mirror, None, Some(name.as_str()))
            }
            MapHandler::Port(name) => {
                self.install_port(start, end, mirror, Some(name.as_str()), None)
            }
            MapHandler::Callback(delegate) => install_callback(self, delegate),
        }
    }

    fn install_map_memory(
        &mut self,
        entry: &MapEntry,
        mode: AccessMode,
    ) -> Result<(), MemoryError> {
        let memory = match &entry.region {
            Some((name, offset)) => {
                let range = check_optimize_mirror(
                    &self.config,
                    "populate_from_map",
                    entry.start,
                    entry.end,
                    entry.mirror,
                )?;
                let manager = self.manager.borrow();
                let memory = manager.region(name)?.slice(*offset, backing_len(&range))?;
                Some(memory)
            }
            None => None,
        };
        self.install_ram_generic(
            "populate_from_map",
            entry.start,
            entry.end,
            entry.mirror,
            mode,
            memory,
            entry.share.as_deref(),
        )
        .map(|_| ())
    }
}

/// Runs the allocation pass for every space, points banks at their memory and moves each
/// manager to [`ConfigPhase::Initialized`].
///
/// # Errors
///
/// Returns [`MemoryError::WrongPhase`] when a manager is already initialized and
/// [`MemoryError::MissingBacking`] for any request still unbacked afterwards.
pub fn initialize(spaces: &mut [&mut AddressSpace]) -> Result<(), MemoryError> {
    for space in spaces.iter() {
        let phase = space.manager.borrow().phase();
        if phase != ConfigPhase::Configuring {
            return Err(MemoryError::WrongPhase {
                operation: "initialize",
                phase: phase.label(),
            });
        }
    }
    for space in spaces.iter_mut() {
        space.allocate_memory()?;
    }
    for space in spaces.iter() {
        space.locate_memory()?;
    }
    for space in spaces.iter() {
        let mut manager = space.manager.borrow_mut();
        // entries selected before their memory was configured take effect now
        for bank in manager.banks() {
            if let Some(entry) = bank.entry() {
                bank.set_entry(entry)?;
            }
        }
        manager.mark_initialized();
        log::info!(
            "{}: initialized, {} backing requests",
            space.config.name,
            space.requests.len()
        );
    }
    Ok(())
}
