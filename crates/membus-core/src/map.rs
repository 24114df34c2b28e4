//! Declarative address maps.
//!
//! An [`AddressMap`] lists ranges in declaration order; [`AddressSpace::populate_from_map`]
//! installs them one after another, so a later entry overrides an earlier one wherever they
//! overlap.
//!
//! [`AddressSpace::populate_from_map`]: crate::AddressSpace::populate_from_map

use crate::{Offset, ReadDelegate, SetAddressDelegate, WriteDelegate};

/// What one direction of a map entry dispatches to.
#[derive(Debug, Clone)]
pub enum MapHandler<D> {
    /// Leave the direction untouched.
    None,
    /// Bank-backed memory.
    Ram,
    /// Bank-backed memory; the write side becomes a silent unmap.
    Rom,
    /// The unmapped static slot.
    Unmapped,
    /// The no-op static slot.
    NoOp,
    /// Named bank.
    Bank(String),
    /// Named port.
    Port(String),
    /// Callback.
    Callback(D),
}

/// One range of an [`AddressMap`]. Fields hold what the chained setters configured.
#[derive(Debug, Clone)]
pub struct MapEntry {
    /// First logical address.
    pub start: Offset,
    /// Last logical address.
    pub end: Offset,
    /// Address mask; zero means the changing bits of the range.
    pub mask: Offset,
    /// Mirror bits.
    pub mirror: Offset,
    /// Select bits.
    pub select: Offset,
    /// Lanes a narrower callback occupies; zero means every lane.
    pub unit_mask: u64,
    /// Read side.
    pub read: MapHandler<ReadDelegate>,
    /// Write side.
    pub write: MapHandler<WriteDelegate>,
    /// Set-address callback.
    pub set_address: Option<SetAddressDelegate>,
    /// Share the memory binds to.
    pub share: Option<String>,
    /// Region and byte offset backing the memory.
    pub region: Option<(String, usize)>,
}

impl MapEntry {
    const fn new(start: Offset, end: Offset) -> Self {
        Self {
            start,
            end,
            mask: 0,
            mirror: 0,
            select: 0,
            unit_mask: 0,
            read: MapHandler::None,
            write: MapHandler::None,
            set_address: None,
            share: None,
            region: None,
        }
    }

    /// Sets the address mask.
    pub fn mask(&mut self, mask: Offset) -> &mut Self {
        self.mask = mask;
        self
    }

    /// Sets the mirror bits.
    pub fn mirror(&mut self, mirror: Offset) -> &mut Self {
        self.mirror = mirror;
        self
    }

    /// Sets the select bits.
    pub fn select(&mut self, select: Offset) -> &mut Self {
        self.select = select;
        self
    }

    /// Restricts callbacks to the lanes in `unit_mask`.
    pub fn unit_mask(&mut self, unit_mask: u64) -> &mut Self {
        self.unit_mask = unit_mask;
        self
    }

    /// Read/write memory.
    pub fn ram(&mut self) -> &mut Self {
        self.read = MapHandler::Ram;
        self.write = MapHandler::Ram;
        self
    }

    /// Read-only memory; writes are dropped.
    pub fn rom(&mut self) -> &mut Self {
        self.read = MapHandler::Rom;
        self.write = MapHandler::Rom;
        self
    }

    /// Memory on the read side only.
    pub fn readonly(&mut self) -> &mut Self {
        self.read = MapHandler::Ram;
        self
    }

    /// Memory on the write side only.
    pub fn writeonly(&mut self) -> &mut Self {
        self.write = MapHandler::Ram;
        self
    }

    /// Binds the memory to share `name`.
    pub fn share(&mut self, name: impl Into<String>) -> &mut Self {
        self.share = Some(name.into());
        self
    }

    /// Backs the memory with region `name`, starting `offset` bytes in.
    pub fn region(&mut self, name: impl Into<String>, offset: usize) -> &mut Self {
        self.region = Some((name.into(), offset));
        self
    }

    /// Reads from bank `tag`.
    pub fn read_bank(&mut self, tag: impl Into<String>) -> &mut Self {
        self.read = MapHandler::Bank(tag.into());
        self
    }

    /// Writes to bank `tag`.
    pub fn write_bank(&mut self, tag: impl Into<String>) -> &mut Self {
        self.write = MapHandler::Bank(tag.into());
        self
    }

    /// Reads and writes bank `tag`.
    pub fn bank(&mut self, tag: impl Into<String>) -> &mut Self {
        let tag = tag.into();
        self.read = MapHandler::Bank(tag.clone());
        self.write = MapHandler::Bank(tag);
        self
    }

    /// Reads from port `name`.
    pub fn read_port(&mut self, name: impl Into<String>) -> &mut Self {
        self.read = MapHandler::Port(name.into());
        self
    }

    /// Writes to port `name`.
    pub fn write_port(&mut self, name: impl Into<String>) -> &mut Self {
        self.write = MapHandler::Port(name.into());
        self
    }

    /// Silently ignores reads.
    pub fn nop_read(&mut self) -> &mut Self {
        self.read = MapHandler::NoOp;
        self
    }

    /// Silently ignores writes.
    pub fn nop_write(&mut self) -> &mut Self {
        self.write = MapHandler::NoOp;
        self
    }

    /// Silently ignores both directions.
    pub fn nop(&mut self) -> &mut Self {
        self.nop_read().nop_write()
    }

    /// Explicitly unmaps reads.
    pub fn unmap_read(&mut self) -> &mut Self {
        self.read = MapHandler::Unmapped;
        self
    }

    /// Explicitly unmaps writes.
    pub fn unmap_write(&mut self) -> &mut Self {
        self.write = MapHandler::Unmapped;
        self
    }

    /// Explicitly unmaps both directions.
    pub fn unmap(&mut self) -> &mut Self {
        self.unmap_read().unmap_write()
    }

    /// Routes reads to `delegate`.
    pub fn read_callback(&mut self, delegate: ReadDelegate) -> &mut Self {
        self.read = MapHandler::Callback(delegate);
        self
    }

    /// Routes writes to `delegate`.
    pub fn write_callback(&mut self, delegate: WriteDelegate) -> &mut Self {
        self.write = MapHandler::Callback(delegate);
        self
    }

    /// Routes address notifications to `delegate`.
    pub fn set_address(&mut self, delegate: SetAddressDelegate) -> &mut Self {
        self.set_address = Some(delegate);
        self
    }
}

/// Ordered list of map entries.
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    entries: Vec<MapEntry>,
}

impl AddressMap {
    /// An empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry for `start..=end` and returns it for configuration.
    pub fn range(&mut self, start: Offset, end: Offset) -> &mut MapEntry {
        self.entries.push(MapEntry::new(start, end));
        let index = self.entries.len() - 1;
        &mut self.entries[index]
    }

    /// Entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entry was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds a map from plain-data descriptors.
    #[must_use]
    pub fn from_descriptors(descriptors: &[RangeDescriptor]) -> Self {
        let mut map = Self::new();
        for descriptor in descriptors {
            let entry = map.range(descriptor.start, descriptor.end);
            entry
                .mask(descriptor.mask)
                .mirror(descriptor.mirror)
                .select(descriptor.select);
            entry.read = descriptor.read.handler();
            entry.write = descriptor.write.handler();
            entry.share.clone_from(&descriptor.share);
            if let Some(region) = &descriptor.region {
                entry.region(region.clone(), descriptor.region_offset);
            }
        }
        map
    }
}

/// Data-only handler choice for one direction of a [`RangeDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RangeKind {
    /// Untouched.
    #[default]
    None,
    /// Memory.
    Ram,
    /// Read-only memory.
    Rom,
    /// Unmapped.
    Unmapped,
    /// No-op.
    NoOp,
    /// Named bank.
    Bank(String),
    /// Named port.
    Port(String),
}

impl RangeKind {
    fn handler<D>(&self) -> MapHandler<D> {
        match self {
            Self::None => MapHandler::None,
            Self::Ram => MapHandler::Ram,
            Self::Rom => MapHandler::Rom,
            Self::Unmapped => MapHandler::Unmapped,
            Self::NoOp => MapHandler::NoOp,
            Self::Bank(tag) => MapHandler::Bank(tag.clone()),
            Self::Port(name) => MapHandler::Port(name.clone()),
        }
    }
}

/// Plain-data form of a map entry, as loaded from configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RangeDescriptor {
    /// First logical address.
    pub start: Offset,
    /// Last logical address.
    pub end: Offset,
    /// Address mask.
    pub mask: Offset,
    /// Mirror bits.
    pub mirror: Offset,
    /// Select bits.
    pub select: Offset,
    /// Read side.
    pub read: RangeKind,
    /// Write side.
    pub write: RangeKind,
    /// Share the memory binds to.
    pub share: Option<String>,
    /// Region backing the memory.
    pub region: Option<String>,
    /// Byte offset into `region`.
    pub region_offset: usize,
}
