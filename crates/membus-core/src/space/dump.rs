//! Human-readable listing of a dispatch table.

use std::fmt;

use super::AddressSpace;
use crate::handler::STATIC_COUNT;
use crate::{AccessKind, Offset};

/// One contiguous window of a [`MapDump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDumpEntry {
    /// First byte of the window.
    pub start: Offset,
    /// Last byte of the window.
    pub end: Offset,
    /// Slot the window dispatches to.
    pub entry: u16,
    /// Display name of the slot.
    pub name: String,
    /// Offset the slot sees for `start`.
    pub offset: Offset,
}

impl fmt::Display for MapDumpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}-{:08X}    = {:02X}: {} [offset={:08X}]",
            self.start, self.end, self.entry, self.name, self.offset
        )
    }
}

/// Every window of one table, in address order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDump {
    /// Table the dump was taken from.
    pub kind: AccessKind,
    /// Logical address width of the space.
    pub address_bits: u32,
    /// Data width of the space.
    pub data_bits: u32,
    /// First-level index width.
    pub level1_bits: u32,
    /// Second-level index width, zero for single-level tables.
    pub level2_bits: u32,
    /// Byte mask of the space.
    pub bytemask: Offset,
    /// Windows covering `0..=bytemask`.
    pub entries: Vec<MapDumpEntry>,
}

impl fmt::Display for MapDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Address bits = {}", self.address_bits)?;
        writeln!(f, "     Data bits = {}", self.data_bits)?;
        writeln!(f, "    L1 bits = {}", self.level1_bits)?;
        writeln!(f, "    L2 bits = {}", self.level2_bits)?;
        writeln!(f, "  Address mask = {:X}", self.bytemask)?;
        writeln!(f)?;
        writeln!(f, "{} table:", self.kind.label())?;
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

impl AddressSpace {
    /// Walks the `kind` table and lists each window that dispatches to one slot.
    #[must_use]
    pub fn dump_map(&self, kind: AccessKind) -> MapDump {
        let table = self.table(kind);
        let mut entries: Vec<MapDumpEntry> = Vec::new();
        let mut byteaddress: Offset = 0;
        loop {
            let (entry, start, end) = table.derive_range(byteaddress);
            let start = start.max(byteaddress);
            let end = end.min(self.bytemask);
            let offset = table.slot(entry).byteoffset(start);
            match entries.last_mut() {
                Some(last)
                    if last.entry == entry && last.end + 1 == start && entry < STATIC_COUNT =>
                {
                    last.end = end;
                }
                _ => entries.push(MapDumpEntry {
                    start,
                    end,
                    entry,
                    name: table.handler_name(entry),
                    offset,
                }),
            }
            if end >= self.bytemask {
                break;
            }
            byteaddress = end + 1;
        }
        MapDump {
            kind,
            address_bits: self.config.address_width,
            data_bits: self.config.data_width.bits(),
            level1_bits: table.level1_bits(),
            level2_bits: table.level2_bits(),
            bytemask: self.bytemask,
            entries,
        }
    }
}
