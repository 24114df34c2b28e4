//! The access hot path.
//!
//! Every typed access is reduced to one or more native-width accesses at unit-aligned byte
//! addresses, each carrying a mask of the bits it wants. Narrow accesses select their lanes with
//! the mask; accesses wider than the bus or straddling a unit boundary are split and recombined in
//! bus byte order.

use super::AddressSpace;
use crate::handler::{CallbackTarget, HandlerKind};
use crate::table::DispatchTable;
use crate::tap::{TapAccess, TapBypass};
use crate::{AccessKind, DataWidth, DirectAccessEntry, Endianness, Offset};

#[inline]
const fn shl(value: u64, bits: u32) -> u64 {
    if bits >= u64::BITS {
        0
    } else {
        value << bits
    }
}

#[inline]
const fn shr(value: u64, bits: u32) -> u64 {
    if bits >= u64::BITS {
        0
    } else {
        value >> bits
    }
}

impl AddressSpace {
    #[inline]
    fn native_offset(&self, table: &DispatchTable, entry: u16, byteaddress: Offset) -> Offset {
        table.slot(entry).byteoffset(byteaddress) >> self.config.data_width.bytes_log2()
    }

    fn report_unmapped(&self, kind: AccessKind, byteaddress: Offset, data: Option<u64>, mask: u64) {
        if !self.log_unmapped.get() {
            return;
        }
        match data {
            Some(data) => log::warn!(
                "{}: unmapped {} of {data:#x} to {byteaddress:#x} & {mask:#x}",
                self.config.name,
                kind.label()
            ),
            None => log::warn!(
                "{}: unmapped {} from {byteaddress:#x} & {mask:#x}",
                self.config.name,
                kind.label()
            ),
        }
    }

    /// One native read at a unit-aligned byte address.
    #[inline]
    pub(super) fn read_native(&self, byteaddress: Offset, mask: u64) -> u64 {
        let byteaddress = byteaddress & self.bytemask;
        let entry = self.read.lookup_live(byteaddress);
        let width = self.config.data_width;
        match self.read.slot(entry).kind() {
            HandlerKind::Bank(bank) => bank
                .read(
                    self.read.slot(entry).byteoffset(byteaddress),
                    width,
                    self.config.endianness,
                )
                .unwrap_or(self.unmap),
            HandlerKind::Callback(CallbackTarget::Read(delegate)) => {
                delegate.call(self.native_offset(&self.read, entry, byteaddress), mask)
            }
            HandlerKind::Callback(CallbackTarget::Stitched(set)) => set.read(
                self.native_offset(&self.read, entry, byteaddress),
                mask,
                self.unmap,
            ),
            HandlerKind::Port(binding) => binding.port().read() & width.mask(),
            HandlerKind::Unmapped => {
                self.report_unmapped(AccessKind::Read, byteaddress, None, mask);
                self.unmap
            }
            HandlerKind::NoOp | HandlerKind::Callback(_) => self.unmap,
            HandlerKind::TapProxy => self.tap_read(byteaddress, mask),
        }
    }

    /// One native write at a unit-aligned byte address.
    #[inline]
    pub(super) fn write_native(&self, byteaddress: Offset, data: u64, mask: u64) {
        let byteaddress = byteaddress & self.bytemask;
        let entry = self.write.lookup_live(byteaddress);
        let width = self.config.data_width;
        let data = data & width.mask();
        let mask = mask & width.mask();
        match self.write.slot(entry).kind() {
            HandlerKind::Bank(bank) => {
                bank.write(
                    self.write.slot(entry).byteoffset(byteaddress),
                    width,
                    self.config.endianness,
                    data,
                    mask,
                );
            }
            HandlerKind::Callback(CallbackTarget::Write(delegate)) => {
                delegate.call(self.native_offset(&self.write, entry, byteaddress), data, mask);
            }
            HandlerKind::Callback(CallbackTarget::Stitched(set)) => {
                set.write(self.native_offset(&self.write, entry, byteaddress), data, mask);
            }
            HandlerKind::Port(binding) => binding.port().write(data, mask),
            HandlerKind::Unmapped => {
                self.report_unmapped(AccessKind::Write, byteaddress, Some(data), mask);
            }
            HandlerKind::NoOp | HandlerKind::Callback(_) => {}
            HandlerKind::TapProxy => self.tap_write(byteaddress, data, mask),
        }
    }

    fn tap_read(&self, byteaddress: Offset, mask: u64) -> u64 {
        if let Some(hook) = &self.tap_hook {
            hook.on_access(
                self,
                TapAccess::Read {
                    address: byteaddress,
                    mask,
                },
            );
        }
        let _bypass = TapBypass::engage(&self.read);
        self.read_native(byteaddress, mask)
    }

    fn tap_write(&self, byteaddress: Offset, data: u64, mask: u64) {
        if let Some(hook) = &self.tap_hook {
            hook.on_access(
                self,
                TapAccess::Write {
                    address: byteaddress,
                    data,
                    mask,
                },
            );
        }
        let _bypass = TapBypass::engage(&self.write);
        self.write_native(byteaddress, data, mask);
    }

    fn tap_set_address(&self, byteaddress: Offset) {
        if let Some(hook) = &self.tap_hook {
            hook.on_access(
                self,
                TapAccess::SetAddress {
                    address: byteaddress,
                },
            );
        }
        let _bypass = TapBypass::engage(&self.set_address);
        self.set_address_native(byteaddress);
    }

    fn set_address_native(&self, byteaddress: Offset) {
        let byteaddress = byteaddress & self.bytemask;
        let entry = self.set_address.lookup_live(byteaddress);
        match self.set_address.slot(entry).kind() {
            HandlerKind::Callback(CallbackTarget::SetAddress(delegate)) => {
                delegate.call(self.native_offset(&self.set_address, entry, byteaddress));
            }
            HandlerKind::TapProxy => self.tap_set_address(byteaddress),
            _ => {}
        }
    }

    /// Reads `target` bits at `address`, split into native accesses.
    ///
    /// Aligned accesses ignore address bits below the smaller of the target and native sizes.
    #[allow(clippy::too_many_lines)]
    fn read_split(&self, address: Offset, target: DataWidth, mask: u64, aligned: bool) -> u64 {
        let native = self.config.data_width;
        let big = self.config.endianness == Endianness::Big;
        let (native_bytes, native_bits, native_mask) =
            (native.bytes(), native.bits(), native.mask());
        let (target_bytes, target_bits, target_mask) =
            (target.bytes(), target.bits(), target.mask());
        let mask = mask & target_mask;
        let unit_mask = native_bytes - 1;

        if native_bytes == target_bytes && (aligned || address & unit_mask == 0) {
            return self.read_native(address & !unit_mask, mask);
        }

        if native_bytes > target_bytes {
            let step = if aligned { target_bytes } else { 1 };
            let mut offsbits = 8 * (address & (native_bytes - step));
            if aligned || offsbits + target_bits <= native_bits {
                if big {
                    offsbits = native_bits - target_bits - offsbits;
                }
                let value =
                    self.read_native(address & !unit_mask, shl(mask, offsbits) & native_mask);
                return shr(value, offsbits) & target_mask;
            }
        }

        let mut offsbits = 8 * (address & unit_mask);
        let mut address = address & !unit_mask;

        if native_bytes >= target_bytes {
            // exactly two native accesses
            if big {
                let justify = native_bits - target_bits;
                let ljmask = shl(mask, justify) & native_mask;
                let mut result = 0;
                let mut curmask = shr(ljmask, offsbits);
                if curmask != 0 {
                    result = shl(self.read_native(address, curmask), offsbits) & native_mask;
                }
                offsbits = native_bits - offsbits;
                curmask = shl(ljmask, offsbits) & native_mask;
                if curmask != 0 {
                    result |= shr(
                        self.read_native(address.wrapping_add(native_bytes), curmask),
                        offsbits,
                    );
                }
                return shr(result, justify) & target_mask;
            }
            let mut result = 0;
            let mut curmask = shl(mask, offsbits) & native_mask;
            if curmask != 0 {
                result = shr(self.read_native(address, curmask), offsbits);
            }
            offsbits = native_bits - offsbits;
            curmask = shr(mask, offsbits) & native_mask;
            if curmask != 0 {
                result |= shl(
                    self.read_native(address.wrapping_add(native_bytes), curmask),
                    offsbits,
                );
            }
            return result & target_mask;
        }

        // target wider than the bus: one access per native unit, plus one when misaligned
        let middle = target_bytes / native_bytes - 1;
        let mut result = 0;
        if big {
            offsbits = target_bits - (native_bits - offsbits);
            let mut curmask = shr(mask, offsbits) & native_mask;
            if curmask != 0 {
                result = shl(self.read_native(address, curmask), offsbits);
            }
            for _ in 0..middle {
                offsbits -= native_bits;
                address = address.wrapping_add(native_bytes);
                curmask = shr(mask, offsbits) & native_mask;
                if curmask != 0 {
                    result |= shl(self.read_native(address, curmask), offsbits);
                }
            }
            if !aligned && offsbits != 0 {
                offsbits = native_bits - offsbits;
                curmask = shl(mask, offsbits) & native_mask;
                if curmask != 0 {
                    result |= shr(
                        self.read_native(address.wrapping_add(native_bytes), curmask),
                        offsbits,
                    );
                }
            }
        } else {
            let mut curmask = shl(mask, offsbits) & native_mask;
            if curmask != 0 {
                result = shr(self.read_native(address, curmask), offsbits);
            }
            offsbits = native_bits - offsbits;
            for _ in 0..middle {
                address = address.wrapping_add(native_bytes);
                curmask = shr(mask, offsbits) & native_mask;
                if curmask != 0 {
                    result |= shl(self.read_native(address, curmask), offsbits);
                }
                offsbits += native_bits;
            }
            if !aligned && offsbits < target_bits {
                curmask = shr(mask, offsbits) & native_mask;
                if curmask != 0 {
                    result |= shl(
                        self.read_native(address.wrapping_add(native_bytes), curmask),
                        offsbits,
                    );
                }
            }
        }
        result & target_mask
    }

    /// Writes `target` bits at `address`, split into native accesses.
    #[allow(clippy::too_many_lines)]
    fn write_split(&self, address: Offset, target: DataWidth, data: u64, mask: u64, aligned: bool) {
        let native = self.config.data_width;
        let big = self.config.endianness == Endianness::Big;
        let (native_bytes, native_bits, native_mask) =
            (native.bytes(), native.bits(), native.mask());
        let (target_bytes, target_bits, target_mask) =
            (target.bytes(), target.bits(), target.mask());
        let data = data & target_mask;
        let mask = mask & target_mask;
        let unit_mask = native_bytes - 1;

        if native_bytes == target_bytes && (aligned || address & unit_mask == 0) {
            self.write_native(address & !unit_mask, data, mask);
            return;
        }

        if native_bytes > target_bytes {
            let step = if aligned { target_bytes } else { 1 };
            let mut offsbits = 8 * (address & (native_bytes - step));
            if aligned || offsbits + target_bits <= native_bits {
                if big {
                    offsbits = native_bits - target_bits - offsbits;
                }
                self.write_native(
                    address & !unit_mask,
                    shl(data, offsbits) & native_mask,
                    shl(mask, offsbits) & native_mask,
                );
                return;
            }
        }

        let mut offsbits = 8 * (address & unit_mask);
        let mut address = address & !unit_mask;

        if native_bytes >= target_bytes {
            if big {
                let justify = native_bits - target_bits;
                let ljdata = shl(data, justify) & native_mask;
                let ljmask = shl(mask, justify) & native_mask;
                let mut curmask = shr(ljmask, offsbits);
                if curmask != 0 {
                    self.write_native(address, shr(ljdata, offsbits), curmask);
                }
                offsbits = native_bits - offsbits;
                curmask = shl(ljmask, offsbits) & native_mask;
                if curmask != 0 {
                    self.write_native(
                        address.wrapping_add(native_bytes),
                        shl(ljdata, offsbits) & native_mask,
                        curmask,
                    );
                }
            } else {
                let mut curmask = shl(mask, offsbits) & native_mask;
                if curmask != 0 {
                    self.write_native(address, shl(data, offsbits) & native_mask, curmask);
                }
                offsbits = native_bits - offsbits;
                curmask = shr(mask, offsbits) & native_mask;
                if curmask != 0 {
                    self.write_native(
                        address.wrapping_add(native_bytes),
                        shr(data, offsbits),
                        curmask,
                    );
                }
            }
            return;
        }

        let middle = target_bytes / native_bytes - 1;
        if big {
            offsbits = target_bits - (native_bits - offsbits);
            let mut curmask = shr(mask, offsbits) & native_mask;
            if curmask != 0 {
                self.write_native(address, shr(data, offsbits), curmask);
            }
            for _ in 0..middle {
                offsbits -= native_bits;
                address = address.wrapping_add(native_bytes);
                curmask = shr(mask, offsbits) & native_mask;
                if curmask != 0 {
                    self.write_native(address, shr(data, offsbits), curmask);
                }
            }
            if !aligned && offsbits != 0 {
                offsbits = native_bits - offsbits;
                curmask = shl(mask, offsbits) & native_mask;
                if curmask != 0 {
                    self.write_native(
                        address.wrapping_add(native_bytes),
                        shl(data, offsbits) & native_mask,
                        curmask,
                    );
                }
            }
        } else {
            let mut curmask = shl(mask, offsbits) & native_mask;
            if curmask != 0 {
                self.write_native(address, shl(data, offsbits) & native_mask, curmask);
            }
            offsbits = native_bits - offsbits;
            for _ in 0..middle {
                address = address.wrapping_add(native_bytes);
                curmask = shr(mask, offsbits) & native_mask;
                if curmask != 0 {
                    self.write_native(address, shr(data, offsbits), curmask);
                }
                offsbits += native_bits;
            }
            if !aligned && offsbits < target_bits {
                curmask = shr(mask, offsbits) & native_mask;
                if curmask != 0 {
                    self.write_native(
                        address.wrapping_add(native_bytes),
                        shr(data, offsbits),
                        curmask,
                    );
                }
            }
        }
    }

    /// Reads `width` bits at byte address `address` under `mask`.
    #[must_use]
    pub fn read(&self, address: Offset, width: DataWidth, mask: u64) -> u64 {
        self.read_split(address, width, mask, true)
    }

    /// Like [`Self::read`], honouring every address bit.
    #[must_use]
    pub fn read_unaligned(&self, address: Offset, width: DataWidth, mask: u64) -> u64 {
        self.read_split(address, width, mask, false)
    }

    /// Writes `width` bits at byte address `address` under `mask`.
    pub fn write(&self, address: Offset, width: DataWidth, data: u64, mask: u64) {
        self.write_split(address, width, data, mask, true);
    }

    /// Like [`Self::write`], honouring every address bit.
    pub fn write_unaligned(&self, address: Offset, width: DataWidth, data: u64, mask: u64) {
        self.write_split(address, width, data, mask, false);
    }

    /// Reads a byte.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u8(&self, address: Offset) -> u8 {
        self.read(address, DataWidth::Bits8, u64::MAX) as u8
    }

    /// Reads an aligned 16-bit value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u16(&self, address: Offset) -> u16 {
        self.read(address, DataWidth::Bits16, u64::MAX) as u16
    }

    /// Reads an aligned 16-bit value under `mask`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u16_masked(&self, address: Offset, mask: u16) -> u16 {
        self.read(address, DataWidth::Bits16, u64::from(mask)) as u16
    }

    /// Reads a 16-bit value at any byte address.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u16_unaligned(&self, address: Offset) -> u16 {
        self.read_unaligned(address, DataWidth::Bits16, u64::MAX) as u16
    }

    /// Reads an aligned 32-bit value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u32(&self, address: Offset) -> u32 {
        self.read(address, DataWidth::Bits32, u64::MAX) as u32
    }

    /// Reads an aligned 32-bit value under `mask`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u32_masked(&self, address: Offset, mask: u32) -> u32 {
        self.read(address, DataWidth::Bits32, u64::from(mask)) as u32
    }

    /// Reads a 32-bit value at any byte address.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u32_unaligned(&self, address: Offset) -> u32 {
        self.read_unaligned(address, DataWidth::Bits32, u64::MAX) as u32
    }

    /// Reads an aligned 64-bit value.
    #[must_use]
    pub fn read_u64(&self, address: Offset) -> u64 {
        self.read(address, DataWidth::Bits64, u64::MAX)
    }

    /// Reads an aligned 64-bit value under `mask`.
    #[must_use]
    pub fn read_u64_masked(&self, address: Offset, mask: u64) -> u64 {
        self.read(address, DataWidth::Bits64, mask)
    }

    /// Reads a 64-bit value at any byte address.
    #[must_use]
    pub fn read_u64_unaligned(&self, address: Offset) -> u64 {
        self.read_unaligned(address, DataWidth::Bits64, u64::MAX)
    }

    /// Writes a byte.
    pub fn write_u8(&self, address: Offset, data: u8) {
        self.write(address, DataWidth::Bits8, u64::from(data), u64::MAX);
    }

    /// Writes an aligned 16-bit value.
    pub fn write_u16(&self, address: Offset, data: u16) {
        self.write(address, DataWidth::Bits16, u64::from(data), u64::MAX);
    }

    /// Writes the bits of an aligned 16-bit value selected by `mask`.
    pub fn write_u16_masked(&self, address: Offset, data: u16, mask: u16) {
        self.write(address, DataWidth::Bits16, u64::from(data), u64::from(mask));
    }

    /// Writes a 16-bit value at any byte address.
    pub fn write_u16_unaligned(&self, address: Offset, data: u16) {
        self.write_unaligned(address, DataWidth::Bits16, u64::from(data), u64::MAX);
    }

    /// Writes an aligned 32-bit value.
    pub fn write_u32(&self, address: Offset, data: u32) {
        self.write(address, DataWidth::Bits32, u64::from(data), u64::MAX);
    }

    /// Writes the bits of an aligned 32-bit value selected by `mask`.
    pub fn write_u32_masked(&self, address: Offset, data: u32, mask: u32) {
        self.write(address, DataWidth::Bits32, u64::from(data), u64::from(mask));
    }

    /// Writes a 32-bit value at any byte address.
    pub fn write_u32_unaligned(&self, address: Offset, data: u32) {
        self.write_unaligned(address, DataWidth::Bits32, u64::from(data), u64::MAX);
    }

    /// Writes an aligned 64-bit value.
    pub fn write_u64(&self, address: Offset, data: u64) {
        self.write(address, DataWidth::Bits64, data, u64::MAX);
    }

    /// Writes the bits of an aligned 64-bit value selected by `mask`.
    pub fn write_u64_masked(&self, address: Offset, data: u64, mask: u64) {
        self.write(address, DataWidth::Bits64, data, mask);
    }

    /// Writes a 64-bit value at any byte address.
    pub fn write_u64_unaligned(&self, address: Offset, data: u64) {
        self.write_unaligned(address, DataWidth::Bits64, data, u64::MAX);
    }

    /// Announces `address` to the set-address handler covering it, if any.
    pub fn set_address(&self, address: Offset) {
        let unit_mask = self.config.data_width.bytes() - 1;
        self.set_address_native(address & !unit_mask);
    }

    /// Resolves the window around `byteaddress` and makes it the live direct-access entry.
    /// Returns `false` when the address is not backed by bank memory.
    fn refresh_direct(&self, byteaddress: Offset) -> bool {
        let entry = self.read.lookup(byteaddress);
        let slot = self.read.slot(entry);
        let base = match slot.kind() {
            HandlerKind::Bank(bank) => bank.base(),
            _ => None,
        };
        let Some(base) = base else {
            self.cache.set_current(None);
            return false;
        };
        let (start, end) = self
            .cache
            .find_range(entry, byteaddress)
            .unwrap_or_else(|| {
                let (_, start, end) = self.read.derive_range(byteaddress);
                self.cache.record_range(entry, start, end);
                (start, end)
            });
        self.cache.set_current(Some(DirectAccessEntry::new(
            entry,
            start,
            end,
            base,
            slot.bytestart(),
            slot.bytemask(),
        )));
        true
    }

    fn direct_read(&self, address: Offset, width: DataWidth) -> u64 {
        if self.read.is_tapped() {
            return self.read(address, width, u64::MAX);
        }
        let step = width.bytes().min(self.config.data_width.bytes());
        let byteaddress = address & !(step - 1) & self.bytemask;
        let endianness = self.config.endianness;
        if let Some(value) = self.cache.read(byteaddress, width, endianness) {
            return value;
        }
        if self.refresh_direct(byteaddress) {
            if let Some(value) = self.cache.read(byteaddress, width, endianness) {
                return value;
            }
        }
        self.read(address, width, u64::MAX)
    }

    /// Reads a byte through the direct-access cache.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn direct_read_u8(&self, address: Offset) -> u8 {
        self.direct_read(address, DataWidth::Bits8) as u8
    }

    /// Reads an aligned 16-bit value through the direct-access cache.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn direct_read_u16(&self, address: Offset) -> u16 {
        self.direct_read(address, DataWidth::Bits16) as u16
    }

    /// Reads an aligned 32-bit value through the direct-access cache.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn direct_read_u32(&self, address: Offset) -> u32 {
        self.direct_read(address, DataWidth::Bits32) as u32
    }

    /// Reads an aligned 64-bit value through the direct-access cache.
    #[must_use]
    pub fn direct_read_u64(&self, address: Offset) -> u64 {
        self.direct_read(address, DataWidth::Bits64)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::{
        AccessMode, AddressSpace, DataWidth, Endianness, MemoryManager, SpaceConfig, Storage,
    };

    fn ram_space(width: DataWidth, endianness: Endianness) -> (AddressSpace, Storage) {
        let manager = MemoryManager::shared();
        let mut space =
            AddressSpace::new(&manager, SpaceConfig::new("program", width, 16, endianness))
                .expect("space");
        let storage = Storage::zeroed(0x1_0000);
        space
            .install_ram_backed(
                0,
                0xFFFF,
                0,
                AccessMode::ReadWrite,
                storage.at(0).expect("pointer"),
            )
            .expect("install");
        (space, storage)
    }

    #[rstest]
    #[case(DataWidth::Bits8, Endianness::Little)]
    #[case(DataWidth::Bits16, Endianness::Little)]
    #[case(DataWidth::Bits32, Endianness::Little)]
    #[case(DataWidth::Bits64, Endianness::Little)]
    #[case(DataWidth::Bits8, Endianness::Big)]
    #[case(DataWidth::Bits16, Endianness::Big)]
    #[case(DataWidth::Bits32, Endianness::Big)]
    #[case(DataWidth::Bits64, Endianness::Big)]
    fn storage_holds_values_in_bus_byte_order(
        #[case] width: DataWidth,
        #[case] endianness: Endianness,
    ) {
        let (space, storage) = ram_space(width, endianness);
        space.write_u32(0x100, 0x1122_3344);
        let bytes = storage.to_vec();
        let expected = match endianness {
            Endianness::Little => [0x44, 0x33, 0x22, 0x11],
            Endianness::Big => [0x11, 0x22, 0x33, 0x44],
        };
        assert_eq!(bytes[0x100..0x104], expected);
        assert_eq!(space.read_u32(0x100), 0x1122_3344);
        assert_eq!(space.read_u8(0x100), expected[0]);
        assert_eq!(space.direct_read_u32(0x100), 0x1122_3344);
    }

    #[rstest]
    #[case(DataWidth::Bits16, Endianness::Little)]
    #[case(DataWidth::Bits16, Endianness::Big)]
    #[case(DataWidth::Bits32, Endianness::Little)]
    #[case(DataWidth::Bits32, Endianness::Big)]
    fn unaligned_accesses_straddle_units(
        #[case] width: DataWidth,
        #[case] endianness: Endianness,
    ) {
        let (space, storage) = ram_space(width, endianness);
        space.write_u32_unaligned(0x203, 0xA1B2_C3D4);
        let expected = match endianness {
            Endianness::Little => [0xD4, 0xC3, 0xB2, 0xA1],
            Endianness::Big => [0xA1, 0xB2, 0xC3, 0xD4],
        };
        assert_eq!(storage.to_vec()[0x203..0x207], expected);
        assert_eq!(space.read_u32_unaligned(0x203), 0xA1B2_C3D4);
        assert_eq!(space.read_u16_unaligned(0x205), match endianness {
            Endianness::Little => 0xA1B2,
            Endianness::Big => 0xC3D4,
        });
    }

    #[test]
    fn masked_writes_only_touch_selected_bytes() {
        let (space, storage) = ram_space(DataWidth::Bits32, Endianness::Little);
        space.write_u32(0x10, 0xFFFF_FFFF);
        space.write_u32_masked(0x10, 0x1234_5678, 0x00FF_0000);
        assert_eq!(space.read_u32(0x10), 0xFF34_FFFF);
        assert_eq!(storage.to_vec()[0x12], 0x34);
    }

    #[test]
    fn wide_reads_on_a_narrow_bus_combine_units() {
        let (space, _) = ram_space(DataWidth::Bits8, Endianness::Big);
        space.write_u64(0x40, 0x0102_0304_0506_0708);
        assert_eq!(space.read_u8(0x40), 0x01);
        assert_eq!(space.read_u16(0x46), 0x0708);
        assert_eq!(space.read_u64(0x40), 0x0102_0304_0506_0708);
    }

    #[test]
    fn aligned_narrow_reads_ignore_low_bits() {
        let (space, _) = ram_space(DataWidth::Bits32, Endianness::Little);
        space.write_u32(0x20, 0xAABB_CCDD);
        assert_eq!(space.read_u16(0x21), 0xCCDD);
        assert_eq!(space.read_u16(0x23), 0xAABB);
    }

    #[test]
    fn direct_reads_fall_back_outside_bank_memory() {
        let manager = MemoryManager::shared();
        let mut space = AddressSpace::new(
            &manager,
            SpaceConfig::new("program", DataWidth::Bits8, 16, Endianness::Little)
                .with_unmap_value(0x5A),
        )
        .expect("space");
        assert_eq!(space.direct_read_u8(0x8000), 0x5A);
        let storage = Storage::from_vec(vec![7; 0x100]);
        space
            .install_ram_backed(0x8000, 0x80FF, 0, AccessMode::Read, storage.at(0).expect("ptr"))
            .expect("install");
        assert_eq!(space.direct_read_u8(0x8010), 7);
        let live = space.direct_cache().current().expect("window cached");
        assert_eq!((live.valid_start, live.valid_end), (0x8000, 0x80FF));
        assert_eq!(space.direct_read_u16(0x80FF), 0x5A07);
    }
}
