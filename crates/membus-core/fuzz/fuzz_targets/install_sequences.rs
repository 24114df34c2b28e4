#![no_main]

use libfuzzer_sys::fuzz_target;
use membus_core::{
    AccessKind, AccessMode, AddressSpace, DataWidth, Endianness, MemoryManager, ReadDelegate,
    SpaceConfig, Storage,
};

fn word(data: &[u8], at: usize) -> u32 {
    let bytes = [
        data.get(at).copied().unwrap_or(0),
        data.get(at + 1).copied().unwrap_or(0),
        data.get(at + 2).copied().unwrap_or(0),
    ];
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let width = match data[0] & 3 {
        0 => DataWidth::Bits8,
        1 => DataWidth::Bits16,
        2 => DataWidth::Bits32,
        _ => DataWidth::Bits64,
    };
    let endianness = if data[0] & 4 == 0 {
        Endianness::Little
    } else {
        Endianness::Big
    };
    let bits = 12 + u32::from(data[1] % 13);
    let manager = MemoryManager::shared();
    let Ok(mut space) = AddressSpace::new(
        &manager,
        SpaceConfig::new("fuzz", width, bits, endianness),
    ) else {
        return;
    };
    let storage = Storage::zeroed(1 << 16);

    // each op: kind, start(3), end(3), mirror(3)
    for op in data[2..].chunks(10) {
        let start = word(op, 1);
        let end = word(op, 4);
        let mirror = word(op, 7);
        let _ = match op[0] % 5 {
            0 => match storage.at(0) {
                Ok(base) => space
                    .install_ram_backed(start, end, mirror, AccessMode::ReadWrite, base)
                    .map(|_| ()),
                Err(error) => Err(error),
            },
            1 => space.unmap(start, end, mirror, AccessMode::ReadWrite, true),
            2 => space.nop(start, end, mirror, AccessMode::Read),
            3 => space.install_read_handler(
                start,
                end,
                0,
                mirror,
                0,
                ReadDelegate::new("fuzz", DataWidth::Bits8, |offset, _| u64::from(offset)),
                0xFF,
            ),
            _ => space.install_ram(start, end, mirror, AccessMode::Write).map(|_| ()),
        };
        let probe = start ^ mirror;
        let _ = space.read_u64_unaligned(probe);
        space.write_u32_unaligned(probe, 0xA5A5_A5A5);
        let _ = space.direct_read_u16(probe);
    }

    assert!(space.verify_reference_counts().is_ok());
    let _ = space.dump_map(AccessKind::Read);
});
