//! End-to-end scenarios: round trips through mirrors, lane stitching, overrides, subtable merges,
//! bank retargeting under the direct-access cache, map population and snapshots.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

use std::cell::RefCell;
use std::rc::Rc;

use log as _;
use membus_core::handler::{STATIC_NOP, STATIC_UNMAP};
use membus_core::{
    initialize, AccessKind, AccessMode, AddressMap, AddressSpace, DataWidth, Endianness,
    ErrorClass, LatchPort, MemoryError, MemoryManager, RangeViolation, ReadDelegate,
    SharedManager, SpaceConfig, Storage, WriteDelegate,
};
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

fn space_with(
    manager: &SharedManager,
    width: DataWidth,
    bits: u32,
    endianness: Endianness,
) -> AddressSpace {
    AddressSpace::new(manager, SpaceConfig::new("program", width, bits, endianness)).expect("space")
}

fn program() -> (SharedManager, AddressSpace) {
    let manager = MemoryManager::shared();
    let space = space_with(&manager, DataWidth::Bits8, 16, Endianness::Little);
    (manager, space)
}

#[test]
fn ram_round_trips_through_every_mirror_copy() {
    let (_manager, mut space) = program();
    space
        .install_ram(0x1000, 0x13FF, 0xEC00, AccessMode::ReadWrite)
        .expect("mirrored ram");
    initialize(&mut [&mut space]).expect("initialize");

    space.write_u8(0x1000, 0xAB);
    assert_eq!(space.read_u8(0x1000), 0xAB);
    for alias in [0x1400, 0x1800, 0x1C00, 0x3000, 0x5000, 0x9000, 0xFC00] {
        assert_eq!(space.read_u8(alias), 0xAB, "alias {alias:#x}");
    }
    assert_eq!(space.read_u8(0x0000), 0xFF);
    assert_eq!(space.read_u8(0x2000), 0xFF);

    space.write_u8(0x5C01, 0xCD);
    assert_eq!(space.read_u8(0x1001), 0xCD);
}

#[test]
fn mirror_overlapping_the_start_is_rejected_with_a_suggestion() {
    let (_manager, mut space) = program();
    let error = space
        .install_ram(0x1000, 0x13FF, 0xFC00, AccessMode::ReadWrite)
        .expect_err("mirror bit 12 is set in start");
    assert!(matches!(
        error,
        MemoryError::InvalidRange {
            violation: RangeViolation::MirrorTouchesSetBit { suggestion: 0xEC00 },
            ..
        }
    ));
    assert_eq!(error.class(), ErrorClass::Configuration);
    assert_eq!(space.lookup(AccessKind::Read, 0x1000), STATIC_UNMAP);
}

#[rstest]
#[case::reversed(0x0200, 0x0100, 0)]
#[case::past_the_mask(0x0000, 0x1_FFFF, 0)]
#[case::mirror_on_changing_bits(0x0000, 0x0FFF, 0x0800)]
#[case::mirror_outside_mask(0x0000, 0x00FF, 0x1_0000)]
fn invalid_ranges_leave_the_space_untouched(
    #[case] start: u32,
    #[case] end: u32,
    #[case] mirror: u32,
) {
    let (_manager, mut space) = program();
    let error = space
        .install_ram(start, end, mirror, AccessMode::ReadWrite)
        .expect_err("invalid range");
    assert!(matches!(error, MemoryError::InvalidRange { .. }), "{error}");
    assert_eq!(space.lookup(AccessKind::Read, 0x0000), STATIC_UNMAP);
    assert_eq!(space.lookup(AccessKind::Write, 0x0100), STATIC_UNMAP);
    assert!(space.backing_requests().is_empty());
}

#[test]
fn later_installs_win_only_on_the_overlap() {
    let (_manager, mut space) = program();
    space.install_ram(0x0000, 0x0FFF, 0, AccessMode::ReadWrite).expect("a");
    let a = space.lookup(AccessKind::Read, 0x0000);
    space.install_ram(0x0800, 0x17FF, 0, AccessMode::ReadWrite).expect("b");
    let b = space.lookup(AccessKind::Read, 0x0800);

    assert_ne!(a, b);
    assert_eq!(space.lookup(AccessKind::Read, 0x07FF), a);
    assert_eq!(space.lookup(AccessKind::Read, 0x0800), b);
    assert_eq!(space.lookup(AccessKind::Read, 0x0FFF), b);
    assert_eq!(space.lookup(AccessKind::Read, 0x17FF), b);
    assert_eq!(space.lookup(AccessKind::Read, 0x1800), STATIC_UNMAP);

    space.nop(0x0000, 0x00FF, 0, AccessMode::Read).expect("nop");
    assert_eq!(space.lookup(AccessKind::Read, 0x0080), STATIC_NOP);
    assert_eq!(space.lookup(AccessKind::Write, 0x0080), a);
    space.verify_reference_counts().expect("counts");
}

#[rstest]
#[case::little(Endianness::Little, 0x11)]
#[case::big(Endianness::Big, 0x12)]
fn narrow_callbacks_see_only_their_lane(#[case] endianness: Endianness, #[case] lane_byte: u32) {
    let manager = MemoryManager::shared();
    let mut space = space_with(&manager, DataWidth::Bits32, 16, endianness);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    space
        .install_write_handler(
            0x0000,
            0x00FF,
            0,
            0,
            0,
            WriteDelegate::new("latch_w", DataWidth::Bits8, move |offset, data, mask| {
                sink.borrow_mut().push((offset, data, mask));
            }),
            0x0000_FF00,
        )
        .expect("write lane");
    space
        .install_read_handler(
            0x0000,
            0x00FF,
            0,
            0,
            0,
            ReadDelegate::new("latch_r", DataWidth::Bits8, |_, _| 0x5A),
            0x0000_FF00,
        )
        .expect("read lane");

    space.write_u32(0x0010, 0x1122_3344);
    assert_eq!(*seen.borrow(), vec![(4, 0x33, 0xFF)]);

    // bytes of untouched lanes are never delivered
    space.write_u8(0x0010, 0x99);
    assert_eq!(seen.borrow().len(), 1);

    assert_eq!(space.read_u32(0x0010), 0xFFFF_5AFF);
    assert_eq!(space.read_u8(lane_byte), 0x5A);
    assert_eq!(space.read_u8(0x0010), 0xFF);
}

#[test]
fn lanes_from_separate_installs_stitch_together() {
    let manager = MemoryManager::shared();
    let mut space = space_with(&manager, DataWidth::Bits16, 16, Endianness::Little);
    space
        .install_read_handler(
            0x0000,
            0x000F,
            0,
            0,
            0,
            ReadDelegate::new("low", DataWidth::Bits8, |offset, _| 0x10 + u64::from(offset)),
            0x00FF,
        )
        .expect("low lane");
    space
        .install_read_handler(
            0x0000,
            0x000F,
            0,
            0,
            0,
            ReadDelegate::new("high", DataWidth::Bits8, |offset, _| 0x80 + u64::from(offset)),
            0xFF00,
        )
        .expect("high lane");
    assert_eq!(space.read_u16(0x0000), 0x8010);
    assert_eq!(space.read_u16(0x0006), 0x8313);
    let entry = space.lookup(AccessKind::Read, 0x0000);
    let name = space.handler_name(AccessKind::Read, entry);
    assert!(name.contains("low") && name.contains("high"), "{name}");
}

fn narrow_nop_block(space: &mut AddressSpace, block: u32) {
    let start = block << 14;
    space
        .nop(start, start + 0xFF, 0, AccessMode::Read)
        .expect("narrow nop");
}

#[test]
fn subtable_merges_do_not_change_lookups() {
    let manager = MemoryManager::shared();
    let mut space = space_with(&manager, DataWidth::Bits8, 24, Endianness::Little);
    space.install_ram(0x00_0000, 0x00_0FFF, 0, AccessMode::ReadWrite).expect("ram");

    // the ram block plus 63 identical nop blocks fill the subtable pool exactly
    for block in 1..64u32 {
        narrow_nop_block(&mut space, block);
    }
    assert_eq!(space.table(AccessKind::Read).live_subtables(), 64);

    let mut sample: Vec<u32> = (0..=0xFF_FFFFu32).step_by(0x3F).collect();
    for block in 0..256u32 {
        let start = block << 14;
        sample.extend([start, start + 0xFF, start + 0x100, start + 0x3FFF]);
    }
    let before: Vec<(u32, u16)> = sample
        .iter()
        .map(|&address| (address, space.lookup(AccessKind::Read, address)))
        .collect();

    // every further block gets the same subtable, so the pool only survives by merging
    for block in 64..160u32 {
        narrow_nop_block(&mut space, block);
    }

    for (address, entry) in before {
        let block = address >> 14;
        let expected = if (64..160).contains(&block) && address & 0x3FFF <= 0xFF {
            STATIC_NOP
        } else {
            entry
        };
        assert_eq!(
            space.lookup(AccessKind::Read, address),
            expected,
            "address {address:#x}"
        );
    }
    assert!(space.table(AccessKind::Read).live_subtables() <= 64);
    space.verify_reference_counts().expect("counts");
}

#[test]
fn slot_pool_exhaustion_is_reported_and_recoverable() {
    let (_manager, mut space) = program();
    let install = |space: &mut AddressSpace, address: u32| {
        space.install_read_handler(
            address,
            address,
            0,
            0,
            0,
            ReadDelegate::new(format!("reg{address}"), DataWidth::Bits8, move |_, _| {
                u64::from(address)
            }),
            0,
        )
    };

    let mut installed = 0u32;
    let error = loop {
        match install(&mut space, installed) {
            Ok(()) => installed += 1,
            Err(error) => break error,
        }
        assert!(installed < 0x1000, "pool never filled");
    };
    assert_eq!(installed, 444);
    assert!(
        matches!(error, MemoryError::SlotPoolExhausted { table: "read" }),
        "{error}"
    );
    assert_eq!(error.class(), ErrorClass::Exhaustion);
    space.verify_reference_counts().expect("counts after failure");
    assert_eq!(space.lookup(AccessKind::Read, installed), STATIC_UNMAP);
    assert_eq!(space.read_u8(443), 443u32 as u8);

    // dropping the only reference to a slot frees it for the next install
    space.nop(0, 0, 0, AccessMode::Read).expect("nop");
    install(&mut space, installed).expect("freed slot is reused");
    assert_eq!(space.read_u8(installed), installed as u8);
    space.verify_reference_counts().expect("counts after reuse");
}

#[test]
fn subtable_exhaustion_is_reported_when_nothing_merges() {
    let manager = MemoryManager::shared();
    let mut space = space_with(&manager, DataWidth::Bits8, 24, Endianness::Little);
    // a nop at a different offset in each block keeps every subtable distinct
    let nop_in_block = |space: &mut AddressSpace, block: u32| {
        let address = (block << 14) + block;
        space.nop(address, address, 0, AccessMode::Read)
    };

    for block in 0..64u32 {
        nop_in_block(&mut space, block).expect("distinct subtable");
    }
    assert_eq!(space.table(AccessKind::Read).live_subtables(), 64);

    let error = nop_in_block(&mut space, 64).expect_err("no subtable left");
    assert!(
        matches!(error, MemoryError::SubtablesExhausted { table: "read" }),
        "{error}"
    );
    assert_eq!(error.class(), ErrorClass::Exhaustion);
    assert_eq!(space.table(AccessKind::Read).live_subtables(), 64);
    space.verify_reference_counts().expect("counts");

    for block in 0..64u32 {
        let address = (block << 14) + block;
        assert_eq!(space.lookup(AccessKind::Read, address), STATIC_NOP);
        assert_eq!(space.lookup(AccessKind::Read, address + 1), STATIC_UNMAP);
    }
    assert_eq!(space.lookup(AccessKind::Read, (64 << 14) + 64), STATIC_UNMAP);

    // whole-block installs need no subtable
    space
        .nop(64 << 14, (65 << 14) - 1, 0, AccessMode::Read)
        .expect("full block");
    assert_eq!(space.lookup(AccessKind::Read, (64 << 14) + 64), STATIC_NOP);
}

#[test]
fn retargeted_banks_are_seen_through_the_direct_cache() {
    let (manager, mut space) = program();
    let bank = space
        .install_bank(0x8000, 0x9FFF, 0, "rombank", AccessMode::Read)
        .expect("bank");
    let storage = Storage::zeroed(0x4000);
    let base = storage.at(0).expect("base");
    base.copy_from(0x0000, &[0x11; 0x2000]).expect("entry 0");
    base.copy_from(0x2000, &[0x22; 0x2000]).expect("entry 1");
    bank.configure_entries(0, 2, &base, 0x2000).expect("entries");

    assert_eq!(space.direct_read_u8(0x8123), 0x11);
    assert!(space.direct_cache().current().is_some());

    manager
        .borrow()
        .bank("rombank")
        .expect("registered")
        .set_entry(1)
        .expect("entry 1");
    assert_eq!(space.direct_read_u8(0x8123), 0x22);
    assert_eq!(space.read_u8(0x9FFF), 0x22);
}

#[test]
fn anonymous_banks_refuse_entry_selection() {
    let (_manager, mut space) = program();
    let bank = space.install_ram(0x0000, 0x00FF, 0, AccessMode::ReadWrite).expect("ram");
    assert!(matches!(bank.set_entry(0), Err(MemoryError::AnonymousBankEntry { .. })));
}

#[test]
fn maps_populate_in_declaration_order() {
    let manager = MemoryManager::shared();
    manager
        .borrow_mut()
        .add_region("maincpu", (0..0x4000u32).map(|i| i as u8).collect());
    let input = Rc::new(LatchPort::new(0x3C));
    manager.borrow_mut().register_port("IN0", input.clone());
    let mut space = space_with(&manager, DataWidth::Bits8, 16, Endianness::Little);

    let mut map = AddressMap::new();
    map.range(0x0000, 0x3FFF).rom().region("maincpu", 0);
    map.range(0x8000, 0x87FF).ram().mirror(0x1800).share("work");
    map.range(0xA000, 0xA000).read_port("IN0").write_port("IN0");
    map.range(0x8000, 0x80FF).nop_write();
    space.populate_from_map(&map).expect("populate");
    initialize(&mut [&mut space]).expect("initialize");

    assert_eq!(space.read_u8(0x0123), 0x23);
    space.write_u8(0x0123, 0x00);
    assert_eq!(space.read_u8(0x0123), 0x23);

    space.write_u8(0x8100, 0x42);
    assert_eq!(space.read_u8(0x9900), 0x42);
    space.write_u8(0x8010, 0x42);
    assert_eq!(space.read_u8(0x8010), 0x00);

    assert_eq!(space.read_u8(0xA000), 0x3C);
    space.write_u8(0xA000, 0x81);
    assert_eq!(input.value(), 0x81);

    let share = manager.borrow().share("work").expect("bound");
    assert_eq!(share.read_byte(0x100), Some(0x42));
}

#[test]
fn map_regions_must_cover_the_range() {
    let manager = MemoryManager::shared();
    manager.borrow_mut().add_region("maincpu", vec![0; 0x100]);
    let mut space = space_with(&manager, DataWidth::Bits8, 16, Endianness::Little);
    let mut map = AddressMap::new();
    map.range(0x0000, 0x3FFF).rom().region("maincpu", 0);
    assert!(matches!(
        space.populate_from_map(&map),
        Err(MemoryError::RegionTooSmall { .. })
    ));
    let mut map = AddressMap::new();
    map.range(0x0000, 0x00FF).rom().region("gfx", 0);
    assert!(matches!(
        space.populate_from_map(&map),
        Err(MemoryError::UnknownRegion { .. })
    ));
}

#[test]
fn snapshots_restore_bank_selections() {
    let (manager, mut space) = program();
    let bank = space
        .install_bank(0x4000, 0x7FFF, 0, "rombank", AccessMode::Read)
        .expect("bank");
    let storage = Storage::zeroed(0x10000);
    let base = storage.at(0).expect("base");
    for entry in 0..4u8 {
        base.copy_from(usize::from(entry) * 0x4000, &[entry; 0x4000])
            .expect("fill");
    }
    bank.configure_entries(0, 4, &base, 0x4000).expect("entries");
    bank.set_entry(2).expect("entry 2");
    let snapshot = manager.borrow().snapshot();

    bank.set_entry(3).expect("entry 3");
    assert_eq!(space.read_u8(0x4000), 3);
    manager.borrow().restore_snapshot(&snapshot).expect("restore");
    assert_eq!(bank.entry(), Some(2));
    assert_eq!(space.read_u8(0x4000), 2);
}

#[test]
fn word_addressed_spaces_scale_ranges() {
    let manager = MemoryManager::shared();
    let mut space = AddressSpace::new(
        &manager,
        SpaceConfig::new("data", DataWidth::Bits16, 16, Endianness::Big).with_address_shift(-1),
    )
    .expect("space");
    space.install_ram(0x0100, 0x01FF, 0, AccessMode::ReadWrite).expect("ram");
    initialize(&mut [&mut space]).expect("initialize");

    space.write_u16(0x0200, 0xBEEF);
    assert_eq!(space.read_u16(0x0200), 0xBEEF);
    assert_eq!(space.read_u8(0x0201), 0xEF);
    assert_eq!(space.read_u16(0x0400), 0xFFFF);
}
