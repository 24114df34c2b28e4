//! Property coverage for table construction: totality, mirror symmetry, reference counts and
//! tap transparency over arbitrary install sequences.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::cell::Cell;
use std::rc::Rc;

use log as _;
use membus_core::handler::STATIC_INVALID;
use membus_core::{
    initialize, AccessKind, AccessMode, AddressSpace, DataWidth, Endianness, MemoryManager,
    SpaceConfig, Storage, TapAccess, TapHook,
};
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

#[derive(Debug, Clone)]
enum Op {
    Ram(u32, u32),
    Unmap(u32, u32),
    Nop(u32, u32),
}

fn range() -> impl Strategy<Value = (u32, u32)> {
    (0u32..=0xFFFF, 0u32..=0x1FFF).prop_map(|(start, len)| (start, (start + len).min(0xFFFF)))
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => range().prop_map(|(s, e)| Op::Ram(s, e)),
        1 => range().prop_map(|(s, e)| Op::Unmap(s, e)),
        1 => range().prop_map(|(s, e)| Op::Nop(s, e)),
    ]
}

fn pattern(address: u32) -> u8 {
    (address as u8) ^ ((address >> 8) as u8) ^ 0x5A
}

/// Applies `ops` to a fresh 8-bit space whose RAM always maps byte `a` to storage byte `a`, and
/// returns the space plus the expected read model (`None` = unmapped, `Some(None)` = no-op).
fn build(ops: &[Op]) -> (AddressSpace, Vec<Option<Option<u8>>>) {
    let manager = MemoryManager::shared();
    let mut space = AddressSpace::new(
        &manager,
        SpaceConfig::new("program", DataWidth::Bits8, 16, Endianness::Little),
    )
    .expect("space");
    let storage = Storage::from_vec((0..=0xFFFFu32).map(pattern).collect());
    let mut model = vec![None; 0x1_0000];
    for op in ops {
        match *op {
            Op::Ram(start, end) => {
                space
                    .install_ram_backed(
                        start,
                        end,
                        0,
                        AccessMode::ReadWrite,
                        storage.at(start as usize).expect("in bounds"),
                    )
                    .expect("ram");
                for address in start..=end {
                    model[address as usize] = Some(Some(pattern(address)));
                }
            }
            Op::Unmap(start, end) => {
                space
                    .unmap(start, end, 0, AccessMode::ReadWrite, true)
                    .expect("unmap");
                for address in start..=end {
                    model[address as usize] = None;
                }
            }
            Op::Nop(start, end) => {
                space.nop(start, end, 0, AccessMode::ReadWrite).expect("nop");
                for address in start..=end {
                    model[address as usize] = Some(None);
                }
            }
        }
    }
    (space, model)
}

#[derive(Default)]
struct CountingHook {
    reads: Cell<usize>,
}

impl TapHook for CountingHook {
    fn on_access(&self, _space: &AddressSpace, access: TapAccess) {
        if matches!(access, TapAccess::Read { .. }) {
            self.reads.set(self.reads.get() + 1);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_address_resolves_and_counts_stay_exact(ops in prop::collection::vec(op(), 1..24)) {
        let (space, model) = build(&ops);
        for address in (0..=0xFFFFu32).step_by(61).chain([0, 0xFFFF]) {
            prop_assert_ne!(space.lookup(AccessKind::Read, address), STATIC_INVALID);
            prop_assert_ne!(space.lookup(AccessKind::Write, address), STATIC_INVALID);
            let expected = match model[address as usize] {
                Some(Some(value)) => value,
                _ => 0xFF,
            };
            prop_assert_eq!(space.read_u8(address), expected);
        }
        prop_assert!(space.verify_reference_counts().is_ok());
    }

    #[test]
    fn mirrored_copies_share_slot_and_bytes(
        size_log2 in 4u32..11,
        block in 0u32..16,
        mirror_bits in 0u32..16,
        offset in 0u32..0x800,
        value in any::<u8>(),
    ) {
        let size = 1u32 << size_log2;
        let start = (block * size) & 0x0FFF;
        let end = start + size - 1;
        let mirror = mirror_bits << 12;
        let offset = offset & (size - 1);

        let manager = MemoryManager::shared();
        let mut space = AddressSpace::new(
            &manager,
            SpaceConfig::new("program", DataWidth::Bits8, 16, Endianness::Little),
        )
        .expect("space");
        space
            .install_ram(start, end, mirror, AccessMode::ReadWrite)
            .expect("mirrored ram");
        initialize(&mut [&mut space]).expect("initialize");

        let base = start + offset;
        space.write_u8(base, value);
        let slot = space.lookup(AccessKind::Read, base);
        let mut subset = mirror;
        loop {
            let address = base ^ subset;
            prop_assert_eq!(space.lookup(AccessKind::Read, address), slot);
            prop_assert_eq!(space.read_u8(address), value);
            if subset == 0 {
                break;
            }
            subset = (subset - 1) & mirror;
        }
    }

    #[test]
    fn tapping_reads_never_changes_values(
        ops in prop::collection::vec(op(), 1..12),
        addresses in prop::collection::vec(0u32..=0xFFFF, 1..32),
    ) {
        let (mut space, _) = build(&ops);
        let hook = Rc::new(CountingHook::default());
        space.set_tap_hook(Some(hook.clone() as Rc<dyn TapHook>));

        let before: Vec<u8> = addresses.iter().map(|&a| space.read_u8(a)).collect();
        space.enable_tap(AccessKind::Read, true);
        let tapped: Vec<u8> = addresses.iter().map(|&a| space.read_u8(a)).collect();
        prop_assert_eq!(hook.reads.get(), addresses.len());
        space.enable_tap(AccessKind::Read, false);
        let after: Vec<u8> = addresses.iter().map(|&a| space.read_u8(a)).collect();

        prop_assert_eq!(&before, &tapped);
        prop_assert_eq!(&before, &after);
        prop_assert_eq!(hook.reads.get(), addresses.len());
        prop_assert!(!space.is_tapped(AccessKind::Read));
    }
}
