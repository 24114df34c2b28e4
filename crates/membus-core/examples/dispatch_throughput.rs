//! Throughput harness for the access paths.
//!
//! Measures accesses per second through the normal dispatch path, the direct-access cache and the
//! tap proxy on a small 8-bit machine and a 32-bit big-endian bus with a stitched register block.
//!
//! ## Usage
//!
//! ```sh
//! cargo run -p membus-core --release --example dispatch_throughput
//! ```

#![allow(clippy::pedantic)]

use std::hint::black_box;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log as _;
use membus_core::{
    initialize, AccessKind, AccessMode, AddressSpace, DataWidth, Endianness, LatchPort,
    MemoryManager, ReadDelegate, SpaceConfig, TapAccess, TapHook,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const ITERATIONS: u32 = 2_000_000;

struct Passthrough;

impl TapHook for Passthrough {
    fn on_access(&self, _space: &AddressSpace, access: TapAccess) {
        black_box(access);
    }
}

fn report(label: &str, elapsed: Duration) {
    let per_second = f64::from(ITERATIONS) / elapsed.as_secs_f64();
    println!("{label:<28} {:>10.2} M accesses/s", per_second / 1_000_000.0);
}

fn measure(label: &str, mut access: impl FnMut(u32) -> u64) {
    let started = Instant::now();
    let mut sum = 0u64;
    for i in 0..ITERATIONS {
        sum = sum.wrapping_add(access(i));
    }
    black_box(sum);
    report(label, started.elapsed());
}

fn eight_bit_machine() -> AddressSpace {
    let manager = MemoryManager::shared();
    manager
        .borrow_mut()
        .register_port("IN0", Rc::new(LatchPort::new(0x7F)));
    let mut space = AddressSpace::new(
        &manager,
        SpaceConfig::new("program", DataWidth::Bits8, 16, Endianness::Little),
    )
    .expect("space");
    space.install_rom(0x0000, 0x7FFF, 0).expect("rom");
    space
        .install_ram(0x8000, 0x87FF, 0x1800, AccessMode::ReadWrite)
        .expect("ram");
    space
        .install_port(0xC000, 0xC000, 0x0FFF, Some("IN0"), None)
        .expect("port");
    initialize(&mut [&mut space]).expect("initialize");
    space
}

fn wide_bus() -> AddressSpace {
    let manager = MemoryManager::shared();
    let mut space = AddressSpace::new(
        &manager,
        SpaceConfig::new("program", DataWidth::Bits32, 24, Endianness::Big),
    )
    .expect("space");
    space
        .install_ram(0x00_0000, 0x0F_FFFF, 0, AccessMode::ReadWrite)
        .expect("ram");
    space
        .install_read_handler(
            0x80_0000,
            0x80_00FF,
            0,
            0,
            0,
            ReadDelegate::new("status", DataWidth::Bits16, |offset, _| u64::from(offset)),
            0xFFFF_0000,
        )
        .expect("registers");
    initialize(&mut [&mut space]).expect("initialize");
    space
}

fn main() {
    let space = eight_bit_machine();
    measure("8-bit ram read_u8", |i| u64::from(space.read_u8(0x8000 | (i & 0x1FFF))));
    measure("8-bit ram direct_read_u8", |i| {
        u64::from(space.direct_read_u8(0x8000 | (i & 0x07FF)))
    });
    measure("8-bit rom read_u16 (split)", |i| u64::from(space.read_u16(i & 0x7FFF)));
    measure("8-bit port read_u8", |i| u64::from(space.read_u8(0xC000 | (i & 0x0FFF))));
    measure("8-bit ram write_u8", |i| {
        space.write_u8(0x8000 | (i & 0x07FF), i as u8);
        0
    });

    let mut space = space;
    space.set_tap_hook(Some(Rc::new(Passthrough)));
    space.enable_tap(AccessKind::Read, true);
    measure("8-bit tapped read_u8", |i| u64::from(space.read_u8(0x8000 | (i & 0x07FF))));
    space.enable_tap(AccessKind::Read, false);

    let space = wide_bus();
    measure("32-bit be read_u32", |i| u64::from(space.read_u32((i << 2) & 0x0F_FFFC)));
    measure("32-bit be read_u64 (split)", |i| space.read_u64((i << 3) & 0x0F_FFF8));
    measure("32-bit be unaligned read_u32", |i| {
        u64::from(space.read_u32_unaligned(i & 0x0F_FFF0 | 1))
    });
    measure("32-bit stitched read_u16", |i| {
        u64::from(space.read_u16(0x80_0000 | ((i << 2) & 0xFC)))
    });
}
