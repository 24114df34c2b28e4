//! Callable targets a handler slot can forward to.
//!
//! Delegates are named closures. The name shows up in dumps and diagnostics; the width tells the
//! installer whether the callback speaks the bus width directly or needs subunit stitching.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::{DataWidth, Offset};

type ReadFn = dyn Fn(Offset, u64) -> u64;
type WriteFn = dyn Fn(Offset, u64, u64);
type SetAddressFn = dyn Fn(Offset);

/// Read callback: `(offset, mem_mask) -> value`.
///
/// `offset` counts units of the delegate's own width from the start of its installed range.
#[derive(Clone)]
pub struct ReadDelegate {
    name: Rc<str>,
    width: DataWidth,
    func: Rc<ReadFn>,
}

impl ReadDelegate {
    /// Wraps a closure.
    pub fn new(
        name: impl Into<Rc<str>>,
        width: DataWidth,
        func: impl Fn(Offset, u64) -> u64 + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            func: Rc::new(func),
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width the closure speaks.
    #[must_use]
    pub const fn width(&self) -> DataWidth {
        self.width
    }

    /// Invokes the closure; the result is clipped to the delegate width.
    #[must_use]
    pub fn call(&self, offset: Offset, mask: u64) -> u64 {
        (self.func)(offset, mask & self.width.mask()) & self.width.mask()
    }
}

impl fmt::Debug for ReadDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadDelegate")
            .field("name", &self.name)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

/// Write callback: `(offset, data, mem_mask)`.
#[derive(Clone)]
pub struct WriteDelegate {
    name: Rc<str>,
    width: DataWidth,
    func: Rc<WriteFn>,
}

impl WriteDelegate {
    /// Wraps a closure.
    pub fn new(
        name: impl Into<Rc<str>>,
        width: DataWidth,
        func: impl Fn(Offset, u64, u64) + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            func: Rc::new(func),
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width the closure speaks.
    #[must_use]
    pub const fn width(&self) -> DataWidth {
        self.width
    }

    /// Invokes the closure with data and mask clipped to the delegate width.
    pub fn call(&self, offset: Offset, data: u64, mask: u64) {
        (self.func)(offset, data & self.width.mask(), mask & self.width.mask());
    }
}

impl fmt::Debug for WriteDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteDelegate")
            .field("name", &self.name)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

/// Address-only notification used by split-phase buses.
#[derive(Clone)]
pub struct SetAddressDelegate {
    name: Rc<str>,
    func: Rc<SetAddressFn>,
}

impl SetAddressDelegate {
    /// Wraps a closure receiving the native-unit offset.
    pub fn new(name: impl Into<Rc<str>>, func: impl Fn(Offset) + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the closure.
    pub fn call(&self, offset: Offset) {
        (self.func)(offset);
    }
}

impl fmt::Debug for SetAddressDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetAddressDelegate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named input/output latch reachable from a bus range.
pub trait IoPort {
    /// Current input value.
    fn read(&self) -> u64;

    /// Output write with the access mask.
    fn write(&self, data: u64, mask: u64);
}

/// Shared handle to a registered port.
pub type PortHandle = Rc<dyn IoPort>;

/// Simple port that remembers the last value written and returns it on read.
#[derive(Debug, Default)]
pub struct LatchPort {
    value: Cell<u64>,
}

impl LatchPort {
    /// Creates a latch holding `value`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self {
            value: Cell::new(value),
        }
    }

    /// Current latched value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.get()
    }

    /// Replaces the latched value, as an input device would.
    pub fn set(&self, value: u64) {
        self.value.set(value);
    }
}

impl IoPort for LatchPort {
    fn read(&self) -> u64 {
        self.value.get()
    }

    fn write(&self, data: u64, mask: u64) {
        let old = self.value.get();
        self.value.set((old & !mask) | (data & mask));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::{IoPort, LatchPort, ReadDelegate, WriteDelegate};
    use crate::DataWidth;

    #[test]
    fn read_results_are_clipped_to_width() {
        let delegate = ReadDelegate::new("wide", DataWidth::Bits8, |_, _| 0x1234);
        assert_eq!(delegate.call(0, u64::MAX), 0x34);
        assert_eq!(delegate.name(), "wide");
    }

    #[test]
    fn write_data_and_mask_are_clipped() {
        let seen = Rc::new(Cell::new((0, 0)));
        let sink = Rc::clone(&seen);
        let delegate = WriteDelegate::new("sink", DataWidth::Bits16, move |_, data, mask| {
            sink.set((data, mask));
        });
        delegate.call(3, 0xABCD_EF01, u64::MAX);
        assert_eq!(seen.get(), (0xEF01, 0xFFFF));
    }

    #[test]
    fn latch_merges_masked_writes() {
        let port = LatchPort::new(0xAA55);
        port.write(0x1234, 0xFF00);
        assert_eq!(port.read(), 0x1255);
        port.set(7);
        assert_eq!(port.value(), 7);
    }
}
