//! Shared byte storage and checked, byte-order aware unit access.
//!
//! Storage holds bytes in bus order: a native unit at byte offset `o` occupies `o..o + bytes` and
//! is encoded with the owning space's endianness. Every helper here bounds-checks and returns
//! `None` instead of panicking when a unit would run off the end of the buffer.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::{DataWidth, Endianness, MemoryError};

/// Reference-counted, interior-mutable byte buffer.
#[derive(Clone)]
pub struct Storage(Rc<RefCell<Box<[u8]>>>);

impl Storage {
    /// Allocates `len` zeroed bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Takes ownership of existing contents.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(Rc::new(RefCell::new(bytes.into_boxed_slice())))
    }

    /// Buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// True for a zero-length buffer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when both handles name the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Copies the contents out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.borrow().to_vec()
    }

    /// Overwrites every byte with `value`.
    pub fn fill(&self, value: u8) {
        self.0.borrow_mut().fill(value);
    }

    /// Pointer to `offset` within this buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when `offset` is past the end.
    pub fn at(&self, offset: usize) -> Result<BackingPtr, MemoryError> {
        BackingPtr::new(self.clone(), offset)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").field("len", &self.len()).finish()
    }
}

/// A position inside a [`Storage`]; the engine's equivalent of a base pointer.
#[derive(Debug, Clone)]
pub struct BackingPtr {
    storage: Storage,
    offset: usize,
}

impl BackingPtr {
    /// Creates a pointer, checking that `offset` lies inside the storage.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when `offset` is past the end.
    pub fn new(storage: Storage, offset: usize) -> Result<Self, MemoryError> {
        let size = storage.len();
        if offset > size {
            return Err(MemoryError::BackingOutOfBounds {
                offset,
                length: 0,
                size,
            });
        }
        Ok(Self { storage, offset })
    }

    /// Pointer to the first byte of `storage`.
    #[must_use]
    pub const fn from_storage(storage: Storage) -> Self {
        Self { storage, offset: 0 }
    }

    /// Underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Offset inside the storage.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes between this pointer and the end of the storage.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.storage.len().saturating_sub(self.offset)
    }

    /// Pointer `delta` bytes further on.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when the result is past the end.
    pub fn advanced(&self, delta: usize) -> Result<Self, MemoryError> {
        let offset = self
            .offset
            .checked_add(delta)
            .ok_or(MemoryError::BackingOutOfBounds {
                offset: self.offset,
                length: delta,
                size: self.storage.len(),
            })?;
        Self::new(self.storage.clone(), offset)
    }

    /// Checks that `length` bytes are available from this pointer.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when they are not.
    pub fn ensure_len(&self, length: usize) -> Result<(), MemoryError> {
        if length > self.remaining() {
            return Err(MemoryError::BackingOutOfBounds {
                offset: self.offset,
                length,
                size: self.storage.len(),
            });
        }
        Ok(())
    }

    /// True when both pointers name the same byte.
    #[must_use]
    pub fn same_address(&self, other: &Self) -> bool {
        self.offset == other.offset && self.storage.ptr_eq(&other.storage)
    }

    /// Reads one unit at `offset` bytes past this pointer.
    #[must_use]
    pub fn read(&self, offset: usize, width: DataWidth, endianness: Endianness) -> Option<u64> {
        let start = self.offset.checked_add(offset)?;
        let end = start.checked_add(width.bytes() as usize)?;
        let data = self.storage.0.borrow();
        decode_unit(data.get(start..end)?, width, endianness)
    }

    /// Merges `data` into the unit at `offset` under `mask`. Returns `false` when the unit is out
    /// of bounds.
    pub fn write(
        &self,
        offset: usize,
        width: DataWidth,
        endianness: Endianness,
        data: u64,
        mask: u64,
    ) -> bool {
        let Some(start) = self.offset.checked_add(offset) else {
            return false;
        };
        let Some(end) = start.checked_add(width.bytes() as usize) else {
            return false;
        };
        let mut storage = self.storage.0.borrow_mut();
        let Some(bytes) = storage.get_mut(start..end) else {
            return false;
        };
        let mask = mask & width.mask();
        let value = if mask == width.mask() {
            data
        } else {
            let Some(old) = decode_unit(bytes, width, endianness) else {
                return false;
            };
            (old & !mask) | (data & mask)
        };
        encode_unit(value, width, endianness, bytes).is_some()
    }

    /// Reads one byte at `offset` bytes past this pointer.
    #[must_use]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        let index = self.offset.checked_add(offset)?;
        self.storage.0.borrow().get(index).copied()
    }

    /// Copies `bytes` to `offset` bytes past this pointer.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when the copy would run off the end.
    pub fn copy_from(&self, offset: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        let size = self.storage.len();
        let out_of_bounds = MemoryError::BackingOutOfBounds {
            offset: self.offset.saturating_add(offset),
            length: bytes.len(),
            size,
        };
        let start = self
            .offset
            .checked_add(offset)
            .ok_or_else(|| out_of_bounds.clone())?;
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| out_of_bounds.clone())?;
        let mut storage = self.storage.0.borrow_mut();
        let target = storage.get_mut(start..end).ok_or(out_of_bounds)?;
        target.copy_from_slice(bytes);
        Ok(())
    }
}

/// Decodes one unit from exactly `width.bytes()` bytes.
#[must_use]
pub fn decode_unit(bytes: &[u8], width: DataWidth, endianness: Endianness) -> Option<u64> {
    let value = match width {
        DataWidth::Bits8 => u64::from(*bytes.first()?),
        DataWidth::Bits16 => {
            let raw: [u8; 2] = bytes.try_into().ok()?;
            u64::from(match endianness {
                Endianness::Little => u16::from_le_bytes(raw),
                Endianness::Big => u16::from_be_bytes(raw),
            })
        }
        DataWidth::Bits32 => {
            let raw: [u8; 4] = bytes.try_into().ok()?;
            u64::from(match endianness {
                Endianness::Little => u32::from_le_bytes(raw),
                Endianness::Big => u32::from_be_bytes(raw),
            })
        }
        DataWidth::Bits64 => {
            let raw: [u8; 8] = bytes.try_into().ok()?;
            match endianness {
                Endianness::Little => u64::from_le_bytes(raw),
                Endianness::Big => u64::from_be_bytes(raw),
            }
        }
    };
    Some(value)
}

/// Encodes the low `width` bits of `value` into exactly `width.bytes()` bytes.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_unit(
    value: u64,
    width: DataWidth,
    endianness: Endianness,
    out: &mut [u8],
) -> Option<()> {
    if out.len() != width.bytes() as usize {
        return None;
    }
    match (width, endianness) {
        (DataWidth::Bits8, _) => out[0] = value as u8,
        (DataWidth::Bits16, Endianness::Little) => {
            out.copy_from_slice(&(value as u16).to_le_bytes());
        }
        (DataWidth::Bits16, Endianness::Big) => out.copy_from_slice(&(value as u16).to_be_bytes()),
        (DataWidth::Bits32, Endianness::Little) => {
            out.copy_from_slice(&(value as u32).to_le_bytes());
        }
        (DataWidth::Bits32, Endianness::Big) => out.copy_from_slice(&(value as u32).to_be_bytes()),
        (DataWidth::Bits64, Endianness::Little) => out.copy_from_slice(&value.to_le_bytes()),
        (DataWidth::Bits64, Endianness::Big) => out.copy_from_slice(&value.to_be_bytes()),
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::{decode_unit, encode_unit, Storage};
    use crate::{DataWidth, Endianness, MemoryError};

    #[test]
    fn units_follow_bus_byte_order() {
        let storage = Storage::zeroed(8);
        let ptr = storage.at(0).expect("pointer at start");
        assert!(ptr.write(0, DataWidth::Bits32, Endianness::Big, 0x1122_3344, u64::MAX));
        assert_eq!(storage.to_vec()[..4], [0x11, 0x22, 0x33, 0x44]);
        assert!(ptr.write(4, DataWidth::Bits32, Endianness::Little, 0x1122_3344, u64::MAX));
        assert_eq!(storage.to_vec()[4..], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(
            ptr.read(0, DataWidth::Bits16, Endianness::Big),
            Some(0x1122)
        );
        assert_eq!(
            ptr.read(4, DataWidth::Bits16, Endianness::Little),
            Some(0x3344)
        );
    }

    #[test]
    fn masked_write_preserves_unselected_bits() {
        let storage = Storage::from_vec(vec![0xAA, 0xBB]);
        let ptr = storage.at(0).expect("pointer at start");
        assert!(ptr.write(0, DataWidth::Bits16, Endianness::Little, 0x1234, 0x00FF));
        assert_eq!(storage.to_vec(), vec![0x34, 0xBB]);
    }

    #[test]
    fn out_of_range_units_are_refused() {
        let storage = Storage::zeroed(3);
        let ptr = storage.at(2).expect("pointer inside");
        assert_eq!(ptr.read(0, DataWidth::Bits16, Endianness::Little), None);
        assert!(!ptr.write(0, DataWidth::Bits16, Endianness::Little, 1, u64::MAX));
        assert!(matches!(
            storage.at(4),
            Err(MemoryError::BackingOutOfBounds { .. })
        ));
        assert!(ptr.ensure_len(2).is_err());
    }

    #[test]
    fn helpers_reject_mismatched_slices() {
        assert_eq!(decode_unit(&[1, 2, 3], DataWidth::Bits16, Endianness::Big), None);
        let mut out = [0u8; 3];
        assert_eq!(
            encode_unit(7, DataWidth::Bits16, Endianness::Big, &mut out),
            None
        );
    }

    #[test]
    fn advanced_pointers_share_storage() {
        let storage = Storage::zeroed(16);
        let base = storage.at(4).expect("pointer");
        let next = base.advanced(4).expect("still inside");
        assert_eq!(next.offset(), 8);
        assert!(next.storage().ptr_eq(&storage));
        next.copy_from(0, &[9, 8]).expect("fits");
        assert_eq!(base.read_byte(4), Some(9));
        assert!(!base.same_address(&next));
    }
}
