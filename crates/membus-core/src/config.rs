//! Address-space configuration and the scalar vocabulary shared by every module.
//!
//! A space is described once, at construction time, by a [`SpaceConfig`]. Its data width and byte
//! order never change afterwards; everything the dispatch tables derive from it (byte mask, unit
//! alignment, table shape) is computed here.

use crate::MemoryError;

/// Logical or byte address on a bus. Buses are at most 32 bits wide once scaled to bytes.
pub type Offset = u32;

/// Byte order of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Endianness {
    /// Least-significant byte at the lowest address.
    #[default]
    Little,
    /// Most-significant byte at the lowest address.
    Big,
}

/// Width of a bus or of a handler, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DataWidth {
    /// 8-bit units.
    Bits8,
    /// 16-bit units.
    Bits16,
    /// 32-bit units.
    Bits32,
    /// 64-bit units.
    Bits64,
}

impl DataWidth {
    /// Parses a bit count (8, 16, 32 or 64).
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Bits8),
            16 => Some(Self::Bits16),
            32 => Some(Self::Bits32),
            64 => Some(Self::Bits64),
            _ => None,
        }
    }

    /// Number of bits in one unit.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }

    /// Number of bytes in one unit.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    /// Base-2 logarithm of [`Self::bytes`].
    #[must_use]
    pub const fn bytes_log2(self) -> u32 {
        self.bytes().trailing_zeros()
    }

    /// All-ones value of this width, widened to 64 bits.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Bits64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }
}

/// Which of the three per-space dispatch tables an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Data reads.
    Read,
    /// Data writes.
    Write,
    /// Split-phase address notifications.
    SetAddress,
}

impl AccessKind {
    /// Lowercase label used in diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::SetAddress => "set-address",
        }
    }
}

/// Direction selector for installs that may touch the read table, the write table, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessMode {
    /// Read table only.
    Read,
    /// Write table only.
    Write,
    /// Both tables.
    ReadWrite,
}

impl AccessMode {
    /// True when the read table is affected.
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// True when the write table is affected.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// True when `self` covers every direction `other` covers.
    #[must_use]
    pub const fn covers(self, other: Self) -> bool {
        (!other.reads() || self.reads()) && (!other.writes() || self.writes())
    }
}

/// Largest byte-address span a space may describe.
pub const MAX_BYTE_ADDRESS_BITS: u32 = 32;

/// Immutable description of one bus.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SpaceConfig {
    /// Name used in diagnostics and dumps.
    pub name: String,
    /// Native data width of the bus.
    pub data_width: DataWidth,
    /// Number of logical address lines.
    pub address_width: u32,
    /// Zero for byte-addressed buses; `-1`, `-2` or `-3` when one logical address covers 2, 4 or
    /// 8 bytes.
    pub address_shift: i8,
    /// Byte order of the bus.
    pub endianness: Endianness,
    /// Optional logical address mask narrower than `address_width`.
    pub global_mask: Option<Offset>,
    /// Value returned for reads nothing answers.
    pub unmap_value: u64,
    /// Emit a `warn!` record for every access to an unmapped address.
    pub log_unmapped: bool,
}

impl SpaceConfig {
    /// Creates a byte-addressed configuration with an all-ones unmapped value.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        data_width: DataWidth,
        address_width: u32,
        endianness: Endianness,
    ) -> Self {
        Self {
            name: name.into(),
            data_width,
            address_width,
            address_shift: 0,
            endianness,
            global_mask: None,
            unmap_value: u64::MAX,
            log_unmapped: false,
        }
    }

    /// Sets the logical-to-byte address shift.
    #[must_use]
    pub const fn with_address_shift(mut self, shift: i8) -> Self {
        self.address_shift = shift;
        self
    }

    /// Restricts decoding to `mask`.
    #[must_use]
    pub const fn with_global_mask(mut self, mask: Offset) -> Self {
        self.global_mask = Some(mask);
        self
    }

    /// Sets the unmapped read value.
    #[must_use]
    pub const fn with_unmap_value(mut self, value: u64) -> Self {
        self.unmap_value = value;
        self
    }

    /// Enables unmapped-access diagnostics.
    #[must_use]
    pub const fn with_log_unmapped(mut self, enabled: bool) -> Self {
        self.log_unmapped = enabled;
        self
    }

    /// Checks that the widths and shift describe a bus this engine can dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidSpaceConfig`] naming the first inconsistent field.
    pub fn validate(&self) -> Result<(), MemoryError> {
        let fail = |reason: &str| MemoryError::InvalidSpaceConfig {
            space: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.address_width == 0 || self.address_width > MAX_BYTE_ADDRESS_BITS {
            return Err(fail("address width must be between 1 and 32 bits"));
        }
        if !(-3..=0).contains(&self.address_shift) {
            return Err(fail("address shift must be 0, -1, -2 or -3"));
        }
        if self.byte_address_bits() > MAX_BYTE_ADDRESS_BITS {
            return Err(fail("byte-scaled address space exceeds 32 bits"));
        }
        if self.data_width.bits() >> self.unit_shift() == 0 {
            return Err(fail("address unit is wider than the data bus"));
        }
        if let Some(mask) = self.global_mask {
            if mask & !self.full_address_mask() != 0 {
                return Err(fail("global mask has bits above the address width"));
            }
        }
        Ok(())
    }

    fn unit_shift(&self) -> u32 {
        // 3 for byte addressing, 4..6 for wider logical units
        3 + u32::from(self.address_shift.unsigned_abs())
    }

    fn full_address_mask(&self) -> Offset {
        if self.address_width >= 32 {
            Offset::MAX
        } else {
            (1 << self.address_width) - 1
        }
    }

    /// Number of bits needed to address every byte of the bus.
    #[must_use]
    pub fn byte_address_bits(&self) -> u32 {
        self.address_width + u32::from(self.address_shift.unsigned_abs())
    }

    /// Logical address mask (global mask when one is set).
    #[must_use]
    pub fn address_mask(&self) -> Offset {
        self.global_mask.unwrap_or_else(|| self.full_address_mask())
    }

    /// Byte-address mask covering the whole decoded space.
    #[must_use]
    pub fn byte_mask(&self) -> Offset {
        self.address_to_byte_end(self.address_mask())
    }

    /// Mask of logical-address low bits that must be clear at a range start.
    #[must_use]
    pub fn low_bits_mask(&self) -> Offset {
        (self.data_width.bits() >> self.unit_shift()) - 1
    }

    /// Converts a logical address to the first byte it covers.
    #[must_use]
    pub fn address_to_byte(&self, address: Offset) -> Offset {
        address << self.address_shift.unsigned_abs()
    }

    /// Converts a logical address to the last byte it covers.
    #[must_use]
    pub fn address_to_byte_end(&self, address: Offset) -> Offset {
        let shift = self.address_shift.unsigned_abs();
        (address << shift) | ((1 << shift) - 1)
    }

    /// Converts a byte address back to logical units.
    #[must_use]
    pub fn byte_to_address(&self, byte: Offset) -> Offset {
        byte >> self.address_shift.unsigned_abs()
    }
}
