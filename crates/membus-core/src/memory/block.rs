use crate::{BackingPtr, MemoryError, Offset, SpaceId, Storage};

/// Backing storage for one contiguous byte range of a space.
///
/// Blocks either own a fresh zeroed allocation or wrap memory supplied by the map (a region
/// slice or a share).
#[derive(Debug, Clone)]
pub struct MemoryBlock {
    space: SpaceId,
    bytestart: Offset,
    byteend: Offset,
    base: BackingPtr,
}

impl MemoryBlock {
    /// Wraps `base` as the memory behind `bytestart..=byteend`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when `base` cannot hold the range.
    pub fn new(
        space: SpaceId,
        bytestart: Offset,
        byteend: Offset,
        base: BackingPtr,
    ) -> Result<Self, MemoryError> {
        base.ensure_len(span_len(bytestart, byteend))?;
        Ok(Self {
            space,
            bytestart,
            byteend,
            base,
        })
    }

    /// Allocates zeroed storage for `bytestart..=byteend`.
    #[must_use]
    pub fn allocate(space: SpaceId, bytestart: Offset, byteend: Offset) -> Self {
        let storage = Storage::zeroed(span_len(bytestart, byteend));
        Self {
            space,
            bytestart,
            byteend,
            base: BackingPtr::from_storage(storage),
        }
    }

    /// Owning space.
    #[must_use]
    pub const fn space(&self) -> SpaceId {
        self.space
    }

    /// First byte covered.
    #[must_use]
    pub const fn bytestart(&self) -> Offset {
        self.bytestart
    }

    /// Last byte covered.
    #[must_use]
    pub const fn byteend(&self) -> Offset {
        self.byteend
    }

    /// Pointer to the first byte.
    #[must_use]
    pub const fn base(&self) -> &BackingPtr {
        &self.base
    }

    /// True when the block holds all of `bytestart..=byteend` of `space`.
    #[must_use]
    pub fn contains(&self, space: SpaceId, bytestart: Offset, byteend: Offset) -> bool {
        self.space == space && self.bytestart <= bytestart && self.byteend >= byteend
    }

    /// Pointer to `bytestart`, which must lie inside the block.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when it does not.
    pub fn pointer_to(&self, bytestart: Offset) -> Result<BackingPtr, MemoryError> {
        let delta = bytestart
            .checked_sub(self.bytestart)
            .ok_or(MemoryError::BackingOutOfBounds {
                offset: bytestart as usize,
                length: 0,
                size: span_len(self.bytestart, self.byteend),
            })?;
        self.base.advanced(delta as usize)
    }
}

/// Externally supplied, read-mostly content such as a ROM image.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    name: String,
    storage: Storage,
}

impl MemoryRegion {
    /// Wraps `bytes` under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            storage: Storage::from_vec(bytes),
        }
    }

    /// Region name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region contents.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Pointer to `offset`, checked to have `length` bytes behind it.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::RegionTooSmall`] when the slice runs past the end.
    pub fn slice(&self, offset: usize, length: usize) -> Result<BackingPtr, MemoryError> {
        let too_small = || MemoryError::RegionTooSmall {
            name: self.name.clone(),
            offset,
            length,
            size: self.storage.len(),
        };
        let ptr = self.storage.at(offset).map_err(|_| too_small())?;
        ptr.ensure_len(length).map_err(|_| too_small())?;
        Ok(ptr)
    }
}

pub(crate) const fn span_len(bytestart: Offset, byteend: Offset) -> usize {
    (byteend - bytestart) as usize + 1
}
