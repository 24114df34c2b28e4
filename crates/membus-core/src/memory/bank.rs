//! Retargetable indirection cells for banked memory.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::{BackingPtr, DataWidth, DirectCache, Endianness, MemoryError, Offset};

/// Shared handle to a bank; slots and the manager hold clones.
pub type BankHandle = Rc<MemoryBank>;

/// A named pointer into backing memory, plus an optional list of alternate pointers selectable
/// at run time.
///
/// Anonymous banks (tags of the form `~N~`) are created for plain RAM/ROM installs and only ever
/// point at their block; named banks may switch entries.
#[derive(Debug)]
pub struct MemoryBank {
    tag: String,
    anonymous: bool,
    bytestart: Offset,
    byteend: Offset,
    base: RefCell<Option<BackingPtr>>,
    entries: RefCell<Vec<Option<BackingPtr>>>,
    current: Cell<Option<usize>>,
    references: RefCell<Vec<Weak<DirectCache>>>,
}

impl MemoryBank {
    pub(crate) const fn new(
        tag: String,
        anonymous: bool,
        bytestart: Offset,
        byteend: Offset,
    ) -> Self {
        Self {
            tag,
            anonymous,
            bytestart,
            byteend,
            base: RefCell::new(None),
            entries: RefCell::new(Vec::new()),
            current: Cell::new(None),
            references: RefCell::new(Vec::new()),
        }
    }

    /// Bank tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// True for banks created implicitly by RAM/ROM installs.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Byte range of the install that created the bank.
    #[must_use]
    pub const fn byte_range(&self) -> (Offset, Offset) {
        (self.bytestart, self.byteend)
    }

    /// Currently active backing pointer.
    #[must_use]
    pub fn base(&self) -> Option<BackingPtr> {
        self.base.borrow().clone()
    }

    /// True once a backing pointer is set.
    #[must_use]
    pub fn has_base(&self) -> bool {
        self.base.borrow().is_some()
    }

    /// Index of the active entry, if one was selected.
    #[must_use]
    pub fn entry(&self) -> Option<usize> {
        self.current.get()
    }

    /// Number of entry slots, configured or not.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Registers a cache to drop its live window whenever this bank retargets.
    pub(crate) fn add_reference(&self, cache: &Rc<DirectCache>) {
        let mut references = self.references.borrow_mut();
        references.retain(|weak| weak.strong_count() != 0);
        if !references
            .iter()
            .any(|weak| weak.upgrade().is_some_and(|live| Rc::ptr_eq(&live, cache)))
        {
            references.push(Rc::downgrade(cache));
        }
    }

    fn invalidate_references(&self) {
        for cache in self.references.borrow().iter().filter_map(Weak::upgrade) {
            cache.force_update();
        }
    }

    /// Points the bank at `base` directly, bypassing entries.
    pub fn set_base(&self, base: BackingPtr) {
        *self.base.borrow_mut() = Some(base);
        self.invalidate_references();
    }

    /// Registers `base` as entry `index`. Reconfiguring the active entry retargets the bank; the
    /// first entry 0 of a bank without a base selects itself.
    pub fn configure_entry(&self, index: usize, base: BackingPtr) {
        {
            let mut entries = self.entries.borrow_mut();
            if entries.len() <= index {
                entries.resize(index + 1, None);
            }
            entries[index] = Some(base.clone());
        }
        let adopt = match self.current.get() {
            Some(current) => current == index,
            None => index == 0 && !self.has_base(),
        };
        if adopt {
            self.current.set(Some(index));
            self.set_base(base);
        }
    }

    /// Registers `count` entries starting at `first`, spaced `stride` bytes apart from `base`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackingOutOfBounds`] when an entry would start past the end of the
    /// storage.
    pub fn configure_entries(
        &self,
        first: usize,
        count: usize,
        base: &BackingPtr,
        stride: usize,
    ) -> Result<(), MemoryError> {
        for index in 0..count {
            let entry = base.advanced(index * stride)?;
            self.configure_entry(first + index, entry);
        }
        Ok(())
    }

    /// Selects entry `index` and invalidates every cache that saw the previous pointer.
    ///
    /// # Errors
    ///
    /// Fails for anonymous banks, indices past the configured entries, and entries never
    /// configured.
    pub fn set_entry(&self, index: usize) -> Result<(), MemoryError> {
        if self.anonymous {
            return Err(MemoryError::AnonymousBankEntry {
                tag: self.tag.clone(),
            });
        }
        let base = {
            let entries = self.entries.borrow();
            let slot = entries.get(index).ok_or(MemoryError::BankEntryOutOfRange {
                tag: self.tag.clone(),
                entry: index,
                count: entries.len(),
            })?;
            slot.clone().ok_or(MemoryError::BankEntryUnconfigured {
                tag: self.tag.clone(),
                entry: index,
            })?
        };
        self.current.set(Some(index));
        self.set_base(base);
        Ok(())
    }

    /// Reads one unit `offset` bytes into the active memory.
    #[inline]
    pub(crate) fn read(
        &self,
        offset: Offset,
        width: DataWidth,
        endianness: Endianness,
    ) -> Option<u64> {
        self.base
            .borrow()
            .as_ref()?
            .read(offset as usize, width, endianness)
    }

    /// Writes one unit `offset` bytes into the active memory; returns `false` when unbacked.
    #[inline]
    pub(crate) fn write(
        &self,
        offset: Offset,
        width: DataWidth,
        endianness: Endianness,
        data: u64,
        mask: u64,
    ) -> bool {
        self.base
            .borrow()
            .as_ref()
            .is_some_and(|base| base.write(offset as usize, width, endianness, data, mask))
    }
}
