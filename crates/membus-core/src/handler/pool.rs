use super::{
    HandlerKind, HandlerSlot, SLOT_COUNT, STATIC_COUNT, STATIC_INVALID, STATIC_NOP, STATIC_TAP,
    STATIC_UNMAP,
};
use crate::Offset;

/// Fixed-capacity slot arena with per-slot reference counts and a free list.
///
/// Reference counts track how many table cells name each dynamic slot. A slot returns to the
/// free list the moment its count reaches zero.
#[derive(Debug, Clone)]
pub struct SlotPool {
    slots: Vec<HandlerSlot>,
    refcounts: Vec<u32>,
    next_free: Vec<Option<u16>>,
    free_head: Option<u16>,
}

impl SlotPool {
    /// Creates a pool whose fixed slots span `space_bytemask`.
    #[must_use]
    pub fn new(space_bytemask: Offset) -> Self {
        let mut slots = vec![HandlerSlot::default(); usize::from(SLOT_COUNT)];
        let fixed = |kind| HandlerSlot::fixed(kind, space_bytemask);
        slots[usize::from(STATIC_INVALID)] = fixed(HandlerKind::Unmapped);
        slots[usize::from(STATIC_UNMAP)] = fixed(HandlerKind::Unmapped);
        slots[usize::from(STATIC_NOP)] = fixed(HandlerKind::NoOp);
        slots[usize::from(STATIC_TAP)] = fixed(HandlerKind::TapProxy);

        let dynamic = usize::from(SLOT_COUNT - STATIC_COUNT);
        let next_free = (STATIC_COUNT..SLOT_COUNT)
            .map(|index| (index + 1 < SLOT_COUNT).then_some(index + 1))
            .collect();
        Self {
            slots,
            refcounts: vec![0; dynamic],
            next_free,
            free_head: Some(STATIC_COUNT),
        }
    }

    /// Slot at `index`.
    #[must_use]
    pub fn get(&self, index: u16) -> &HandlerSlot {
        &self.slots[usize::from(index)]
    }

    pub(crate) fn get_mut(&mut self, index: u16) -> &mut HandlerSlot {
        &mut self.slots[usize::from(index)]
    }

    /// Pops a free dynamic slot. Its reference count starts at zero.
    pub(crate) fn allocate(&mut self) -> Option<u16> {
        let index = self.free_head?;
        self.free_head = self.next_free[usize::from(index - STATIC_COUNT)];
        Some(index)
    }

    /// Adds `count` references to `index`; fixed slots are not counted.
    pub(crate) fn add_ref(&mut self, index: u16, count: u32) {
        if index >= STATIC_COUNT {
            self.refcounts[usize::from(index - STATIC_COUNT)] += count;
        }
    }

    /// Drops one reference; a slot reaching zero is deconfigured and freed.
    pub(crate) fn release(&mut self, index: u16) {
        if index < STATIC_COUNT {
            return;
        }
        let dynamic = usize::from(index - STATIC_COUNT);
        debug_assert!(self.refcounts[dynamic] != 0, "slot {index:#x} over-released");
        self.refcounts[dynamic] = self.refcounts[dynamic].saturating_sub(1);
        if self.refcounts[dynamic] == 0 {
            self.slots[usize::from(index)].deconfigure();
            self.next_free[dynamic] = self.free_head;
            self.free_head = Some(index);
        }
    }

    /// Tracked reference count of `index` (always zero for fixed slots).
    #[must_use]
    pub fn refcount(&self, index: u16) -> u32 {
        if index < STATIC_COUNT {
            0
        } else {
            self.refcounts[usize::from(index - STATIC_COUNT)]
        }
    }

    /// Tracked reference counts of every dynamic slot, in index order.
    #[must_use]
    pub fn refcounts(&self) -> &[u32] {
        &self.refcounts
    }

    /// Number of slots currently on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.free_head;
        while let Some(index) = cursor {
            count += 1;
            cursor = self.next_free[usize::from(index - STATIC_COUNT)];
        }
        count
    }
}
