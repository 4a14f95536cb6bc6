//! Victim selection for page replacement.
//!
//! An address space never holds more than a fixed number of resident pages. They are kept
//! in a [`ResidentSet`], a ring of slots with a single cursor shared by both policies:
//!
//! - FIFO evicts the page in the slot under the cursor, which is always the page that has
//!   been resident the longest.
//! - Second chance (the clock algorithm) sweeps forward from the cursor, clearing the use
//!   bit of every referenced page it passes, and evicts the first page found unreferenced.
//!
//! Either way the incoming page takes the victim's slot and the cursor moves to the slot
//! after it.

use alloc::vec::Vec;

use crate::{PageNumber, ReplacementPolicy, page_table::PageTable};

/// The resident pages of one address space, in eviction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentSet {
    slots: Vec<PageNumber>,
    cursor: usize,
}

impl ResidentSet {
    /// Creates a full set from the initially resident pages. Slot `i` holds `pages[i]`, and
    /// the cursor starts at slot 0.
    pub fn new(pages: Vec<PageNumber>) -> Self {
        Self {
            slots: pages,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next search starts from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn page_at(&self, slot: usize) -> PageNumber {
        self.slots[slot]
    }

    /// Chooses the slot whose page is evicted next.
    ///
    /// The clock policy clears the use bit of every page it skips, so this mutates the page
    /// table even though no page changes residency.
    ///
    /// # Panics
    /// Panics if the set is empty.
    pub fn select_victim(&mut self, policy: ReplacementPolicy, table: &mut PageTable) -> usize {
        assert!(!self.slots.is_empty(), "no resident pages to evict");

        match policy {
            ReplacementPolicy::Fifo => self.cursor,
            ReplacementPolicy::SecondChance => self.sweep(table),
        }
    }

    fn sweep(&mut self, table: &mut PageTable) -> usize {
        let capacity = self.slots.len();

        // One pass clears every use bit, so the second pass always finds a victim.
        for step in 0..2 * capacity {
            let slot = (self.cursor + step) % capacity;
            let entry = &mut table[self.slots[slot]];
            if !entry.referenced {
                return slot;
            }
            entry.referenced = false;
        }
        panic!("clock sweep found no victim after two passes");
    }

    /// Puts `page` in `slot` and moves the cursor past it. Returns the page that was there.
    pub fn replace(&mut self, slot: usize, page: PageNumber) -> PageNumber {
        let old = core::mem::replace(&mut self.slots[slot], page);
        self.cursor = (slot + 1) % self.slots.len();
        old
    }
}
