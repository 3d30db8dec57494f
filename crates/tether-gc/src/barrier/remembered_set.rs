//! Remembered set fed by the generational write barrier.
//!
//! Records old→young pointer stores for the next minor collection. Two
//! precision levels: exact slot addresses bucketed per page, or a
//! page-granularity dirty record that forces the minor GC to re-scan the
//! whole page.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;

use crate::heap::PAGE_MASK;

/// How precisely a generational store is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPrecision {
    /// Record the exact slot address (costlier record, cheap re-scan).
    PreciseSlot,
    /// Only dirty the host page (cheap record, full-page re-scan).
    ImprecisePage,
}

/// One record drained from the remembered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RememberedEntry {
    /// An exact old-generation slot that holds a young pointer.
    Slot(usize),
    /// A dirty old-generation page that must be re-scanned wholesale.
    Page(usize),
}

/// Old→young store records, bucketed per page.
#[derive(Debug, Default)]
pub struct RememberedSet {
    /// page base → exact slot addresses within it.
    precise: Mutex<HashMap<usize, BTreeSet<usize>>>,
    /// page bases recorded imprecisely.
    dirty_pages: Mutex<HashSet<usize>>,
}

impl RememberedSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a store into `slot_address` at the given precision.
    pub fn record(&self, slot_address: usize, precision: SlotPrecision) {
        let page = slot_address & PAGE_MASK;
        match precision {
            SlotPrecision::PreciseSlot => {
                self.precise.lock().entry(page).or_default().insert(slot_address);
            }
            SlotPrecision::ImprecisePage => {
                self.dirty_pages.lock().insert(page);
            }
        }
    }

    /// Number of recorded entries (slots plus dirty pages).
    #[must_use]
    pub fn len(&self) -> usize {
        let precise = self.precise.lock().values().map(BTreeSet::len).sum::<usize>();
        precise + self.dirty_pages.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.precise.lock().is_empty() && self.dirty_pages.lock().is_empty()
    }

    /// Drain every record into `callback`, leaving the set empty. Precise
    /// slots on a page that was also dirtied imprecisely are subsumed by
    /// the page record.
    pub fn drain(&self, mut callback: impl FnMut(RememberedEntry)) {
        let dirty: Vec<usize> = {
            let mut pages = self.dirty_pages.lock();
            pages.drain().collect()
        };
        let dirty_set: HashSet<usize> = dirty.iter().copied().collect();
        for page in dirty {
            callback(RememberedEntry::Page(page));
        }

        let precise: Vec<(usize, BTreeSet<usize>)> = {
            let mut buckets = self.precise.lock();
            buckets.drain().collect()
        };
        for (page, slots) in precise {
            if dirty_set.contains(&page) {
                continue;
            }
            for slot in slots {
                callback(RememberedEntry::Slot(slot));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::PAGE_SIZE;

    #[test]
    fn test_precise_slots_bucket_per_page() {
        let set = RememberedSet::new();
        set.record(PAGE_SIZE + 8, SlotPrecision::PreciseSlot);
        set.record(PAGE_SIZE + 16, SlotPrecision::PreciseSlot);
        set.record(PAGE_SIZE + 16, SlotPrecision::PreciseSlot);
        assert_eq!(set.len(), 2);

        let mut slots = Vec::new();
        set.drain(|entry| slots.push(entry));
        assert_eq!(
            slots,
            vec![
                RememberedEntry::Slot(PAGE_SIZE + 8),
                RememberedEntry::Slot(PAGE_SIZE + 16),
            ]
        );
        assert!(set.is_empty());
    }

    #[test]
    fn test_page_record_subsumes_slots() {
        let set = RememberedSet::new();
        set.record(PAGE_SIZE + 8, SlotPrecision::PreciseSlot);
        set.record(PAGE_SIZE + 24, SlotPrecision::ImprecisePage);

        let mut entries = Vec::new();
        set.drain(|entry| entries.push(entry));
        assert_eq!(entries, vec![RememberedEntry::Page(PAGE_SIZE)]);
    }
}
