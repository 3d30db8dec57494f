//! Per-owner partitions of the entity table.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::ENTITY_SEGMENT_SIZE;

/// A space owns a subset of the table's segments and its own freelist; a
/// sweep only touches indices its space owns.
///
/// The freelist head is atomic so entry allocation can CAS-pop from mutator
/// threads; structural changes (adding segments, rebuilding the freelist
/// during sweep) happen under a safepoint.
#[derive(Debug, Default)]
pub struct EntitySpace {
    /// Ids of segments owned by this space.
    segments: Mutex<BTreeSet<u32>>,
    /// Head of the freelist (entry index; 0 terminates).
    freelist_head: AtomicU32,
}

impl EntitySpace {
    /// Create a space owning no segments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `index` falls in a segment owned by this space.
    #[must_use]
    pub fn owns_index(&self, index: u32) -> bool {
        #[allow(clippy::cast_possible_truncation)]
        let segment = index / ENTITY_SEGMENT_SIZE as u32;
        self.segments.lock().contains(&segment)
    }

    /// Number of segments owned by this space.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.lock().len()
    }

    /// Snapshot of owned segment ids in ascending order.
    pub(crate) fn owned_segments(&self) -> Vec<u32> {
        self.segments.lock().iter().copied().collect()
    }

    pub(crate) fn add_segment(&self, segment: u32) {
        let inserted = self.segments.lock().insert(segment);
        debug_assert!(inserted, "segment {segment} added to a space twice");
    }

    pub(crate) fn freelist_head(&self) -> u32 {
        self.freelist_head.load(Ordering::Acquire)
    }

    pub(crate) fn set_freelist_head(&self, head: u32) {
        self.freelist_head.store(head, Ordering::Release);
    }

    /// CAS the freelist head from `current` to `next` (allocation pop).
    pub(crate) fn try_pop_freelist(&self, current: u32, next: u32) -> bool {
        self.freelist_head
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` if the freelist is empty.
    #[must_use]
    pub fn is_freelist_empty(&self) -> bool {
        self.freelist_head() == 0
    }
}
