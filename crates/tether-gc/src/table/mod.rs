//! Sandbox-safe entity table.
//!
//! An [`EntityTable`] maps small integer handles to tagged, markable
//! out-of-sandbox addresses. In-sandbox objects embed the handle instead of
//! the pointer, so corrupted in-sandbox memory can at worst swap one valid
//! handle for another of the same type — it cannot forge an address.
//!
//! Entry storage is reserved contiguously at construction so
//! [`base_address`](EntityTable::base_address) stays stable for the table's
//! lifetime; generated code computes `base + handle` directly because a
//! handle is its entry's byte offset.

mod entry;
mod space;

pub use entry::{Address, EntityTag, Entry, Payload, ADDRESS_MASK, HEAP_OBJECT_TAG, MARK_BIT};
pub use space::EntitySpace;

use crate::error::GcError;
use crate::safepoint::GlobalSafepointScope;
use crate::tracing::internal as trc;

use parking_lot::Mutex;

/// Entries per table segment (the growth granule handed to a space).
pub const ENTITY_SEGMENT_SIZE: usize = 512;

/// Total entries reserved by a table.
pub const MAX_ENTITIES: usize = 64 * 1024;

/// Size in bytes of one table entry.
pub const ENTITY_ENTRY_SIZE: usize = std::mem::size_of::<u64>();

// ============================================================================
// EntityHandle
// ============================================================================

/// Opaque handle to a table entry.
///
/// A handle is the entry's byte offset from [`EntityTable::base_address`]
/// (an injective shift of the index), so it embeds directly into sandboxed
/// objects with no second lookup. Handle 0 is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(pub u32);

/// The null entity handle.
pub const NULL_ENTITY_HANDLE: EntityHandle = EntityHandle(0);

const HANDLE_SHIFT: u32 = 3; // log2(ENTITY_ENTRY_SIZE)

impl EntityHandle {
    #[inline]
    const fn from_index(index: u32) -> Self {
        Self(index << HANDLE_SHIFT)
    }

    #[inline]
    const fn index(self) -> u32 {
        self.0 >> HANDLE_SHIFT
    }

    /// Returns `true` for the null handle.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// EntityTable
// ============================================================================

/// Segmented table of tagged entity pointers with a mark/sweep lifecycle
/// over its own entries.
pub struct EntityTable {
    /// Contiguous entry storage; never reallocated after construction.
    entries: Box<[Entry]>,
    /// Next segment id not yet handed to any space; guarded against
    /// concurrent growth.
    grow_lock: Mutex<u32>,
}

impl EntityTable {
    /// Reserve a table of [`MAX_ENTITIES`] entries.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if the reservation fails.
    pub fn new() -> Result<Self, GcError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(MAX_ENTITIES)
            .map_err(|_| GcError::OutOfMemory {
                what: "entity table reservation",
            })?;
        entries.resize_with(MAX_ENTITIES, Entry::zapped);
        Ok(Self {
            entries: entries.into_boxed_slice(),
            grow_lock: Mutex::new(0),
        })
    }

    /// Stable base address of entry storage, for generated code.
    #[must_use]
    pub fn base_address(&self) -> usize {
        self.entries.as_ptr() as usize
    }

    /// Total entry capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Check an (address, tag) pair against the encoding invariants.
    ///
    /// # Panics
    ///
    /// Panics if `address` is missing the heap-object tag bit, collides
    /// with the tag/mark-bit region, or `tag` is reserved. Every `set` and
    /// allocation runs this first; a violation here is a caller bug that
    /// would break the sandbox, never a recoverable input.
    pub fn validate(address: Address, tag: EntityTag) {
        assert!(
            address & HEAP_OBJECT_TAG != 0,
            "entity address {address:#x} is missing the heap-object tag bit"
        );
        assert!(
            address & !ADDRESS_MASK == 0,
            "entity address {address:#x} collides with the tag/mark-bit region"
        );
        assert!(
            tag.0 <= EntityTag::LAST_USABLE.0,
            "entity tag {:#x} is reserved",
            tag.0
        );
    }

    /// Allocate an entry in `space` holding `(address, tag)`.
    ///
    /// Pops the space's freelist, growing the space by one segment when the
    /// freelist is empty. The new entry starts unmarked: an allocation that
    /// wants to survive the current cycle must be marked like any other.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::TableExhausted`] when every segment is already
    /// handed out.
    ///
    /// # Panics
    ///
    /// Panics if `(address, tag)` fails [`validate`](Self::validate).
    pub fn allocate_and_initialize_entry(
        &self,
        space: &EntitySpace,
        address: Address,
        tag: EntityTag,
    ) -> Result<EntityHandle, GcError> {
        Self::validate(address, tag);
        let index = self.allocate_entry(space)?;
        self.entries[index as usize].store(Payload::for_trusted_pointer_entry(address, tag));
        Ok(EntityHandle::from_index(index))
    }

    fn allocate_entry(&self, space: &EntitySpace) -> Result<u32, GcError> {
        loop {
            let head = space.freelist_head();
            if head == 0 {
                self.grow(space)?;
                continue;
            }
            // Speculative read; only valid if the CAS below wins.
            let next = self.entries[head as usize].load().extract_freelist_link();
            if space.try_pop_freelist(head, next) {
                return Ok(head);
            }
        }
    }

    /// Hand the next uncommitted segment to `space` and thread its entries
    /// onto the space's freelist (lowest index first).
    fn grow(&self, space: &EntitySpace) -> Result<(), GcError> {
        let mut next_segment = self.grow_lock.lock();
        // Another thread may have grown the space while we waited.
        if !space.is_freelist_empty() {
            return Ok(());
        }
        let segment = *next_segment;
        if (segment as usize + 1) * ENTITY_SEGMENT_SIZE > self.capacity() {
            return Err(GcError::TableExhausted {
                capacity: self.capacity(),
            });
        }
        *next_segment = segment + 1;
        space.add_segment(segment);

        let first = segment as usize * ENTITY_SEGMENT_SIZE;
        let last = first + ENTITY_SEGMENT_SIZE - 1;
        // Index 0 is permanently the null entry; never thread it.
        let first_usable = if first == 0 { 1 } else { first };
        #[allow(clippy::cast_possible_truncation)]
        for index in (first_usable..=last).rev() {
            let next = if index == last { 0 } else { index as u32 + 1 };
            self.entries[index].store(Payload::for_freelist_entry(next));
        }
        #[allow(clippy::cast_possible_truncation)]
        space.set_freelist_head(first_usable as u32);
        Ok(())
    }

    /// Resolve `handle` to its stored address if the stored tag is `tag`.
    ///
    /// Fails safe: a forged, null, stale, or mistagged handle yields 0,
    /// never a panic — this runs on the sandbox hot path.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: EntityHandle, tag: EntityTag) -> Address {
        let index = handle.index() as usize;
        if index == 0 || index >= self.capacity() {
            return 0;
        }
        self.entries[index].load().untag(tag)
    }

    /// Overwrite the entry behind `handle` with `(address, tag)`.
    ///
    /// # Panics
    ///
    /// Panics if validation fails or `handle` does not refer to a live
    /// entry; unlike lookups, stores through dead handles are embedder
    /// bugs.
    pub fn set(&self, handle: EntityHandle, address: Address, tag: EntityTag) {
        Self::validate(address, tag);
        let index = handle.index() as usize;
        assert!(
            index != 0 && index < self.capacity(),
            "set() through an out-of-range handle"
        );
        let entry = &self.entries[index];
        let current = entry.load();
        assert!(current.is_live(), "set() through a dead handle");
        // Preserve the mark bit across the store: set() must not resurrect
        // or kill the entry for the current cycle.
        let mut payload = Payload::for_trusted_pointer_entry(address, tag);
        if current.is_marked() {
            payload = payload.with_mark();
        }
        entry.store(payload);
    }

    /// Invalidate the entry behind `handle` without freeing it. Subsequent
    /// lookups yield 0; the next sweep reclaims the slot.
    pub fn zap(&self, handle: EntityHandle) {
        let index = handle.index() as usize;
        assert!(
            index != 0 && index < self.capacity(),
            "zap() through an out-of-range handle"
        );
        self.entries[index].store(Payload::for_zapped_entry());
    }

    /// Mark the entry behind `handle` live for the current cycle.
    ///
    /// Safe to call from concurrent-marking threads.
    ///
    /// # Panics
    ///
    /// Panics if `space` does not own the handle's index, or the entry is
    /// not live.
    pub fn mark(&self, space: &EntitySpace, handle: EntityHandle) {
        let index = handle.index();
        assert!(
            space.owns_index(index),
            "mark() with a handle the space does not own"
        );
        self.entries[index as usize].mark();
    }

    /// Sweep every index owned by `space`.
    ///
    /// Unmarked entries (and zapped ones) go back on the space's freelist;
    /// marked entries survive with their mark bit cleared for the next
    /// cycle. Returns the number of live entries.
    ///
    /// Requires a global safepoint: the freelist is rebuilt wholesale, which
    /// cannot race allocation.
    pub fn sweep(&self, space: &EntitySpace, _safepoint: &GlobalSafepointScope<'_>) -> usize {
        let segments = space.owned_segments();
        let _span = trc::trace_table_sweep(segments.len());

        let mut live = 0usize;
        let mut freelist_head = 0u32;
        // Walk owned segments high-to-low so the rebuilt freelist hands out
        // the lowest index first, matching initial threading.
        for segment in segments.iter().rev() {
            let first = *segment as usize * ENTITY_SEGMENT_SIZE;
            let last = first + ENTITY_SEGMENT_SIZE - 1;
            let first_usable = if first == 0 { 1 } else { first };
            for index in (first_usable..=last).rev() {
                let entry = &self.entries[index];
                let payload = entry.load();
                if payload.is_live() && payload.is_marked() {
                    entry.clear_mark();
                    live += 1;
                } else {
                    entry.store(Payload::for_freelist_entry(freelist_head));
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        freelist_head = index as u32;
                    }
                }
            }
        }
        space.set_freelist_head(freelist_head);
        trc::log_table_sweep_end(live);
        live
    }

    /// Visit every occupied (live, non-free, non-zapped) entry owned by
    /// `space`. Used by heap verification and snapshot tooling.
    pub fn iterate_active_entries_in(
        &self,
        space: &EntitySpace,
        mut callback: impl FnMut(EntityHandle, Address, EntityTag),
    ) {
        for segment in space.owned_segments() {
            let first = segment as usize * ENTITY_SEGMENT_SIZE;
            let last = first + ENTITY_SEGMENT_SIZE - 1;
            for index in first.max(1)..=last {
                let payload = self.entries[index].load();
                if let (Some(address), Some(tag)) =
                    (payload.extract_address(), payload.extract_tag())
                {
                    #[allow(clippy::cast_possible_truncation)]
                    callback(EntityHandle::from_index(index as u32), address, tag);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safepoint::ThreadRegistry;

    const TAG_A: EntityTag = EntityTag(1);
    const TAG_B: EntityTag = EntityTag(2);

    // A plausible tagged out-of-sandbox address.
    const PTR: Address = 0x0000_7000_0000_1001;

    #[test]
    fn test_allocate_get_round_trip() {
        let table = EntityTable::new().unwrap();
        let space = EntitySpace::new();

        let h = table
            .allocate_and_initialize_entry(&space, PTR, TAG_A)
            .unwrap();
        assert!(!h.is_null());
        assert_eq!(table.get(h, TAG_A), PTR);
        assert_eq!(table.get(h, TAG_B), 0);
    }

    #[test]
    fn test_get_fails_safe_on_forged_handles() {
        let table = EntityTable::new().unwrap();
        assert_eq!(table.get(NULL_ENTITY_HANDLE, TAG_A), 0);
        assert_eq!(table.get(EntityHandle(u32::MAX), TAG_A), 0);
        // An in-range index that was never allocated is zapped, not live.
        assert_eq!(table.get(EntityHandle(64), TAG_A), 0);
    }

    #[test]
    #[should_panic(expected = "missing the heap-object tag bit")]
    fn test_validate_rejects_untagged_address() {
        EntityTable::validate(0x1000, TAG_A);
    }

    #[test]
    #[should_panic(expected = "collides with the tag/mark-bit region")]
    fn test_validate_rejects_high_bits() {
        EntityTable::validate((1 << 60) | 1, TAG_A);
    }

    #[test]
    #[should_panic(expected = "is reserved")]
    fn test_validate_rejects_reserved_tag() {
        EntityTable::validate(PTR, EntityTag(0xFF));
    }

    #[test]
    fn test_mark_then_sweep_keeps_entry() {
        let registry = ThreadRegistry::new();
        let table = EntityTable::new().unwrap();
        let space = EntitySpace::new();
        let h = table
            .allocate_and_initialize_entry(&space, PTR, TAG_A)
            .unwrap();

        table.mark(&space, h);
        let live = table.sweep(&space, &registry.enter_safepoint());
        assert_eq!(live, 1);
        assert_eq!(table.get(h, TAG_A), PTR);

        // Mark bit was cleared; an unmarked second cycle frees it.
        let live = table.sweep(&space, &registry.enter_safepoint());
        assert_eq!(live, 0);
        assert_eq!(table.get(h, TAG_A), 0);
    }

    #[test]
    fn test_sweep_reissues_freed_indices() {
        let registry = ThreadRegistry::new();
        let table = EntityTable::new().unwrap();
        let space = EntitySpace::new();
        let h1 = table
            .allocate_and_initialize_entry(&space, PTR, TAG_A)
            .unwrap();
        let _ = table.sweep(&space, &registry.enter_safepoint());

        let h2 = table
            .allocate_and_initialize_entry(&space, PTR, TAG_A)
            .unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_iterate_active_entries() {
        let registry = ThreadRegistry::new();
        let table = EntityTable::new().unwrap();
        let space = EntitySpace::new();
        let h1 = table
            .allocate_and_initialize_entry(&space, PTR, TAG_A)
            .unwrap();
        let h2 = table
            .allocate_and_initialize_entry(&space, PTR | 0x100, TAG_B)
            .unwrap();
        table.mark(&space, h1);
        let _ = table.sweep(&space, &registry.enter_safepoint());
        let _ = h2;

        let mut seen = Vec::new();
        table.iterate_active_entries_in(&space, |handle, address, tag| {
            seen.push((handle, address, tag));
        });
        assert_eq!(seen, vec![(h1, PTR, TAG_A)]);
    }

    #[test]
    fn test_set_preserves_mark() {
        let table = EntityTable::new().unwrap();
        let space = EntitySpace::new();
        let h = table
            .allocate_and_initialize_entry(&space, PTR, TAG_A)
            .unwrap();
        table.mark(&space, h);
        table.set(h, PTR | 0x10, TAG_B);

        let registry = ThreadRegistry::new();
        let live = table.sweep(&space, &registry.enter_safepoint());
        assert_eq!(live, 1);
        assert_eq!(table.get(h, TAG_B), PTR | 0x10);
    }

    #[test]
    fn test_base_address_is_entry_scaled() {
        let table = EntityTable::new().unwrap();
        let space = EntitySpace::new();
        let h = table
            .allocate_and_initialize_entry(&space, PTR, TAG_A)
            .unwrap();
        // The handle is the entry's byte offset from the base.
        let entry_addr = table.base_address() + h.0 as usize;
        assert_eq!(entry_addr % ENTITY_ENTRY_SIZE, 0);
        assert_eq!((h.0 as usize) / ENTITY_ENTRY_SIZE, 1);
    }
}
