//! Typed slot access with barrier dispatch.
//!
//! `TaggedField` is the one place pointer stores into managed objects go
//! through. A store performs the raw slot write first and runs the barrier
//! second; reversing that order lets a concurrent marker observe a stale or
//! missing reference.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::barrier::{CollectorState, SlotPrecision, WriteBarrier};
use crate::heap::{ObjectRef, PAGE_MASK};

/// Typed load/store helpers over pointer slots inside managed objects.
///
/// A slot is addressed as `(host, offset)`; slots are one word and at least
/// 8-byte aligned. All accesses are word-atomic so concurrent-marking
/// threads never see torn values.
pub struct TaggedField;

impl TaggedField {
    #[inline]
    fn slot(host: ObjectRef, offset: usize) -> *const AtomicU64 {
        let slot_address = host.address() + offset;
        debug_assert_eq!(slot_address % 8, 0, "pointer slots are 8-byte aligned");
        debug_assert_eq!(
            slot_address & PAGE_MASK,
            host.address() & PAGE_MASK,
            "slot extends past the host's page"
        );
        slot_address as *const AtomicU64
    }

    /// Store `value` into the slot at `host + offset`, then dispatch the
    /// barrier for it.
    ///
    /// # Safety
    ///
    /// `host + offset` must be a valid, initialized pointer slot inside the
    /// host object, and no non-atomic access to it may race this store.
    #[inline]
    pub unsafe fn store(
        state: &CollectorState,
        host: ObjectRef,
        offset: usize,
        value: Option<ObjectRef>,
    ) {
        // SAFETY: Caller guarantees the slot is valid for atomic access.
        unsafe { Self::store_no_barrier(host, offset, value) };
        // Barrier strictly after the raw write.
        if let Some(value) = value {
            WriteBarrier::dispatch(state, host, host.address() + offset, value);
        }
    }

    /// Store with an explicit generational recording precision.
    ///
    /// # Safety
    ///
    /// Same contract as [`store`](Self::store).
    #[inline]
    pub unsafe fn store_with_precision(
        state: &CollectorState,
        host: ObjectRef,
        offset: usize,
        value: Option<ObjectRef>,
        precision: SlotPrecision,
    ) {
        // SAFETY: Caller guarantees the slot is valid for atomic access.
        unsafe { Self::store_no_barrier(host, offset, value) };
        if let Some(value) = value {
            WriteBarrier::dispatch_with_precision(
                state,
                host,
                host.address() + offset,
                value,
                precision,
            );
        }
    }

    /// Raw slot write without barrier dispatch, for initializing stores
    /// into objects the collector cannot see yet.
    ///
    /// # Safety
    ///
    /// Same contract as [`store`](Self::store).
    #[inline]
    pub unsafe fn store_no_barrier(host: ObjectRef, offset: usize, value: Option<ObjectRef>) {
        let word = value.map_or(0, |v| v.address() as u64);
        // SAFETY: Caller guarantees the slot is valid for atomic access.
        unsafe { (*Self::slot(host, offset)).store(word, Ordering::Relaxed) };
    }

    /// Load the pointer stored at `host + offset`.
    ///
    /// # Safety
    ///
    /// Same slot-validity contract as [`store`](Self::store).
    #[inline]
    #[must_use]
    pub unsafe fn load(host: ObjectRef, offset: usize) -> Option<ObjectRef> {
        // SAFETY: Caller guarantees the slot is valid for atomic access.
        let word = unsafe { (*Self::slot(host, offset)).load(Ordering::Relaxed) };
        // SAFETY: A non-zero word in a pointer slot was stored from a live
        // ObjectRef.
        NonNull::new(word as *mut u8).map(|ptr| unsafe { ObjectRef::from_raw(ptr) })
    }

    /// Acquire-ordered load, for readers synchronizing with an
    /// initializing publication store.
    ///
    /// # Safety
    ///
    /// Same slot-validity contract as [`store`](Self::store).
    #[inline]
    #[must_use]
    pub unsafe fn load_acquire(host: ObjectRef, offset: usize) -> Option<ObjectRef> {
        // SAFETY: Caller guarantees the slot is valid for atomic access.
        let word = unsafe { (*Self::slot(host, offset)).load(Ordering::Acquire) };
        // SAFETY: As in load().
        NonNull::new(word as *mut u8).map(|ptr| unsafe { ObjectRef::from_raw(ptr) })
    }
}
