//! Write-barrier dispatch.
//!
//! Every pointer store into the managed heap runs the dispatcher after the
//! raw write. The decision is never a correctness filter on its own —
//! skipping a record must never cause a live object to be missed — so the
//! order of checks is chosen purely for the common case: a single enabled
//! flag rejects the no-GC steady state before any page metadata is read.

mod remembered_set;

pub use remembered_set::{RememberedEntry, RememberedSet, SlotPrecision};

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::SegQueue;

use crate::heap::ObjectRef;
use crate::tracing::internal as trc;

// ============================================================================
// CollectorState
// ============================================================================

/// Collector phase state the barrier reads, owned by the embedding heap and
/// passed by reference — there is no process-global collector.
pub struct CollectorState {
    /// Master switch; false outside any active GC phase.
    barrier_enabled: AtomicBool,
    /// True while a generational (minor-GC) cycle wants old→young records.
    generational_active: AtomicBool,
    /// Marking worklist fed by the marking barrier, drained by the marker.
    marking_worklist: SegQueue<ObjectRef>,
    /// Old→young records fed by the generational barrier.
    remembered_set: RememberedSet,
}

impl CollectorState {
    /// Create state with every phase inactive.
    #[must_use]
    pub fn new() -> Self {
        Self {
            barrier_enabled: AtomicBool::new(false),
            generational_active: AtomicBool::new(false),
            marking_worklist: SegQueue::new(),
            remembered_set: RememberedSet::new(),
        }
    }

    /// Flip the master barrier switch. The collector sets this when it
    /// starts incremental marking or a generational cycle, and clears it
    /// when neither is active.
    pub fn set_barrier_enabled(&self, enabled: bool) {
        self.barrier_enabled.store(enabled, Ordering::Release);
        trc::log_barrier_enabled(enabled);
    }

    /// Returns `true` if any barrier may fire.
    #[inline]
    #[must_use]
    pub fn is_barrier_enabled(&self) -> bool {
        self.barrier_enabled.load(Ordering::Relaxed)
    }

    /// Declare a generational cycle active or inactive.
    pub fn set_generational_active(&self, active: bool) {
        self.generational_active.store(active, Ordering::Release);
    }

    /// Returns `true` while old→young stores must be recorded.
    #[inline]
    #[must_use]
    pub fn is_generational_active(&self) -> bool {
        self.generational_active.load(Ordering::Relaxed)
    }

    /// Pop one object from the marking worklist (marker side).
    #[must_use]
    pub fn pop_marking_work(&self) -> Option<ObjectRef> {
        self.marking_worklist.pop()
    }

    /// Current marking worklist length.
    #[must_use]
    pub fn marking_worklist_len(&self) -> usize {
        self.marking_worklist.len()
    }

    /// The remembered set fed by the generational barrier.
    #[must_use]
    pub fn remembered_set(&self) -> &RememberedSet {
        &self.remembered_set
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// WriteBarrier
// ============================================================================

/// Resolved barrier decision for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    /// No record needed.
    None,
    /// Destination page is under incremental marking; push the value.
    Marking,
    /// Old→young store; record for the next minor collection.
    Generational,
}

/// Everything a slow path needs about one store; lives for exactly one
/// dispatch.
#[derive(Debug, Clone, Copy)]
pub struct BarrierParams {
    /// Object containing the written slot.
    pub host: ObjectRef,
    /// Address of the written slot.
    pub slot_address: usize,
    /// The value that was stored.
    pub value: ObjectRef,
    /// The resolved decision.
    pub kind: BarrierKind,
}

/// The per-store decision function and its slow paths.
pub struct WriteBarrier;

impl WriteBarrier {
    /// Decide which barrier (if any) the store `host.slot = value` needs.
    ///
    /// The enabled check comes first and must stay trivially predictable:
    /// outside GC phases every store takes that single branch.
    #[inline]
    #[must_use]
    pub fn get_type(state: &CollectorState, host: ObjectRef, value: ObjectRef) -> BarrierKind {
        if !state.is_barrier_enabled() {
            return BarrierKind::None;
        }
        Self::get_type_slow(state, host, value)
    }

    fn get_type_slow(state: &CollectorState, host: ObjectRef, value: ObjectRef) -> BarrierKind {
        if host.page_header().is_marking() {
            return BarrierKind::Marking;
        }
        if state.is_generational_active() && value.is_young() && !host.is_young() {
            return BarrierKind::Generational;
        }
        BarrierKind::None
    }

    /// Run the barrier for a store that already happened, recording at
    /// [`SlotPrecision::PreciseSlot`].
    ///
    /// Must be called *after* the raw slot write: a concurrent marker that
    /// drains the worklist before the store lands could otherwise miss the
    /// reference.
    #[inline]
    pub fn dispatch(state: &CollectorState, host: ObjectRef, slot_address: usize, value: ObjectRef) {
        Self::dispatch_with_precision(state, host, slot_address, value, SlotPrecision::PreciseSlot);
    }

    /// Like [`dispatch`](Self::dispatch) with an explicit generational
    /// recording precision.
    #[inline]
    pub fn dispatch_with_precision(
        state: &CollectorState,
        host: ObjectRef,
        slot_address: usize,
        value: ObjectRef,
        precision: SlotPrecision,
    ) {
        let kind = Self::get_type(state, host, value);
        if kind == BarrierKind::None {
            return;
        }
        let params = BarrierParams {
            host,
            slot_address,
            value,
            kind,
        };
        Self::dispatch_slow(state, &params, precision);
    }

    #[cold]
    fn dispatch_slow(state: &CollectorState, params: &BarrierParams, precision: SlotPrecision) {
        match params.kind {
            BarrierKind::None => {}
            BarrierKind::Marking => {
                // Tri-color: the newly referenced object must reach the
                // marker before the cycle can finish.
                state.marking_worklist.push(params.value);
            }
            BarrierKind::Generational => {
                state.remembered_set.record(params.slot_address, precision);
            }
        }
    }
}
