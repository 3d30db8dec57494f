//! Cross-thread persistent handles.
//!
//! A [`CrossThreadPersistentRegion`] has the same node lifecycle as
//! [`HandleRegistry`](super::HandleRegistry) but is safe for concurrent
//! create/destroy/assign from any thread. All mutation funnels through one
//! [`PersistentRegionLock`] supplied by the embedding heap; a region's node
//! space is touched only while that lock is held.
//!
//! # Safety
//!
//! The single load-bearing contract: a handle's destructor acquires the
//! region lock before freeing its node. An unguarded free racing the
//! collector's root scan is a use-after-free, so `Drop` takes the lock
//! unconditionally (blocking, no timeout).

use std::cell::UnsafeCell;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::GcError;
use crate::heap::{ObjectRef, RegionId};
use crate::trace::RootVisitor;

use super::node_space::{NodeId, NodeSpace, NodeState, NodeWord};

// ============================================================================
// PersistentRegionLock
// ============================================================================

/// The one lock guarding every cross-thread persistent region of an
/// embedding heap.
///
/// Acquisition blocks unconditionally; there is no timeout or try-lock
/// surface because callers on this path have nothing useful to do without
/// the lock.
#[derive(Default)]
pub struct PersistentRegionLock {
    mutex: Mutex<()>,
}

impl PersistentRegionLock {
    /// Create a lock for a new embedding heap.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the lock.
    pub fn lock(&self) -> PersistentRegionGuard<'_> {
        PersistentRegionGuard {
            _guard: self.mutex.lock(),
            lock: self,
        }
    }

    /// Assert that some thread currently holds the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is free. Called by operations whose contract
    /// requires the caller to already hold it.
    pub fn assert_locked(&self) {
        assert!(
            self.mutex.is_locked(),
            "operation requires the persistent region lock"
        );
    }
}

/// RAII witness that the persistent region lock is held.
pub struct PersistentRegionGuard<'l> {
    _guard: MutexGuard<'l, ()>,
    lock: &'l PersistentRegionLock,
}

impl PersistentRegionGuard<'_> {
    fn covers(&self, region: &CrossThreadPersistentRegion) -> bool {
        std::ptr::eq(self.lock, region.lock.as_ref())
    }
}

// ============================================================================
// CrossThreadPersistentRegion
// ============================================================================

/// Node storage for cross-thread persistent handles of one heap region.
pub struct CrossThreadPersistentRegion {
    lock: Arc<PersistentRegionLock>,
    region_id: RegionId,
    /// Guarded by `lock`; never touched without a matching guard.
    space: UnsafeCell<NodeSpace>,
}

// SAFETY: The node space is only reached through guard-witnessed methods,
// and the guard proves the shared region lock is held.
unsafe impl Send for CrossThreadPersistentRegion {}
// SAFETY: See Send impl.
unsafe impl Sync for CrossThreadPersistentRegion {}

impl CrossThreadPersistentRegion {
    /// Create a region guarded by `lock` for pages tagged `region_id`.
    #[must_use]
    pub fn new(lock: Arc<PersistentRegionLock>, region_id: RegionId) -> Arc<Self> {
        Arc::new(Self {
            lock,
            region_id,
            space: UnsafeCell::new(NodeSpace::new()),
        })
    }

    /// Region id this region's nodes may hold values from.
    #[must_use]
    pub fn region_id(&self) -> RegionId {
        self.region_id
    }

    /// The lock guarding this region.
    #[must_use]
    pub fn lock_handle(&self) -> &Arc<PersistentRegionLock> {
        &self.lock
    }

    #[allow(clippy::mut_from_ref)]
    fn space_mut(&self, guard: &PersistentRegionGuard<'_>) -> &mut NodeSpace {
        assert!(
            guard.covers(self),
            "persistent region guard belongs to a different lock"
        );
        // SAFETY: The guard proves the region lock is held, and every path
        // into the space goes through this method, so access is exclusive.
        unsafe { &mut *self.space.get() }
    }

    fn space_ref(&self, guard: &PersistentRegionGuard<'_>) -> &NodeSpace {
        self.space_mut(guard)
    }

    /// Number of live persistent handles in this region.
    pub fn handles_count(&self, guard: &PersistentRegionGuard<'_>) -> usize {
        self.space_ref(guard).handles_count()
    }

    /// Visit every live persistent root, for the collector's scan. The
    /// caller holds the lock for the duration, which is what keeps racing
    /// destructors out.
    pub fn iterate_roots(&self, guard: &PersistentRegionGuard<'_>, visitor: &mut dyn RootVisitor) {
        self.space_ref(guard).for_each_used_node(|_, node| {
            if let Some(value) = node.object() {
                visitor.trace(value);
            }
        });
    }

    fn allocate_node(
        &self,
        guard: &PersistentRegionGuard<'_>,
        value: ObjectRef,
    ) -> Result<NodeId, GcError> {
        let space = self.space_mut(guard);
        let id = space.allocate()?;
        let node = space.node(id);
        node.set_word(NodeWord::Object(value.address()));
        node.set_state(NodeState::StrongLive);
        Ok(id)
    }

    fn free_node(&self, guard: &PersistentRegionGuard<'_>, id: NodeId) {
        self.space_mut(guard).free(id);
    }
}

// ============================================================================
// CrossThreadHandle
// ============================================================================

/// Strong cross-thread persistent handle.
///
/// `Send + Sync`: the handle is an opaque token and every mutation takes
/// the shared region lock. Dropping it from any thread is safe; the node is
/// freed under the lock.
pub struct CrossThreadHandle {
    region: Arc<CrossThreadPersistentRegion>,
    node: Option<NodeId>,
}

impl CrossThreadHandle {
    /// Create a handle rooted in `region` holding `value`.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if growing node storage fails.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not belong to `region` (its page carries a
    /// different region id).
    pub fn new(
        region: &Arc<CrossThreadPersistentRegion>,
        value: ObjectRef,
    ) -> Result<Self, GcError> {
        assert_eq!(
            value.region_id(),
            region.region_id(),
            "value belongs to a different region"
        );
        let guard = region.lock.lock();
        let node = region.allocate_node(&guard, value)?;
        Ok(Self {
            region: Arc::clone(region),
            node: Some(node),
        })
    }

    /// Create an empty handle associated with `region`.
    #[must_use]
    pub fn empty(region: &Arc<CrossThreadPersistentRegion>) -> Self {
        Self {
            region: Arc::clone(region),
            node: None,
        }
    }

    /// Current referent, read under the lock.
    #[must_use]
    pub fn get(&self, guard: &PersistentRegionGuard<'_>) -> Option<ObjectRef> {
        self.node
            .and_then(|id| self.region.space_ref(guard).node(id).object())
    }

    /// Returns `true` if the handle currently roots an object.
    #[must_use]
    pub fn is_valid(&self, guard: &PersistentRegionGuard<'_>) -> bool {
        self.get(guard).is_some()
    }

    /// Assign a new referent, taking the lock internally.
    ///
    /// See [`assign_safe`](Self::assign_safe) for the fast-path contract.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if a fresh node is needed and node
    /// storage cannot grow.
    pub fn assign(
        &mut self,
        target: &Arc<CrossThreadPersistentRegion>,
        value: Option<ObjectRef>,
    ) -> Result<(), GcError> {
        let lock = Arc::clone(self.region.lock_handle());
        let guard = lock.lock();
        self.assign_safe(&guard, target, value)
    }

    /// Assign a new referent. The caller must already hold the region lock.
    ///
    /// If the handle's current referent is live and shares `value`'s
    /// region, the slot is overwritten in place (no alloc/free). Otherwise
    /// the old node (if any) is freed and a fresh node is allocated in
    /// `target` — skipped entirely when `value` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if node storage cannot grow.
    ///
    /// # Panics
    ///
    /// Panics if `value`'s page region does not match `target`, or if the
    /// guard belongs to a different lock than the regions involved.
    pub fn assign_safe(
        &mut self,
        guard: &PersistentRegionGuard<'_>,
        target: &Arc<CrossThreadPersistentRegion>,
        value: Option<ObjectRef>,
    ) -> Result<(), GcError> {
        if let Some(v) = value {
            assert_eq!(
                v.region_id(),
                target.region_id(),
                "value belongs to a different region than target"
            );

            // Fast path: live referent in the same region as the new value.
            if let Some(id) = self.node {
                let node = self.region.space_ref(guard).node(id);
                if node.object().is_some() && self.region.region_id() == v.region_id() {
                    node.set_word(NodeWord::Object(v.address()));
                    return Ok(());
                }
            }
        }

        if let Some(id) = self.node.take() {
            self.region.free_node(guard, id);
        }
        if let Some(v) = value {
            let id = target.allocate_node(guard, v)?;
            self.node = Some(id);
            self.region = Arc::clone(target);
        }
        Ok(())
    }

    /// Clear the handle, freeing its node under the lock.
    pub fn clear(&mut self) {
        if let Some(id) = self.node.take() {
            let lock = Arc::clone(self.region.lock_handle());
            let guard = lock.lock();
            self.region.free_node(&guard, id);
        }
    }

    /// The region currently owning this handle's node.
    #[must_use]
    pub fn region(&self) -> &Arc<CrossThreadPersistentRegion> {
        &self.region
    }
}

impl Clone for CrossThreadHandle {
    /// Clones allocate their own node (under the lock) so each handle has
    /// an independent lifetime.
    fn clone(&self) -> Self {
        let guard = self.region.lock.lock();
        let node = self.get(&guard).map(|value| {
            self.region
                .allocate_node(&guard, value)
                .expect("cloning a persistent handle")
        });
        Self {
            region: Arc::clone(&self.region),
            node,
        }
    }
}

impl Drop for CrossThreadHandle {
    /// Frees the node under the region lock. Racing the collector's root
    /// scan without the lock would be a use-after-free, so the lock is
    /// taken unconditionally, from whichever thread drops last.
    fn drop(&mut self) {
        if let Some(id) = self.node.take() {
            let lock = Arc::clone(self.region.lock_handle());
            let guard = lock.lock();
            self.region.free_node(&guard, id);
        }
    }
}

impl std::fmt::Debug for CrossThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossThreadHandle")
            .field("region", &self.region.region_id())
            .field("has_node", &self.node.is_some())
            .finish_non_exhaustive()
    }
}
