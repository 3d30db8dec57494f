//! Handle registries: stable, opaque roots into the managed heap.
//!
//! A [`HandleRegistry`] owns node storage for regular global handles on a
//! single heap; [`CrossThreadPersistentRegion`](cross_thread::CrossThreadPersistentRegion)
//! is the lock-guarded variant safe for concurrent create/destroy. Handles
//! are opaque (block, index) ids; callers never touch node slots directly.

pub mod cross_thread;
mod node_space;

pub use node_space::{NodeState, WeakCallback, WeaknessType, NODE_BLOCK_SIZE};

use std::ffi::c_void;

use crate::error::GcError;
use crate::heap::ObjectRef;
use crate::trace::RootVisitor;
use crate::tracing::internal as trc;

use node_space::{NodeId, NodeSpace, NodeWord};

// ============================================================================
// Handle
// ============================================================================

/// Opaque handle to a registry node.
///
/// Valid from `create` until `destroy` (or until the weak-callback protocol
/// retires the node). A handle is meaningful only against the registry that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NodeId);

/// Delivery context handed to a [`WeakCallback`].
pub struct WeakCallbackInfo {
    parameter: *mut c_void,
    value: Option<ObjectRef>,
}

impl WeakCallbackInfo {
    /// The parameter registered in `make_weak`.
    #[must_use]
    pub fn parameter(&self) -> *mut c_void {
        self.parameter
    }

    /// The dying referent.
    ///
    /// `Some` for normal callbacks (pass 1, referent still valid); `None`
    /// for phantom callbacks, whose slot was cleared before delivery.
    #[must_use]
    pub fn value(&self) -> Option<ObjectRef> {
        self.value
    }
}

/// A queued pass-2 phantom callback.
struct PhantomCallbackTask {
    callback: WeakCallback,
    parameter: *mut c_void,
}

// ============================================================================
// HandleRegistry
// ============================================================================

/// Registry of global handles for one heap.
///
/// Single-threaded by construction: the owning heap calls in from its main
/// thread, and the collector iterates roots while mutators are parked.
pub struct HandleRegistry {
    space: NodeSpace,
    /// Nodes created since the last minor collection.
    young_nodes: Vec<NodeId>,
    /// Phantom callbacks cleared in pass 1, delivered in pass 2.
    pending_phantom_callbacks: Vec<PhantomCallbackTask>,
}

impl HandleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            space: NodeSpace::new(),
            young_nodes: Vec::new(),
            pending_phantom_callbacks: Vec::new(),
        }
    }

    /// Number of live handles (creates minus destroys).
    #[must_use]
    pub fn handles_count(&self) -> usize {
        self.space.handles_count()
    }

    /// Allocate a node holding `value` and return its handle.
    ///
    /// New nodes start strong and join the young list.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if growing node storage fails.
    pub fn create(&mut self, value: ObjectRef) -> Result<Handle, GcError> {
        let id = self.space.allocate()?;
        let node = self.space.node(id);
        node.set_word(NodeWord::Object(value.address()));
        node.set_state(NodeState::StrongLive);
        node.set_young(true);
        self.young_nodes.push(id);
        Ok(Handle(id))
    }

    /// Destroy a handle, returning its node to the freelist.
    ///
    /// The slot is zeroed defensively before recycling.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already destroyed; a double destroy is a
    /// lifetime bug in the embedder, not a recoverable condition.
    pub fn destroy(&mut self, handle: Handle) {
        let node = self.space.node(handle.0);
        assert!(
            node.state() != NodeState::Unused,
            "destroy() on a dead handle"
        );
        self.space.free(handle.0);
    }

    /// Current referent of `handle`, if the slot holds an object.
    ///
    /// Returns `None` for cleared (sentinel) and null slots.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<ObjectRef> {
        self.space.node(handle.0).object()
    }

    /// Lifecycle state of the node behind `handle`.
    #[must_use]
    pub fn state(&self, handle: Handle) -> NodeState {
        self.space.node(handle.0).state()
    }

    /// Embedder class id attached to the node (0 if unset).
    #[must_use]
    pub fn class_id(&self, handle: Handle) -> u16 {
        self.space.node(handle.0).class_id()
    }

    /// Attach an embedder class id to the node.
    pub fn set_class_id(&mut self, handle: Handle, class_id: u16) {
        self.space.node(handle.0).set_class_id(class_id);
    }

    /// Turn a handle into a weak participant.
    ///
    /// `callback` fires with `parameter` when the collector finds the
    /// referent otherwise unreachable; delivery timing depends on
    /// `weakness` (see [`WeaknessType`]).
    ///
    /// # Panics
    ///
    /// Panics on a dead handle.
    pub fn make_weak(
        &mut self,
        handle: Handle,
        parameter: *mut c_void,
        callback: WeakCallback,
        weakness: WeaknessType,
    ) {
        let node = self.space.node(handle.0);
        assert!(
            node.state() != NodeState::Unused,
            "make_weak() on a dead handle"
        );
        node.set_state(NodeState::WeakLive);
        node.set_weakness(Some(weakness));
        node.set_parameter(parameter);
        node.set_callback(Some(callback));
    }

    /// Revert a weak handle to strong, returning the registered parameter.
    ///
    /// # Panics
    ///
    /// Panics unless the handle is currently weak.
    pub fn clear_weakness(&mut self, handle: Handle) -> *mut c_void {
        let node = self.space.node(handle.0);
        assert!(
            node.state() == NodeState::WeakLive,
            "clear_weakness() on a non-weak handle"
        );
        let parameter = node.parameter();
        node.set_state(NodeState::StrongLive);
        node.set_weakness(None);
        node.set_parameter(std::ptr::null_mut());
        node.set_callback(None);
        parameter
    }

    // ------------------------------------------------------------------------
    // Two-pass weak callback protocol
    // ------------------------------------------------------------------------

    /// Pass 1 of the weak-callback protocol. Runs while allocation is still
    /// unsafe (mid-collection).
    ///
    /// `is_dead` reports whether a referent is otherwise unreachable. For
    /// each dying weak node: normal callbacks fire immediately and see the
    /// still-valid referent (the callback may itself destroy the handle);
    /// phantom nodes have their slot cleared to the sentinel first and
    /// their callback queued for pass 2. Either way the node is retired.
    ///
    /// Returns the number of weak nodes processed.
    pub fn process_weak_handles(&mut self, mut is_dead: impl FnMut(ObjectRef) -> bool) -> usize {
        let mut dying = Vec::new();
        self.space.for_each_used_node(|id, node| {
            if node.state() == NodeState::WeakLive {
                if let Some(value) = node.object() {
                    if is_dead(value) {
                        dying.push(id);
                    }
                }
            }
        });

        let _span = trc::trace_weak_pass(1, dying.len());
        for id in &dying {
            let node = self.space.node(*id);
            // The callback in pass 1 may have destroyed this node already.
            if node.state() != NodeState::WeakLive {
                continue;
            }
            let callback = node.callback();
            let parameter = node.parameter();
            match node.weakness() {
                Some(WeaknessType::Normal) => {
                    // Referent still in the slot: normal callbacks observe
                    // the dying value.
                    let value = node.object();
                    if let Some(callback) = callback {
                        callback(&WeakCallbackInfo { parameter, value });
                    }
                    if self.space.node(*id).state() != NodeState::Unused {
                        self.space.free(*id);
                    }
                }
                Some(WeaknessType::Phantom) => {
                    // Clear before the callback can ever run.
                    node.set_word(NodeWord::Sentinel);
                    if let Some(callback) = callback {
                        self.pending_phantom_callbacks.push(PhantomCallbackTask {
                            callback,
                            parameter,
                        });
                    }
                    self.space.free(*id);
                }
                None => unreachable!("weak node without a weakness type"),
            }
        }
        dying.len()
    }

    /// Pass 2 of the weak-callback protocol. Runs once allocation is safe
    /// again; drains the phantom callbacks queued by pass 1.
    ///
    /// Returns the number of callbacks delivered.
    pub fn invoke_second_pass_phantom_callbacks(&mut self) -> usize {
        let tasks = std::mem::take(&mut self.pending_phantom_callbacks);
        let _span = trc::trace_weak_pass(2, tasks.len());
        let count = tasks.len();
        for task in tasks {
            (task.callback)(&WeakCallbackInfo {
                parameter: task.parameter,
                value: None,
            });
        }
        count
    }

    /// Number of phantom callbacks awaiting pass 2.
    #[must_use]
    pub fn pending_phantom_callback_count(&self) -> usize {
        self.pending_phantom_callbacks.len()
    }

    // ------------------------------------------------------------------------
    // Young-generation side list
    // ------------------------------------------------------------------------

    /// Drop nodes from the young list whose referent is no longer young (or
    /// whose node died). Survivors stay young; everyone else has the young
    /// flag cleared and leaves the list.
    pub fn update_list_of_young_nodes(&mut self, mut is_young: impl FnMut(ObjectRef) -> bool) {
        let space = &self.space;
        self.young_nodes.retain(|&id| {
            let node = space.node(id);
            if node.state() == NodeState::Unused || !node.is_young() {
                return false;
            }
            let keep = node.object().is_some_and(&mut is_young);
            if !keep {
                node.set_young(false);
            }
            keep
        });
    }

    /// Empty the young list, aging every node in it.
    pub fn clear_list_of_young_nodes(&mut self) {
        for &id in &self.young_nodes {
            self.space.node(id).set_young(false);
        }
        self.young_nodes.clear();
    }

    /// Number of nodes on the young list.
    #[must_use]
    pub fn young_nodes_count(&self) -> usize {
        self.young_nodes.len()
    }

    // ------------------------------------------------------------------------
    // Root iteration
    // ------------------------------------------------------------------------

    /// Visit every strong root.
    pub fn iterate_strong_roots(&self, visitor: &mut dyn RootVisitor) {
        self.space.for_each_used_node(|_, node| {
            if node.state() == NodeState::StrongLive {
                if let Some(value) = node.object() {
                    visitor.trace(value);
                }
            }
        });
    }

    /// Visit every weak root whose slot still holds an object.
    pub fn iterate_weak_roots(&self, visitor: &mut dyn RootVisitor) {
        self.space.for_each_used_node(|_, node| {
            if node.state() == NodeState::WeakLive {
                if let Some(value) = node.object() {
                    visitor.trace(value);
                }
            }
        });
    }

    /// Visit every root, strong and weak.
    pub fn iterate_all_roots(&self, visitor: &mut dyn RootVisitor) {
        self.space.for_each_used_node(|_, node| {
            if let Some(value) = node.object() {
                visitor.trace(value);
            }
        });
    }

    /// Visit only roots on the young list (minor GC avoids scanning the
    /// full registry).
    pub fn iterate_young_roots(&self, visitor: &mut dyn RootVisitor) {
        for &id in &self.young_nodes {
            let node = self.space.node(id);
            if node.state() != NodeState::Unused {
                if let Some(value) = node.object() {
                    visitor.trace(value);
                }
            }
        }
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
