//! Cooperative safepoints.
//!
//! Mutator threads register with a [`ThreadRegistry`] and flip between
//! Running and Parked; sweeping and freelist surgery happen only inside a
//! [`GlobalSafepointScope`], which can be entered only while no registered
//! mutator is Running. The state machine is advisory for scheduling but its
//! violations are hard failures: a sweep racing a running mutator is memory
//! corruption, not a recoverable condition.

use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// ThreadRegistry
// ============================================================================

/// Registry of mutator threads participating in cooperative safepoints.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    /// Number of registered mutators currently Running.
    running: AtomicUsize,
    /// Number of registered mutators in any state.
    registered: AtomicUsize,
}

impl ThreadRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            running: AtomicUsize::new(0),
            registered: AtomicUsize::new(0),
        }
    }

    /// Register the calling thread as a mutator, initially Running.
    pub fn register(&self) -> MutatorThread<'_> {
        self.registered.fetch_add(1, Ordering::Relaxed);
        self.running.fetch_add(1, Ordering::AcqRel);
        MutatorThread {
            registry: self,
            running: true,
        }
    }

    /// Number of mutators currently Running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Number of registered mutators, Running or Parked.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    /// Enter a global safepoint.
    ///
    /// # Panics
    ///
    /// Panics if any registered mutator is still Running. Reaching a
    /// safepoint is the scheduler's job; this layer only verifies it.
    pub fn enter_safepoint(&self) -> GlobalSafepointScope<'_> {
        let running = self.running_count();
        assert!(
            running == 0,
            "global safepoint entered with {running} mutator(s) still running"
        );
        GlobalSafepointScope { _registry: self }
    }
}

// ============================================================================
// MutatorThread
// ============================================================================

/// Per-thread Running/Parked state machine.
///
/// Dropping a `MutatorThread` unregisters it (parking it first if needed).
#[derive(Debug)]
pub struct MutatorThread<'r> {
    registry: &'r ThreadRegistry,
    running: bool,
}

impl<'r> MutatorThread<'r> {
    /// Returns `true` while this mutator is Running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Park this mutator: it promises not to touch the heap until the
    /// returned scope is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the mutator is already Parked.
    pub fn park(&mut self) -> ParkedScope<'_, 'r> {
        assert!(self.running, "park() on an already-parked mutator");
        self.running = false;
        self.registry.running.fetch_sub(1, Ordering::AcqRel);
        ParkedScope { mutator: self }
    }
}

impl Drop for MutatorThread<'_> {
    fn drop(&mut self) {
        if self.running {
            self.registry.running.fetch_sub(1, Ordering::AcqRel);
        }
        self.registry.registered.fetch_sub(1, Ordering::Relaxed);
    }
}

/// RAII scope during which a mutator is Parked.
#[derive(Debug)]
pub struct ParkedScope<'m, 'r> {
    mutator: &'m mut MutatorThread<'r>,
}

impl Drop for ParkedScope<'_, '_> {
    fn drop(&mut self) {
        self.mutator.running = true;
        self.mutator.registry.running.fetch_add(1, Ordering::AcqRel);
    }
}

// ============================================================================
// GlobalSafepointScope
// ============================================================================

/// Witness that all registered mutators are parked.
///
/// Operations that mutate freelists non-atomically (table sweep, node-space
/// sweep support) take this by reference instead of re-checking the world
/// themselves.
#[derive(Debug)]
pub struct GlobalSafepointScope<'r> {
    _registry: &'r ThreadRegistry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safepoint_requires_all_parked() {
        let registry = ThreadRegistry::new();
        let mut mutator = registry.register();
        assert_eq!(registry.running_count(), 1);

        {
            let _parked = mutator.park();
            assert_eq!(registry.running_count(), 0);
            let _scope = registry.enter_safepoint();
        }

        // Unparked again after the scope ends.
        assert_eq!(registry.running_count(), 1);
    }

    #[test]
    #[should_panic(expected = "mutator(s) still running")]
    fn test_safepoint_panics_with_running_mutator() {
        let registry = ThreadRegistry::new();
        let _mutator = registry.register();
        let _ = registry.enter_safepoint();
    }

    #[test]
    fn test_drop_while_running_unregisters() {
        let registry = ThreadRegistry::new();
        {
            let _a = registry.register();
            let _b = registry.register();
            assert_eq!(registry.running_count(), 2);
        }
        assert_eq!(registry.running_count(), 0);
        let _scope = registry.enter_safepoint();
    }
}
