//! Smoke tests for structured tracing emission.
//!
//! Only compiled with the `tracing` feature; exercises the instrumented
//! paths under a real subscriber so span construction is covered.

#![cfg(feature = "tracing")]

use tether_gc::safepoint::ThreadRegistry;
use tether_gc::{
    CollectorState, EntitySpace, EntityTable, EntityTag, HandleRegistry, Page, RegionId,
    WeaknessType,
};

fn with_subscriber(f: impl FnOnce()) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    tracing::subscriber::with_default(subscriber, f);
}

#[test]
fn test_weak_passes_emit_spans() {
    with_subscriber(|| {
        let page = Page::new(RegionId(0));
        let mut registry = HandleRegistry::new();
        let h = registry.create(page.object_at(64)).unwrap();

        fn noop(_: &tether_gc::WeakCallbackInfo) {}
        registry.make_weak(h, std::ptr::null_mut(), noop, WeaknessType::Phantom);
        registry.process_weak_handles(|_| true);
        registry.invoke_second_pass_phantom_callbacks();
    });
}

#[test]
fn test_table_sweep_and_barrier_emit_events() {
    with_subscriber(|| {
        let registry = ThreadRegistry::new();
        let table = EntityTable::new().unwrap();
        let space = EntitySpace::new();
        table
            .allocate_and_initialize_entry(&space, 0x1001, EntityTag(1))
            .unwrap();
        table.sweep(&space, &registry.enter_safepoint());

        let state = CollectorState::new();
        state.set_barrier_enabled(true);
        state.set_barrier_enabled(false);
    });
}
