//! Integration tests for cross-thread persistent handles.
//!
//! These verify the lock-funneled lifecycle: concurrent create/destroy from
//! arbitrary threads, the same-region assignment fast path, and root
//! iteration under the lock.

use std::sync::Arc;
use std::thread;

use tether_gc::{
    CrossThreadHandle, CrossThreadPersistentRegion, ObjectRef, Page, PersistentRegionLock,
    RegionId,
};

fn region_with_page(id: u32) -> (Arc<CrossThreadPersistentRegion>, Page) {
    let lock = PersistentRegionLock::new();
    let region = CrossThreadPersistentRegion::new(lock, RegionId(id));
    (region, Page::new(RegionId(id)))
}

#[test]
fn test_concurrent_destroy_of_distinct_handles() {
    let (region, page) = region_with_page(1);

    let handles: Vec<CrossThreadHandle> = (0..32)
        .map(|i| CrossThreadHandle::new(&region, page.object_at(64 + i * 16)).unwrap())
        .collect();
    {
        let guard = region.lock_handle().lock();
        assert_eq!(region.handles_count(&guard), 32);
    }

    // Drop every handle from its own thread; the freelist must survive.
    let threads: Vec<_> = handles
        .into_iter()
        .map(|handle| thread::spawn(move || drop(handle)))
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let guard = region.lock_handle().lock();
    assert_eq!(region.handles_count(&guard), 0);
}

#[test]
fn test_freelist_consistent_after_concurrent_churn() {
    let (region, page) = region_with_page(1);

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let region = Arc::clone(&region);
            let obj = page.object_at(64 + i * 16);
            thread::spawn(move || {
                for _ in 0..50 {
                    let handle = CrossThreadHandle::new(&region, obj).unwrap();
                    drop(handle);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let guard = region.lock_handle().lock();
    assert_eq!(region.handles_count(&guard), 0);

    // Nodes freed concurrently are all reusable afterwards.
    drop(guard);
    let survivors: Vec<_> = (0..16)
        .map(|i| CrossThreadHandle::new(&region, page.object_at(64 + i * 16)).unwrap())
        .collect();
    let guard = region.lock_handle().lock();
    assert_eq!(region.handles_count(&guard), survivors.len());
}

#[test]
fn test_handles_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CrossThreadHandle>();
    assert_send_sync::<CrossThreadPersistentRegion>();
}

#[test]
fn test_handle_created_on_one_thread_dropped_on_another() {
    let (region, page) = region_with_page(1);
    let handle = CrossThreadHandle::new(&region, page.object_at(64)).unwrap();

    let (sender, receiver) = std::sync::mpsc::channel();
    sender.send(handle).unwrap();

    let worker = thread::spawn(move || {
        let handle = receiver.recv().unwrap();
        drop(handle);
    });
    worker.join().unwrap();

    let guard = region.lock_handle().lock();
    assert_eq!(region.handles_count(&guard), 0);
}

#[test]
fn test_clone_allocates_independent_node() {
    let (region, page) = region_with_page(1);
    let original = CrossThreadHandle::new(&region, page.object_at(64)).unwrap();
    let clone = original.clone();

    {
        let guard = region.lock_handle().lock();
        assert_eq!(region.handles_count(&guard), 2);
    }

    drop(original);
    let guard = region.lock_handle().lock();
    assert_eq!(region.handles_count(&guard), 1);
    assert_eq!(clone.get(&guard), Some(page.object_at(64)));
}

#[test]
fn test_root_iteration_under_the_lock() {
    let (region, page) = region_with_page(1);
    let _a = CrossThreadHandle::new(&region, page.object_at(64)).unwrap();
    let _b = CrossThreadHandle::new(&region, page.object_at(128)).unwrap();

    let guard = region.lock_handle().lock();
    let mut seen = Vec::new();
    region.iterate_roots(&guard, &mut |v: ObjectRef| seen.push(v));
    seen.sort_by_key(|v| v.address());
    assert_eq!(seen, vec![page.object_at(64), page.object_at(128)]);
}

#[test]
fn test_assign_fast_path_preserves_node_across_threads() {
    let (region, page) = region_with_page(1);
    let mut handle = CrossThreadHandle::new(&region, page.object_at(64)).unwrap();
    let replacement = page.object_at(192);

    let worker = thread::spawn(move || {
        let target = Arc::clone(handle.region());
        handle.assign(&target, Some(replacement))?;
        Ok::<CrossThreadHandle, tether_gc::GcError>(handle)
    });
    let handle = worker.join().unwrap().unwrap();

    let guard = region.lock_handle().lock();
    assert_eq!(handle.get(&guard), Some(replacement));
    assert_eq!(region.handles_count(&guard), 1);
}
