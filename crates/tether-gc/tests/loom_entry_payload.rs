//! Loom tests for entity-table entry atomicity.
//!
//! These verify that concurrent readers of the single payload word never
//! observe a torn tag+pointer pair, and that mark racing a reader leaves
//! the entry in one of the two expected states.

use std::sync::Arc;

use tether_gc::table::{Entry, EntityTag, Payload};

const TAG: EntityTag = EntityTag(3);
const PTR_A: u64 = 0x6000_0000_1001;
const PTR_B: u64 = 0x6000_0000_2001;

/// A reader racing a whole-word store sees exactly the old or new pair,
/// never a mix.
#[test]
#[ignore = "loom test - run with cargo test loom_entry --release"]
fn test_reader_never_sees_torn_payload() {
    loom::model(|| {
        let entry = Arc::new(Entry::zapped());
        entry.store(Payload::for_trusted_pointer_entry(PTR_A, TAG));

        let writer = loom::thread::spawn({
            let entry = Arc::clone(&entry);
            move || entry.store(Payload::for_trusted_pointer_entry(PTR_B, TAG))
        });

        let reader = loom::thread::spawn({
            let entry = Arc::clone(&entry);
            move || entry.load().untag(TAG)
        });

        writer.join().unwrap();
        let seen = reader.join().unwrap();
        assert!(
            seen == PTR_A || seen == PTR_B,
            "torn payload observed: {seen:#x}"
        );
    });
}

/// Marking concurrently with a reader preserves the address bits.
#[test]
#[ignore = "loom test - run with cargo test loom_entry --release"]
fn test_mark_does_not_disturb_address() {
    loom::model(|| {
        let entry = Arc::new(Entry::zapped());
        entry.store(Payload::for_trusted_pointer_entry(PTR_A, TAG));

        let marker = loom::thread::spawn({
            let entry = Arc::clone(&entry);
            move || entry.mark()
        });

        let reader = loom::thread::spawn({
            let entry = Arc::clone(&entry);
            move || entry.load().untag(TAG)
        });

        marker.join().unwrap();
        assert_eq!(reader.join().unwrap(), PTR_A);
        assert!(entry.load().is_marked());
    });
}
