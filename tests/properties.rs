//! Property tests for read-after-write and derived caching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cellstore::StateStore;
use proptest::prelude::*;

proptest! {
    #[test]
    fn read_returns_last_write(writes in prop::collection::vec(any::<i64>(), 1..64)) {
        let store = StateStore::new();
        let cell = store.create_cell("cell", 0_i64).unwrap();

        for value in &writes {
            store.write(cell, *value).unwrap();
        }

        prop_assert_eq!(store.read(cell).unwrap(), *writes.last().unwrap());
        prop_assert_eq!(store.version(cell).unwrap(), writes.len() as u64);
    }

    #[test]
    fn derived_recomputes_once_per_dependency_change(
        // (cell index, value, reads after the write)
        steps in prop::collection::vec((0usize..3, any::<i32>(), 0usize..4), 0..32),
    ) {
        let store = StateStore::new();
        let a = store.create_cell("a", 0_i32).unwrap();
        let b = store.create_cell("b", 0_i32).unwrap();
        let unrelated = store.create_cell("unrelated", 0_i32).unwrap();

        let computes = Arc::new(AtomicUsize::new(0));
        let counter = computes.clone();
        let sum = store
            .derive((a, b), move |(a, b)| {
                counter.fetch_add(1, Ordering::SeqCst);
                i64::from(a) + i64::from(b)
            })
            .unwrap();

        let (mut va, mut vb) = (0_i32, 0_i32);
        let mut expected_computes = 0;
        let mut stale = true;

        for (target, value, reads) in steps {
            match target {
                0 => { store.write(a, value).unwrap(); va = value; stale = true; }
                1 => { store.write(b, value).unwrap(); vb = value; stale = true; }
                _ => { store.write(unrelated, value).unwrap(); }
            }
            for _ in 0..reads {
                if stale {
                    expected_computes += 1;
                    stale = false;
                }
                prop_assert_eq!(store.read_derived(sum).unwrap(), i64::from(va) + i64::from(vb));
            }
            prop_assert_eq!(computes.load(Ordering::SeqCst), expected_computes);
        }
    }

    #[test]
    fn unsubscribed_callback_sees_nothing_more(
        before in 0usize..8,
        after in 0usize..8,
    ) {
        let store = StateStore::new();
        let cell = store.create_cell("cell", 0_usize).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sub = store
            .subscribe(cell, move |_: &usize, _: &usize| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        for i in 0..before {
            store.write(cell, i).unwrap();
        }
        sub.unsubscribe();
        for i in 0..after {
            store.write(cell, i).unwrap();
        }

        prop_assert_eq!(calls.load(Ordering::SeqCst), before);
    }
}
