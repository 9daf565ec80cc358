//! Integration test: active handle registry under contention
//!
//! Many threads register, traverse and unregister concurrently; the registry
//! must never lose, duplicate or resurrect an entry.
//!
//! Run: cargo test -p iocancel-core --test registry_test

use iocancel_core::{ActiveRegistry, InterruptOutcome, IoHandle, cancel_all};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 16;

#[test]
fn concurrent_registrations_are_all_visible() {
    let registry = Arc::new(ActiveRegistry::new());
    let registered = Arc::new(Barrier::new(THREADS + 1));
    let release = Arc::new(Barrier::new(THREADS + 1));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let registered = Arc::clone(&registered);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                let _call = registry.enter(IoHandle::from_raw(1000 + i));
                registered.wait();
                release.wait();
            })
        })
        .collect();

    registered.wait();
    let mut seen = HashSet::new();
    let visited = registry.for_each_entry(|h| {
        assert!(seen.insert(h), "handle {h:?} visited twice");
    });
    assert_eq!(visited, THREADS);
    assert_eq!(seen.len(), THREADS);
    assert!((0..THREADS).all(|i| seen.contains(&IoHandle::from_raw(1000 + i))));

    release.wait();
    for w in workers {
        w.join().unwrap();
    }
    assert!(registry.is_empty());
    assert_eq!(registry.peak(), THREADS);
}

#[test]
fn churn_never_leaves_entries_behind() {
    let registry = Arc::new(ActiveRegistry::new());

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for round in 0..2_000 {
                    let token = registry.register(IoHandle::from_raw(i * 10_000 + round));
                    if round % 7 == 0 {
                        let _ = registry.snapshot();
                    }
                    assert!(registry.unregister(token));
                }
            })
        })
        .collect();

    // Broadcasts race with the churn; they must only ever see live entries.
    for _ in 0..200 {
        let report = cancel_all(&*registry, &|_: IoHandle| InterruptOutcome::Unsupported);
        assert!(report.visited <= THREADS);
        assert_eq!(report.visited, report.unsupported);
    }

    for w in workers {
        w.join().unwrap();
    }
    assert!(registry.is_empty());
    assert!(registry.snapshot().is_empty());
}

#[test]
fn unregistered_entry_never_reappears() {
    let registry = ActiveRegistry::new();
    let gone = registry.register(IoHandle::from_fd(7));
    let kept = registry.register(IoHandle::from_fd(8));
    assert!(registry.unregister(gone));

    // refill the freed slot with a different handle
    let reused = registry.register(IoHandle::from_fd(9));
    assert_eq!(
        registry.snapshot(),
        vec![IoHandle::from_fd(9), IoHandle::from_fd(8)]
    );

    assert!(registry.unregister(reused));
    assert!(registry.unregister(kept));
    assert!(registry.is_empty());
}
