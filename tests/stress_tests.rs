//! Stress tests for descriptor churn
//!
//! Each loop runs well past the per-user inotify instance limit and the
//! usual descriptor limits, so a leak on any path shows up as a
//! resource-exhausted failure.

use fdkit::{ErrorKind, Eventfd, Eventlike, Inotify, Memfd, SealFlags, WatchMask};

const ROUNDS: usize = 2048;

#[test]
fn stress_inotify_create_and_close() {
    for _ in 0..ROUNDS {
        let mut inotify = Inotify::new().unwrap();
        inotify.close().unwrap();
    }
}

#[test]
fn stress_inotify_create_and_drop() {
    let dir = tempfile::tempdir().unwrap();
    for _ in 0..ROUNDS {
        let inotify = Inotify::new().unwrap();
        inotify.add_watch(dir.path(), WatchMask::CREATE).unwrap();
    }
}

#[test]
fn stress_memfd_seal_cycles() {
    for i in 0..ROUNDS {
        let memfd = Memfd::new(&format!("stress-{}", i)).unwrap();
        memfd.write_at(b"x", 0).unwrap();
        memfd.revoke(SealFlags::GROW | SealFlags::SHRINK).unwrap();
        assert!(!memfd.growable().unwrap());
    }
}

#[test]
fn stress_eventfd_counter() {
    let efd = Eventfd::new(0).unwrap();
    for i in 1..=ROUNDS as u64 {
        efd.write(i).unwrap();
    }
    let expected = (ROUNDS as u64) * (ROUNDS as u64 + 1) / 2;
    assert_eq!(efd.read().unwrap(), expected);
}

#[test]
fn stress_many_watches_on_one_instance() {
    let dir = tempfile::tempdir().unwrap();
    let inotify = Inotify::new().unwrap();
    let mut wds = Vec::new();
    for i in 0..64 {
        let sub = dir.path().join(format!("d{}", i));
        std::fs::create_dir(&sub).unwrap();
        wds.push(inotify.add_watch(&sub, WatchMask::ALL_EVENTS).unwrap());
    }
    for wd in wds {
        inotify.rm_watch(wd).unwrap();
    }
    let err = inotify
        .add_watch(dir.path().join("missing"), WatchMask::CREATE)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
