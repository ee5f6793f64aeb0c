//! Integration tests for fdkit
//!
//! These exercise the facade end to end. Tests that require root are marked
//! with #[ignore] and can be run with:
//!   sudo cargo test -- --ignored

use std::collections::HashSet;
use std::fs;

use fdkit::fdkit_notify::{decode_inotify, MarkFlags, Signal};
use fdkit::{
    sealed_buffer, ErrorKind, Eventfd, Eventlike, FanMask, Fanotify, FdkitConfig, Inotify,
    KernelFeatures, MapOptions, Memfd, SealFlags, Signalfd, Timer, WatchMask,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_sources_built_from_one_config() {
    init_logging();
    let config = FdkitConfig::from_json_str(
        r#"{
            "inotify": {"nonblocking": true},
            "eventfd": {"nonblocking": true, "initial": 2},
            "memfd": {"len": 4096},
            "timer": {"nonblocking": true}
        }"#,
    )
    .unwrap();

    let inotify = Inotify::with_config(&config.inotify).unwrap();
    assert!(!inotify.is_blocking());
    assert_eq!(inotify.read_events().unwrap_err().kind(), ErrorKind::WouldBlock);

    let efd = Eventfd::with_config(&config.eventfd).unwrap();
    assert_eq!(efd.read().unwrap(), 2);

    let memfd = Memfd::with_config("from-config", &config.memfd).unwrap();
    assert_eq!(memfd.len().unwrap(), 4096);
    let region = memfd.map(&config.map).unwrap();
    assert_eq!(region.len(), 4096);

    let timer = Timer::with_config(&config.timer).unwrap();
    assert_eq!(timer.read().unwrap_err().kind(), ErrorKind::WouldBlock);
}

#[test]
#[allow(clippy::eq_op)]
fn test_event_sources_compare_by_descriptor() {
    let a = Eventfd::new(0).unwrap();
    let b = Eventfd::new(0).unwrap();
    let mut seen = HashSet::new();
    assert!(seen.insert(a.fileno().unwrap()));
    assert!(seen.insert(b.fileno().unwrap()));
    assert!(a != b);
    assert!(a == a);
}

#[test]
fn test_display_forms() {
    let efd = Eventfd::new(0).unwrap();
    let fd = efd.fileno().unwrap();
    assert_eq!(efd.to_string(), format!("<Eventfd fd={}>", fd));

    let memfd = Memfd::new("label").unwrap();
    assert!(memfd.to_string().ends_with("name='label'>"));

    let mut timer = Timer::new().unwrap();
    assert!(timer.to_string().starts_with("<Timer fd="));
    timer.close().unwrap();
    assert_eq!(timer.to_string(), "<Timer fd=closed>");

    let sfd = Signalfd::new(&[Signal::SIGUSR1]).unwrap();
    let fd = sfd.fileno().unwrap();
    assert_eq!(sfd.to_string(), format!("<Signalfd fd={}>", fd));
}

#[test]
fn test_watch_memfd_handoff_directory() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let inotify = Inotify::new().unwrap();
    inotify
        .add_watch(dir.path(), WatchMask::CLOSE_WRITE)
        .unwrap();

    let payload = sealed_buffer("handoff", b"report body").unwrap();
    let mut contents = vec![0u8; payload.len().unwrap() as usize];
    payload.read_at(&mut contents, 0).unwrap();
    fs::write(dir.path().join("report"), &contents).unwrap();

    let events = inotify.read_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name_lossy().unwrap(), "report");
}

#[test]
fn test_raw_buffer_decoding_through_facade() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&7i32.to_ne_bytes());
    buf.extend_from_slice(&0x100u32.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(&16u32.to_ne_bytes());
    let mut name = b"foo.txt".to_vec();
    name.resize(16, 0);
    buf.extend_from_slice(&name);

    let events = decode_inotify(&buf).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name_lossy().unwrap(), "foo.txt");

    let err = decode_inotify(&buf[..buf.len() - 4]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalFault);
}

#[test]
fn test_sealed_region_rejects_every_change() {
    let memfd = sealed_buffer("locked", b"0123456789").unwrap();
    assert_eq!(memfd.current_flags().unwrap(), SealFlags::all());
    assert_eq!(memfd.set_len(0).unwrap_err().kind(), ErrorKind::PermissionDenied);
    assert_eq!(memfd.set_len(100).unwrap_err().kind(), ErrorKind::PermissionDenied);
    assert_eq!(
        memfd.map(&MapOptions::default()).unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
    assert_eq!(memfd.revoke_write().unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_feature_summary() {
    let features = KernelFeatures::detect();
    let summary = features.summary();
    assert!(summary.contains("inotify"));
    assert!(summary.contains("[ok] memfd"));
}

#[test]
fn test_fanotify_without_privileges_is_permission_denied() {
    if KernelFeatures::detect().can_fanotify {
        return;
    }
    let err = Fanotify::with_config(&FdkitConfig::default().fanotify).unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::PermissionDenied | ErrorKind::NotSupported),
        "{err}"
    );
}

#[test]
#[ignore] // Requires CAP_SYS_ADMIN
fn test_fanotify_flush_and_remove_marks() {
    let dir = tempfile::tempdir().unwrap();
    let fan = Fanotify::with_config(&FdkitConfig::default().fanotify).unwrap();
    fan.watch(dir.path(), FanMask::CLOSE_WRITE, MarkFlags::empty())
        .unwrap();
    fan.del_watch(dir.path(), FanMask::CLOSE_WRITE, MarkFlags::empty())
        .unwrap();
    fan.flush(MarkFlags::empty()).unwrap();
}
