//! fanotify event source
//!
//! Every group needs `CAP_SYS_ADMIN`. Events carry an open descriptor on the
//! accessed file; [`Fanotify::read_events`] adopts those descriptors so they
//! are closed when the event is dropped.

use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use fdkit_core::error::{CallSite, ErrorKind, FdkitError, Result};
use fdkit_core::{ffi, impl_eventlike, probe, Handle};
use log::{debug, warn};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

use crate::decode::decode_fanotify_prefix;
use crate::event::{AccessMode, EventRecord, FanotifyRecord, Origin};
use crate::mask::FanMask;

/// Read size used when nothing is queued yet.
pub const FANOTIFY_MIN_READ: usize = 4096;

static INIT: CallSite = CallSite::new(
    "fanotify_init",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::ENOSYS, ErrorKind::NotSupported),
    ],
);

static MARK: CallSite = CallSite::new(
    "fanotify_mark",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::ENOENT, ErrorKind::InvalidArgument),
        (Errno::ENOTDIR, ErrorKind::InvalidArgument),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
        (Errno::ENOSPC, ErrorKind::ResourceExhausted),
        (Errno::EXDEV, ErrorKind::NotSupported),
        (Errno::EOPNOTSUPP, ErrorKind::NotSupported),
        (Errno::ENODEV, ErrorKind::NotSupported),
    ],
);

static RESPOND: CallSite = CallSite::new(
    "write(fanotify_response)",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::ENOENT, ErrorKind::InvalidArgument),
        (Errno::EAGAIN, ErrorKind::WouldBlock),
    ],
);

bitflags! {
    /// Modifiers for a mark operation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MarkFlags: libc::c_uint {
        /// Mark a symbolic link itself rather than its target.
        const DONT_FOLLOW = libc::FAN_MARK_DONT_FOLLOW;
        /// Fail unless the path is a directory.
        const ONLYDIR = libc::FAN_MARK_ONLYDIR;
        /// Mark the mount containing the path.
        const MOUNT = libc::FAN_MARK_MOUNT;
        /// Mark the whole filesystem containing the path.
        const FILESYSTEM = libc::FAN_MARK_FILESYSTEM;
        /// The mask names events to ignore.
        const IGNORED_MASK = libc::FAN_MARK_IGNORED_MASK;
        /// Keep the ignore mask when the file is modified.
        const IGNORED_SURV_MODIFY = libc::FAN_MARK_IGNORED_SURV_MODIFY;
    }
}

/// Which class of listener a group is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationClass {
    /// Plain notifications, no permission decisions.
    #[default]
    Notif,
    /// Permission decisions once the file content is final.
    Content,
    /// Permission decisions before the content is final (HSM style).
    PreContent,
}

impl NotificationClass {
    fn bits(self) -> libc::c_uint {
        match self {
            NotificationClass::Notif => libc::FAN_CLASS_NOTIF,
            NotificationClass::Content => libc::FAN_CLASS_CONTENT,
            NotificationClass::PreContent => libc::FAN_CLASS_PRE_CONTENT,
        }
    }
}

/// How a fanotify group is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanotifyConfig {
    pub class: NotificationClass,
    pub nonblocking: bool,
    pub cloexec: bool,
    pub unlimited_queue: bool,
    pub unlimited_marks: bool,
    /// Mode event descriptors are opened with.
    pub access: AccessMode,
    /// Close event descriptors across exec.
    pub event_cloexec: bool,
}

impl Default for FanotifyConfig {
    fn default() -> Self {
        Self {
            class: NotificationClass::Notif,
            nonblocking: false,
            cloexec: true,
            unlimited_queue: false,
            unlimited_marks: false,
            access: AccessMode::ReadOnly,
            event_cloexec: true,
        }
    }
}

impl FanotifyConfig {
    /// A group that answers open and access permission requests.
    pub fn permission() -> Self {
        Self {
            class: NotificationClass::Content,
            ..Self::default()
        }
    }

    fn init_flags(&self) -> libc::c_uint {
        let mut flags = self.class.bits();
        if self.nonblocking {
            flags |= libc::FAN_NONBLOCK;
        }
        if self.cloexec {
            flags |= libc::FAN_CLOEXEC;
        }
        if self.unlimited_queue {
            flags |= libc::FAN_UNLIMITED_QUEUE;
        }
        if self.unlimited_marks {
            flags |= libc::FAN_UNLIMITED_MARKS;
        }
        flags
    }

    fn event_flags(&self) -> libc::c_int {
        let mut flags = self.access.open_flags() | libc::O_LARGEFILE;
        if self.event_cloexec {
            flags |= libc::O_CLOEXEC;
        }
        flags
    }
}

/// Verdict for a permission event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Allow,
    Deny,
}

impl Response {
    fn bits(self) -> u32 {
        match self {
            Response::Allow => libc::FAN_ALLOW,
            Response::Deny => libc::FAN_DENY,
        }
    }
}

/// A fanotify event that owns its file descriptor
pub struct FanotifyEvent {
    record: FanotifyRecord,
    fd: Option<OwnedFd>,
}

impl FanotifyEvent {
    /// Adopt the descriptor a decoded record refers to.
    ///
    /// # Safety
    ///
    /// `record.fd` must be a descriptor the kernel installed for this process
    /// and that nothing else owns.
    unsafe fn adopt(record: FanotifyRecord) -> Self {
        let fd = record.fd.map(|raw| OwnedFd::from_raw_fd(raw));
        Self { record, fd }
    }

    pub fn record(&self) -> &FanotifyRecord {
        &self.record
    }

    pub fn mask(&self) -> FanMask {
        self.record.mask
    }

    pub fn pid(&self) -> i32 {
        self.record.pid
    }

    /// Descriptor on the file the event concerns; `None` for queue overflow.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd)
    }

    pub fn into_fd(self) -> Option<OwnedFd> {
        self.fd
    }

    pub fn is_overflow(&self) -> bool {
        self.record.mask.contains(FanMask::Q_OVERFLOW)
    }

    pub fn needs_response(&self) -> bool {
        self.record.mask.needs_response()
    }

    /// Resolve the path of the file through `/proc/self/fd`.
    pub fn path(&self) -> Result<PathBuf> {
        let fd = self
            .fd
            .as_ref()
            .ok_or_else(|| FdkitError::InvalidArgument("event carries no descriptor".into()))?;
        Ok(std::fs::read_link(format!("/proc/self/fd/{}", fd.as_raw_fd()))?)
    }
}

impl EventRecord for FanotifyEvent {
    fn origin(&self) -> Origin<'_> {
        Origin::File {
            fd: self.fd.as_ref().map(AsRawFd::as_raw_fd),
            pid: self.record.pid,
        }
    }

    fn mask_bits(&self) -> u64 {
        self.record.mask.bits()
    }
}

impl fmt::Debug for FanotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanotifyEvent")
            .field("mask", &self.record.mask)
            .field("fd", &self.fd)
            .field("pid", &self.record.pid)
            .finish()
    }
}

enum MarkAction {
    Add,
    Remove,
    Flush,
}

impl MarkAction {
    fn bits(&self) -> libc::c_uint {
        match self {
            MarkAction::Add => libc::FAN_MARK_ADD,
            MarkAction::Remove => libc::FAN_MARK_REMOVE,
            MarkAction::Flush => libc::FAN_MARK_FLUSH,
        }
    }
}

/// A fanotify notification group
pub struct Fanotify {
    handle: Handle,
    nonblocking: bool,
    event_flags: libc::c_int,
}

impl_eventlike!(Fanotify, display);

impl Fanotify {
    pub fn with_config(config: &FanotifyConfig) -> Result<Self> {
        let event_flags = config.event_flags();
        let fd = INIT.check(unsafe {
            libc::fanotify_init(config.init_flags(), event_flags as libc::c_uint)
        })?;
        debug!("created fanotify group fd={} ({:?})", fd, config);
        Ok(Self {
            handle: unsafe { Handle::from_raw(fd) },
            nonblocking: config.nonblocking,
            event_flags,
        })
    }

    fn mark(
        &self,
        action: MarkAction,
        path: Option<&Path>,
        mask: FanMask,
        flags: MarkFlags,
    ) -> Result<()> {
        let fd = self.handle.as_fd()?;
        let c_path = path.map(ffi::c_path).transpose()?;
        let path_ptr = c_path
            .as_ref()
            .map_or(std::ptr::null(), |p| p.as_ptr());
        MARK.check(unsafe {
            libc::fanotify_mark(
                fd.as_raw_fd(),
                action.bits() | flags.bits(),
                mask.bits(),
                libc::AT_FDCWD,
                path_ptr,
            )
        })?;
        Ok(())
    }

    /// Start reporting `mask` events on `path`.
    pub fn watch<P: AsRef<Path>>(&self, path: P, mask: FanMask, flags: MarkFlags) -> Result<()> {
        let path = path.as_ref();
        self.mark(MarkAction::Add, Some(path), mask, flags)?;
        debug!("fanotify mark added on {} ({:?})", path.display(), mask);
        Ok(())
    }

    /// Stop reporting `mask` events on `path`.
    pub fn ignore<P: AsRef<Path>>(&self, path: P, mask: FanMask, flags: MarkFlags) -> Result<()> {
        let path = path.as_ref();
        self.mark(MarkAction::Remove, Some(path), mask, flags)?;
        debug!("fanotify mark removed on {} ({:?})", path.display(), mask);
        Ok(())
    }

    pub fn del_watch<P: AsRef<Path>>(&self, path: P, mask: FanMask, flags: MarkFlags) -> Result<()> {
        self.ignore(path, mask, flags)
    }

    /// Drop every inode mark, or every mount / filesystem mark when
    /// `flags` says so.
    pub fn flush(&self, flags: MarkFlags) -> Result<()> {
        self.mark(MarkAction::Flush, None, FanMask::empty(), flags)?;
        debug!("fanotify marks flushed ({:?})", flags);
        Ok(())
    }

    /// Perform one read cycle, decode it and take ownership of the event
    /// descriptors.
    pub fn read_events(&self) -> Result<Vec<FanotifyEvent>> {
        let buf = probe::read_available(self.handle.as_fd()?, FANOTIFY_MIN_READ)?;
        unsafe { adopt_buffer(&buf, self.access_mode()) }
    }

    /// Answer a permission event.
    pub fn respond(&self, event: &FanotifyEvent, response: Response) -> Result<()> {
        let event_fd = event.fd().ok_or_else(|| {
            FdkitError::InvalidArgument("cannot respond to an event without a descriptor".into())
        })?;
        let reply = libc::fanotify_response {
            fd: event_fd.as_raw_fd(),
            response: response.bits(),
        };
        let len = std::mem::size_of::<libc::fanotify_response>();
        let fd = self.handle.as_fd()?;
        let written = RESPOND.check(unsafe {
            libc::write(
                fd.as_raw_fd(),
                &reply as *const libc::fanotify_response as *const libc::c_void,
                len,
            )
        })?;
        if written as usize != len {
            return Err(FdkitError::InvalidState {
                op: "write(fanotify_response)",
                reason: format!("short write of {} bytes", written),
            });
        }
        debug!("responded {:?} to fd {}", response, reply.fd);
        Ok(())
    }

    /// Mode the group opens event descriptors with.
    pub fn access_mode(&self) -> AccessMode {
        AccessMode::from_open_flags(self.event_flags)
    }

    pub fn is_blocking(&self) -> bool {
        !self.nonblocking
    }
}

impl fmt::Debug for Fanotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanotify")
            .field("handle", &self.handle)
            .field("access", &self.access_mode())
            .field("nonblocking", &self.nonblocking)
            .finish()
    }
}

/// Decode a fanotify read and adopt every descriptor it carries.
///
/// When the buffer is malformed, descriptors from the records decoded before
/// the fault are closed before the error is returned.
///
/// # Safety
///
/// `buf` must come straight from a read of a fanotify group in this process,
/// so that every descriptor in it is installed here and owned by no one else.
unsafe fn adopt_buffer(buf: &[u8], access: AccessMode) -> Result<Vec<FanotifyEvent>> {
    let (records, fault) = decode_fanotify_prefix(buf, access);
    let events: Vec<FanotifyEvent> = records
        .into_iter()
        .map(|record| {
            if !record.check_version() {
                warn!(
                    "fanotify metadata version {} differs from {}",
                    record.version,
                    libc::FANOTIFY_METADATA_VERSION
                );
            }
            FanotifyEvent::adopt(record)
        })
        .collect();
    match fault {
        None => Ok(events),
        Some(err) => {
            warn!(
                "closing {} event descriptors from a malformed fanotify read: {}",
                events.iter().filter(|e| e.fd.is_some()).count(),
                err
            );
            drop(events);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_init_flags() {
        let config = FanotifyConfig::default();
        assert_eq!(config.init_flags(), libc::FAN_CLASS_NOTIF | libc::FAN_CLOEXEC);
        assert_eq!(
            AccessMode::from_open_flags(config.event_flags()),
            AccessMode::ReadOnly
        );
    }

    #[test]
    fn test_event_flags_carry_access_mode() {
        let config = FanotifyConfig {
            access: AccessMode::ReadWrite,
            event_cloexec: false,
            ..FanotifyConfig::default()
        };
        let flags = config.event_flags();
        assert_eq!(flags & libc::O_CLOEXEC, 0);
        assert_eq!(AccessMode::from_open_flags(flags), AccessMode::ReadWrite);
    }

    #[test]
    fn test_permission_config() {
        let config = FanotifyConfig::permission();
        assert_eq!(config.class, NotificationClass::Content);
        assert_ne!(config.init_flags() & libc::FAN_CLASS_CONTENT, 0);
    }

    #[test]
    fn test_config_from_json() {
        let config: FanotifyConfig =
            serde_json::from_str(r#"{"class": "pre-content", "access": "write-only"}"#).unwrap();
        assert_eq!(config.class, NotificationClass::PreContent);
        assert_eq!(config.access, AccessMode::WriteOnly);
        assert!(config.cloexec);
    }

    #[test]
    fn test_mark_site_classification() {
        assert_eq!(MARK.classify(Errno::EXDEV), ErrorKind::NotSupported);
        assert_eq!(MARK.classify(Errno::ENOSPC), ErrorKind::ResourceExhausted);
        assert_eq!(INIT.classify(Errno::EPERM), ErrorKind::PermissionDenied);
        assert_eq!(RESPOND.classify(Errno::EAGAIN), ErrorKind::WouldBlock);
    }

    fn spare_fd() -> i32 {
        // Park it high so a concurrent test cannot reuse the number at once.
        let efd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        assert!(efd >= 0);
        let fd = unsafe { libc::fcntl(efd, libc::F_DUPFD_CLOEXEC, 700) };
        assert!(fd >= 700);
        unsafe { libc::close(efd) };
        fd
    }

    fn is_open(fd: i32) -> bool {
        unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
    }

    fn metadata(fd: i32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&24u32.to_ne_bytes());
        out.push(libc::FANOTIFY_METADATA_VERSION);
        out.push(0);
        out.extend_from_slice(&24u16.to_ne_bytes());
        out.extend_from_slice(&(libc::FAN_OPEN as u64).to_ne_bytes());
        out.extend_from_slice(&fd.to_ne_bytes());
        out.extend_from_slice(&1i32.to_ne_bytes());
        out
    }

    #[test]
    fn test_well_formed_read_adopts_descriptors() {
        let fd = spare_fd();
        let buf = metadata(fd);
        let events = unsafe { adopt_buffer(&buf, AccessMode::ReadOnly) }.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd().unwrap().as_raw_fd(), fd);
        assert!(is_open(fd));
        drop(events);
        assert!(!is_open(fd));
    }

    #[test]
    fn test_malformed_read_closes_decoded_descriptors() {
        let first = spare_fd();
        let second = spare_fd();
        let mut buf = metadata(first);
        buf.extend_from_slice(&metadata(second));
        buf.extend_from_slice(&[0u8; 10]);

        let err = unsafe { adopt_buffer(&buf, AccessMode::ReadOnly) }.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalFault);
        assert!(!is_open(first));
        assert!(!is_open(second));
    }

    #[test]
    fn test_event_without_fd_is_overflow_shaped() {
        let record = FanotifyRecord {
            version: libc::FANOTIFY_METADATA_VERSION,
            mask: FanMask::Q_OVERFLOW,
            fd: None,
            pid: 0,
            event_len: 24,
            access: AccessMode::ReadOnly,
        };
        let event = unsafe { FanotifyEvent::adopt(record) };
        assert!(event.is_overflow());
        assert!(event.fd().is_none());
        assert_eq!(event.path().unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(event.origin(), Origin::File { fd: None, pid: 0 });
    }

    #[test]
    #[ignore] // Requires CAP_SYS_ADMIN
    fn test_watch_tempdir_reports_open() {
        let dir = tempfile::tempdir().unwrap();
        let fan = Fanotify::with_config(&FanotifyConfig::default()).unwrap();
        fan.watch(dir.path(), FanMask::OPEN | FanMask::EVENT_ON_CHILD, MarkFlags::empty())
            .unwrap();

        let file = dir.path().join("touched");
        std::fs::write(&file, b"x").unwrap();

        let events = fan.read_events().unwrap();
        assert!(events.iter().any(|e| e.mask().contains(FanMask::OPEN)));
        assert!(events.iter().all(|e| e.record().access == AccessMode::ReadOnly));
    }
}
