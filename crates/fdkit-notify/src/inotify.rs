//! inotify event source

use std::os::fd::AsRawFd;
use std::path::Path;

use fdkit_core::error::{CallSite, ErrorKind, Result};
use fdkit_core::{ffi, impl_eventlike, probe, Handle};
use log::debug;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

use crate::decode::{decode_inotify, INOTIFY_HEADER_LEN};
use crate::event::{InotifyEvent, WatchDescriptor};
use crate::mask::WatchMask;

/// Longest entry name the kernel reports.
const NAME_MAX: usize = 255;

/// Smallest read guaranteed to hold one record.
pub const INOTIFY_MIN_READ: usize = INOTIFY_HEADER_LEN + NAME_MAX + 1;

static INIT: CallSite = CallSite::new(
    "inotify_init1",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
    ],
);

static ADD_WATCH: CallSite = CallSite::new(
    "inotify_add_watch",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EFAULT, ErrorKind::InvalidArgument),
        (Errno::ENOENT, ErrorKind::InvalidArgument),
        (Errno::ENAMETOOLONG, ErrorKind::InvalidArgument),
        (Errno::ENOTDIR, ErrorKind::InvalidArgument),
        (Errno::EACCES, ErrorKind::PermissionDenied),
        (Errno::ENOSPC, ErrorKind::ResourceExhausted),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
    ],
);

static RM_WATCH: CallSite = CallSite::new(
    "inotify_rm_watch",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
    ],
);

/// How an inotify instance is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InotifyConfig {
    /// Reads fail with would-block instead of waiting.
    pub nonblocking: bool,
    /// Close the descriptor across exec.
    pub cloexec: bool,
}

impl Default for InotifyConfig {
    fn default() -> Self {
        Self {
            nonblocking: false,
            cloexec: true,
        }
    }
}

impl InotifyConfig {
    pub fn nonblocking() -> Self {
        Self {
            nonblocking: true,
            ..Self::default()
        }
    }

    fn init_flags(&self) -> libc::c_int {
        let mut flags = 0;
        if self.nonblocking {
            flags |= libc::IN_NONBLOCK;
        }
        if self.cloexec {
            flags |= libc::IN_CLOEXEC;
        }
        flags
    }
}

/// An inotify instance and the watches registered on it
pub struct Inotify {
    handle: Handle,
    nonblocking: bool,
}

impl_eventlike!(Inotify, display);

impl Inotify {
    /// Create a blocking, close-on-exec instance.
    pub fn new() -> Result<Self> {
        Self::with_config(&InotifyConfig::default())
    }

    pub fn with_config(config: &InotifyConfig) -> Result<Self> {
        let fd = INIT.check(unsafe { libc::inotify_init1(config.init_flags()) })?;
        debug!("created inotify instance fd={} ({:?})", fd, config);
        Ok(Self {
            handle: unsafe { Handle::from_raw(fd) },
            nonblocking: config.nonblocking,
        })
    }

    /// Watch `path` for the events in `mask`.
    ///
    /// Watching a path that is already watched returns the existing
    /// descriptor and replaces its mask, unless `WatchMask::MASK_ADD` is set.
    pub fn add_watch<P: AsRef<Path>>(&self, path: P, mask: WatchMask) -> Result<WatchDescriptor> {
        let path = path.as_ref();
        let c_path = ffi::c_path(path)?;
        let fd = self.handle.as_fd()?;
        let wd = ADD_WATCH.check(unsafe {
            libc::inotify_add_watch(fd.as_raw_fd(), c_path.as_ptr(), mask.bits())
        })?;
        debug!("added watch {} on {} ({:?})", wd, path.display(), mask);
        Ok(WatchDescriptor(wd))
    }

    /// Remove a watch. The kernel queues an `IGNORED` record for it.
    pub fn rm_watch(&self, wd: WatchDescriptor) -> Result<()> {
        let fd = self.handle.as_fd()?;
        RM_WATCH.check(unsafe { libc::inotify_rm_watch(fd.as_raw_fd(), wd.as_raw()) })?;
        debug!("removed watch {}", wd.as_raw());
        Ok(())
    }

    /// Perform one read cycle and decode everything it returned.
    ///
    /// A blocking instance waits for the next event when nothing is queued;
    /// a non-blocking one fails with [`ErrorKind::WouldBlock`].
    pub fn read_events(&self) -> Result<Vec<InotifyEvent>> {
        let buf = probe::read_available(self.handle.as_fd()?, INOTIFY_MIN_READ)?;
        decode_inotify(&buf)
    }

    /// Bytes currently queued.
    pub fn pending(&self) -> Result<usize> {
        probe::buffered_len(self.handle.as_fd()?)
    }

    pub fn is_blocking(&self) -> bool {
        !self.nonblocking
    }
}

impl std::fmt::Debug for Inotify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inotify")
            .field("handle", &self.handle)
            .field("nonblocking", &self.nonblocking)
            .finish()
    }
}
