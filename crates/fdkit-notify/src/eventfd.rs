//! eventfd counter

use std::os::fd::AsRawFd;

use fdkit_core::error::{CallSite, ErrorKind, FdkitError, Result};
use fdkit_core::{impl_eventlike, Handle};
use log::debug;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

static CREATE: CallSite = CallSite::new(
    "eventfd",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
        (Errno::ENODEV, ErrorKind::NotSupported),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
    ],
);

static READ: CallSite = CallSite::new(
    "read(eventfd)",
    &[
        (Errno::EAGAIN, ErrorKind::WouldBlock),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
    ],
);

static WRITE: CallSite = CallSite::new(
    "write(eventfd)",
    &[
        (Errno::EAGAIN, ErrorKind::WouldBlock),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
    ],
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventfdConfig {
    /// Starting counter value.
    pub initial: u32,
    /// Each read takes one unit instead of draining the counter.
    pub semaphore: bool,
    pub nonblocking: bool,
    pub cloexec: bool,
}

impl Default for EventfdConfig {
    fn default() -> Self {
        Self {
            initial: 0,
            semaphore: false,
            nonblocking: false,
            cloexec: true,
        }
    }
}

impl EventfdConfig {
    pub fn semaphore(initial: u32) -> Self {
        Self {
            initial,
            semaphore: true,
            ..Self::default()
        }
    }

    fn flags(&self) -> libc::c_int {
        let mut flags = 0;
        if self.semaphore {
            flags |= libc::EFD_SEMAPHORE;
        }
        if self.nonblocking {
            flags |= libc::EFD_NONBLOCK;
        }
        if self.cloexec {
            flags |= libc::EFD_CLOEXEC;
        }
        flags
    }
}

/// A kernel-held 64-bit counter usable as a wakeup channel
pub struct Eventfd {
    handle: Handle,
    nonblocking: bool,
}

impl_eventlike!(Eventfd, display);

impl Eventfd {
    pub fn new(initial: u32) -> Result<Self> {
        Self::with_config(&EventfdConfig {
            initial,
            ..EventfdConfig::default()
        })
    }

    pub fn with_config(config: &EventfdConfig) -> Result<Self> {
        let fd = CREATE.check(unsafe { libc::eventfd(config.initial, config.flags()) })?;
        debug!("created eventfd fd={} ({:?})", fd, config);
        Ok(Self {
            handle: unsafe { Handle::from_raw(fd) },
            nonblocking: config.nonblocking,
        })
    }

    /// Take the counter (or one unit of it in semaphore mode).
    ///
    /// Blocks while the counter is zero unless the descriptor is
    /// non-blocking, in which case it fails with would-block.
    pub fn read(&self) -> Result<u64> {
        let fd = self.handle.as_fd()?;
        let mut value = 0u64;
        READ.check(unsafe {
            libc::read(
                fd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        })?;
        Ok(value)
    }

    /// Add `value` to the counter.
    pub fn write(&self, value: u64) -> Result<()> {
        if value == u64::MAX {
            return Err(FdkitError::InvalidArgument(
                "eventfd cannot be incremented by u64::MAX".into(),
            ));
        }
        let fd = self.handle.as_fd()?;
        WRITE.check(unsafe {
            libc::write(
                fd.as_raw_fd(),
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        })?;
        Ok(())
    }

    pub fn is_blocking(&self) -> bool {
        !self.nonblocking
    }
}

impl std::fmt::Debug for Eventfd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eventfd")
            .field("handle", &self.handle)
            .field("nonblocking", &self.nonblocking)
            .finish()
    }
}
