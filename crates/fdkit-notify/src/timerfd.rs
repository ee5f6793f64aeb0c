//! timerfd: timer expirations delivered through a descriptor

use std::fmt;
use std::os::fd::AsRawFd;
use std::time::Duration;

use fdkit_core::error::{CallSite, ErrorKind, FdkitError, Result};
use fdkit_core::{impl_eventlike, Handle};
use log::debug;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

static CREATE: CallSite = CallSite::new(
    "timerfd_create",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
        (Errno::ENODEV, ErrorKind::NotSupported),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
        (Errno::EPERM, ErrorKind::PermissionDenied),
    ],
);

static GETTIME: CallSite = CallSite::new(
    "timerfd_gettime",
    &[
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EFAULT, ErrorKind::InternalFault),
    ],
);

static SETTIME: CallSite = CallSite::new(
    "timerfd_settime",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EFAULT, ErrorKind::InternalFault),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
        (Errno::ENODEV, ErrorKind::NotSupported),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
        (Errno::ECANCELED, ErrorKind::RetryLater),
    ],
);

static READ: CallSite = CallSite::new(
    "read(timerfd)",
    &[
        (Errno::EAGAIN, ErrorKind::WouldBlock),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::ECANCELED, ErrorKind::RetryLater),
    ],
);

/// Clock a timer counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Clock {
    /// Wall-clock time; jumps when the system time is set.
    Realtime,
    #[default]
    Monotonic,
    /// Like `Monotonic` but keeps counting while suspended.
    Boottime,
}

impl Clock {
    fn id(self) -> libc::clockid_t {
        match self {
            Clock::Realtime => libc::CLOCK_REALTIME,
            Clock::Monotonic => libc::CLOCK_MONOTONIC,
            Clock::Boottime => libc::CLOCK_BOOTTIME,
        }
    }
}

/// First expiry and repeat interval of a timer
///
/// A zero offset disarms the timer; a zero interval makes it fire once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerVal {
    pub offset: Duration,
    pub interval: Duration,
}

impl TimerVal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `seconds` + `nanos` from now.
    pub fn offset(mut self, seconds: u64, nanos: u32) -> Self {
        self.offset = span(seconds, nanos);
        self
    }

    /// Fire again every `seconds` + `nanos` after the first expiry.
    pub fn repeats(mut self, seconds: u64, nanos: u32) -> Self {
        self.interval = span(seconds, nanos);
        self
    }

    pub fn is_disarmed(&self) -> bool {
        self.offset.is_zero()
    }

    fn to_itimerspec(self) -> Result<libc::itimerspec> {
        Ok(libc::itimerspec {
            it_value: to_timespec(self.offset)?,
            it_interval: to_timespec(self.interval)?,
        })
    }

    fn from_itimerspec(spec: &libc::itimerspec) -> Self {
        Self {
            offset: from_timespec(&spec.it_value),
            interval: from_timespec(&spec.it_interval),
        }
    }
}

impl fmt::Display for TimerVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<TimerVal offset={}s {}ns interval={}s {}ns>",
            self.offset.as_secs(),
            self.offset.subsec_nanos(),
            self.interval.as_secs(),
            self.interval.subsec_nanos()
        )
    }
}

fn span(seconds: u64, nanos: u32) -> Duration {
    Duration::from_secs(seconds).saturating_add(Duration::from_nanos(u64::from(nanos)))
}

fn to_timespec(d: Duration) -> Result<libc::timespec> {
    let tv_sec = libc::time_t::try_from(d.as_secs())
        .map_err(|_| FdkitError::InvalidArgument(format!("{:?} does not fit a timespec", d)))?;
    Ok(libc::timespec {
        tv_sec,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    })
}

fn from_timespec(ts: &libc::timespec) -> Duration {
    Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.clamp(0, 999_999_999) as u32)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub clock: Clock,
    pub nonblocking: bool,
    pub cloexec: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            clock: Clock::default(),
            nonblocking: false,
            cloexec: true,
        }
    }
}

impl TimerConfig {
    pub fn nonblocking() -> Self {
        Self {
            nonblocking: true,
            ..Self::default()
        }
    }

    fn flags(&self) -> libc::c_int {
        let mut flags = 0;
        if self.nonblocking {
            flags |= libc::TFD_NONBLOCK;
        }
        if self.cloexec {
            flags |= libc::TFD_CLOEXEC;
        }
        flags
    }
}

/// A kernel timer whose expirations are read as a counter
pub struct Timer {
    handle: Handle,
    clock: Clock,
    nonblocking: bool,
}

impl_eventlike!(Timer, display);

impl Timer {
    /// A disarmed, blocking monotonic timer.
    pub fn new() -> Result<Self> {
        Self::with_config(&TimerConfig::default())
    }

    pub fn with_config(config: &TimerConfig) -> Result<Self> {
        let fd = CREATE.check(unsafe { libc::timerfd_create(config.clock.id(), config.flags()) })?;
        debug!("created timerfd fd={} ({:?})", fd, config);
        Ok(Self {
            handle: unsafe { Handle::from_raw(fd) },
            clock: config.clock,
            nonblocking: config.nonblocking,
        })
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Arm (or, with a zero offset, disarm) the timer relative to now.
    /// Returns the setting it replaced.
    pub fn arm(&self, value: &TimerVal) -> Result<TimerVal> {
        let fd = self.handle.as_fd()?;
        let new = value.to_itimerspec()?;
        let mut old = std::mem::MaybeUninit::<libc::itimerspec>::uninit();
        SETTIME.check(unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &new, old.as_mut_ptr()) })?;
        let old = unsafe { old.assume_init() };
        debug!("armed timerfd fd={} with {}", fd.as_raw_fd(), value);
        Ok(TimerVal::from_itimerspec(&old))
    }

    pub fn disarm(&self) -> Result<TimerVal> {
        self.arm(&TimerVal::new())
    }

    /// Time left until the next expiry, and the repeat interval.
    pub fn remaining(&self) -> Result<TimerVal> {
        let fd = self.handle.as_fd()?;
        let mut current = std::mem::MaybeUninit::<libc::itimerspec>::uninit();
        GETTIME.check(unsafe { libc::timerfd_gettime(fd.as_raw_fd(), current.as_mut_ptr()) })?;
        let current = unsafe { current.assume_init() };
        Ok(TimerVal::from_itimerspec(&current))
    }

    /// Number of expirations since the last read.
    ///
    /// Blocks until the timer fires unless the descriptor is non-blocking,
    /// in which case it fails with would-block.
    pub fn read(&self) -> Result<u64> {
        let fd = self.handle.as_fd()?;
        let mut expirations = 0u64;
        READ.check(unsafe {
            libc::read(
                fd.as_raw_fd(),
                &mut expirations as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        })?;
        Ok(expirations)
    }

    pub fn is_blocking(&self) -> bool {
        !self.nonblocking
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("handle", &self.handle)
            .field("clock", &self.clock)
            .field("nonblocking", &self.nonblocking)
            .finish()
    }
}
