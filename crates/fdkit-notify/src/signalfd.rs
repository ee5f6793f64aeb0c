//! signalfd: signals delivered as readable records
//!
//! Signals in the mask must also be blocked (see [`block_signals`]) or the
//! default disposition runs before the descriptor ever sees them. Blocking
//! applies to the calling thread only.

use std::fmt;
use std::os::fd::AsRawFd;

use fdkit_core::error::{CallSite, ErrorKind, FdkitError, Result};
use fdkit_core::{impl_eventlike, Handle};
use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use serde::{Deserialize, Serialize};

static CREATE: CallSite = CallSite::new(
    "signalfd",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
        (Errno::ENODEV, ErrorKind::NotSupported),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
    ],
);

static SIGMASK: CallSite = CallSite::new(
    "pthread_sigmask",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EFAULT, ErrorKind::InvalidArgument),
    ],
);

static READ: CallSite = CallSite::new(
    "read(signalfd)",
    &[
        (Errno::EAGAIN, ErrorKind::WouldBlock),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
    ],
);

const SIGINFO_LEN: usize = std::mem::size_of::<libc::signalfd_siginfo>();
const _: () = assert!(SIGINFO_LEN == 128);

fn sigset(signals: &[Signal]) -> SigSet {
    let mut set = SigSet::empty();
    for &signal in signals {
        set.add(signal);
    }
    set
}

/// Block `signals` for the calling thread so they queue for a [`Signalfd`].
/// Returns the mask that was in effect before.
pub fn block_signals(signals: &[Signal]) -> Result<SigSet> {
    let mut previous = SigSet::empty();
    nix::sys::signal::pthread_sigmask(
        SigmaskHow::SIG_BLOCK,
        Some(&sigset(signals)),
        Some(&mut previous),
    )
    .map_err(|e| SIGMASK.error(e))?;
    debug!("blocked {:?}", signals);
    Ok(previous)
}

/// Restore a mask saved by [`block_signals`].
pub fn restore_signal_mask(mask: &SigSet) -> Result<()> {
    nix::sys::signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(mask), None)
        .map_err(|e| SIGMASK.error(e))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalfdConfig {
    pub nonblocking: bool,
    pub cloexec: bool,
}

impl Default for SignalfdConfig {
    fn default() -> Self {
        Self {
            nonblocking: false,
            cloexec: true,
        }
    }
}

impl SignalfdConfig {
    pub fn nonblocking() -> Self {
        Self {
            nonblocking: true,
            ..Self::default()
        }
    }

    fn flags(&self) -> libc::c_int {
        let mut flags = 0;
        if self.nonblocking {
            flags |= libc::SFD_NONBLOCK;
        }
        if self.cloexec {
            flags |= libc::SFD_CLOEXEC;
        }
        flags
    }
}

/// One delivered signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    pub signo: i32,
    pub code: i32,
    pub pid: u32,
    pub uid: u32,
    pub status: i32,
}

impl SignalInfo {
    fn from_raw(raw: &libc::signalfd_siginfo) -> Self {
        Self {
            signo: raw.ssi_signo as i32,
            code: raw.ssi_code,
            pid: raw.ssi_pid,
            uid: raw.ssi_uid,
            status: raw.ssi_status,
        }
    }

    /// The signal, if it is one nix knows by name.
    pub fn signal(&self) -> Option<Signal> {
        Signal::try_from(self.signo).ok()
    }
}

/// A descriptor that receives the signals in its mask
pub struct Signalfd {
    handle: Handle,
    mask: SigSet,
    nonblocking: bool,
}

impl_eventlike!(Signalfd, display);

impl Signalfd {
    pub fn new(signals: &[Signal]) -> Result<Self> {
        Self::with_config(signals, &SignalfdConfig::default())
    }

    pub fn with_config(signals: &[Signal], config: &SignalfdConfig) -> Result<Self> {
        let mask = sigset(signals);
        let fd = CREATE.check(unsafe { libc::signalfd(-1, mask.as_ref(), config.flags()) })?;
        debug!("created signalfd fd={} for {:?} ({:?})", fd, signals, config);
        Ok(Self {
            handle: unsafe { Handle::from_raw(fd) },
            mask,
            nonblocking: config.nonblocking,
        })
    }

    pub fn mask(&self) -> &SigSet {
        &self.mask
    }

    /// Replace the set of signals this descriptor receives.
    pub fn set_mask(&mut self, signals: &[Signal]) -> Result<()> {
        let fd = self.handle.as_fd()?;
        let mask = sigset(signals);
        CREATE.check(unsafe { libc::signalfd(fd.as_raw_fd(), mask.as_ref(), 0) })?;
        self.mask = mask;
        Ok(())
    }

    /// Take the next pending signal.
    ///
    /// Blocks while none is pending unless the descriptor is non-blocking,
    /// in which case it fails with would-block.
    pub fn read(&self) -> Result<SignalInfo> {
        let fd = self.handle.as_fd()?;
        let mut raw = std::mem::MaybeUninit::<libc::signalfd_siginfo>::zeroed();
        let n = READ.check(unsafe {
            libc::read(
                fd.as_raw_fd(),
                raw.as_mut_ptr() as *mut libc::c_void,
                SIGINFO_LEN,
            )
        })?;
        if n as usize != SIGINFO_LEN {
            return Err(FdkitError::decode(
                0,
                format!("signalfd returned {} bytes, expected {}", n, SIGINFO_LEN),
            ));
        }
        let raw = unsafe { raw.assume_init() };
        Ok(SignalInfo::from_raw(&raw))
    }

    pub fn is_blocking(&self) -> bool {
        !self.nonblocking
    }
}

impl fmt::Debug for Signalfd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signalfd")
            .field("handle", &self.handle)
            .field("mask", &self.mask)
            .field("nonblocking", &self.nonblocking)
            .finish()
    }
}
