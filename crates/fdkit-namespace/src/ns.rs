//! Leaving and joining namespaces
//!
//! Both operations change the calling thread's view of the system for the
//! rest of its life. Tests run them in a forked child.

use std::fmt;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use fdkit_core::error::{CallSite, ErrorKind, Result};
use fdkit_core::{ffi, impl_eventlike, Handle};
use log::debug;
use nix::errno::Errno;
use nix::unistd::Pid;

use crate::config::{NamespaceConfig, NamespaceType};

static UNSHARE: CallSite = CallSite::new(
    "unshare",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EUSERS, ErrorKind::PermissionDenied),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
        (Errno::ENOSPC, ErrorKind::ResourceExhausted),
    ],
);

static SETNS: CallSite = CallSite::new(
    "setns",
    &[
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
    ],
);

// Under /proc/self a missing entry means the kernel lacks the namespace type.
static OPEN_OWN_NS: CallSite = CallSite::new(
    "open(/proc/self/ns)",
    &[
        (Errno::ENOENT, ErrorKind::NotSupported),
        (Errno::EACCES, ErrorKind::PermissionDenied),
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
    ],
);

// Under /proc/<pid> it almost always means the process does not exist.
static OPEN_PID_NS: CallSite = CallSite::new(
    "open(/proc/<pid>/ns)",
    &[
        (Errno::ENOENT, ErrorKind::InvalidArgument),
        (Errno::ESRCH, ErrorKind::InvalidArgument),
        (Errno::EACCES, ErrorKind::PermissionDenied),
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
    ],
);

fn open_site(pid: Option<Pid>) -> &'static CallSite {
    match pid {
        Some(_) => &OPEN_PID_NS,
        None => &OPEN_OWN_NS,
    }
}

static FSTAT: CallSite = CallSite::new(
    "fstat",
    &[
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EOVERFLOW, ErrorKind::InternalFault),
    ],
);

fn ns_path(ns: NamespaceType, pid: Option<Pid>) -> PathBuf {
    match pid {
        Some(pid) => PathBuf::from(format!("/proc/{}/ns/{}", pid.as_raw(), ns.proc_name())),
        None => PathBuf::from(format!("/proc/self/ns/{}", ns.proc_name())),
    }
}

/// Move the calling thread into fresh namespaces of the selected types.
///
/// A new PID namespace only applies to children forked afterwards.
pub fn unshare(config: &NamespaceConfig) -> Result<()> {
    let flags = config.to_clone_flags();
    UNSHARE.check(unsafe { libc::unshare(flags.bits()) })?;
    debug!("unshared namespaces {:?}", flags);
    Ok(())
}

/// A descriptor on a namespace, as found under `/proc/<pid>/ns/`
///
/// Holding it keeps the namespace alive even after every process has left.
pub struct NamespaceFd {
    handle: Handle,
    ns_type: NamespaceType,
}

impl_eventlike!(NamespaceFd);

impl NamespaceFd {
    /// Open the namespace of `pid`, or of the calling process.
    pub fn open(ns_type: NamespaceType, pid: Option<Pid>) -> Result<Self> {
        let path = ns_path(ns_type, pid);
        let c_path = ffi::c_path(&path)?;
        let fd = open_site(pid).check(unsafe {
            libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC)
        })?;
        debug!("opened {} fd={}", path.display(), fd);
        Ok(Self {
            handle: unsafe { Handle::from_raw(fd) },
            ns_type,
        })
    }

    pub fn ns_type(&self) -> NamespaceType {
        self.ns_type
    }

    /// Inode number identifying the namespace.
    pub fn inode(&self) -> Result<u64> {
        let fd = self.handle.as_fd()?;
        let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
        FSTAT.check(unsafe { libc::fstat(fd.as_raw_fd(), stat.as_mut_ptr()) })?;
        let stat = unsafe { stat.assume_init() };
        Ok(stat.st_ino)
    }
}

impl fmt::Display for NamespaceFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<NamespaceFd fd={} type={}>",
            self.handle.display_fd(),
            self.ns_type
        )
    }
}

impl fmt::Debug for NamespaceFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceFd")
            .field("handle", &self.handle)
            .field("ns_type", &self.ns_type)
            .finish()
    }
}

/// Join the namespace `ns` refers to.
///
/// With `expected` set the kernel refuses a descriptor of another type.
pub fn setns(ns: &NamespaceFd, expected: Option<NamespaceType>) -> Result<()> {
    let fd = ns.handle.as_fd()?;
    let nstype = expected.map_or(0, |t| t.clone_flag().bits());
    SETNS.check(unsafe { libc::setns(fd.as_raw_fd(), nstype) })?;
    debug!("joined {} namespace via fd {}", ns.ns_type, fd.as_raw_fd());
    Ok(())
}

/// Inode of a process's namespace without opening it.
pub fn namespace_inode(ns: NamespaceType, pid: Option<Pid>) -> Result<u64> {
    let metadata =
        std::fs::metadata(ns_path(ns, pid)).map_err(|e| open_site(pid).io_error(e))?;
    Ok(metadata.ino())
}

/// Whether two processes (None for the caller) are in the same namespace.
pub fn shares_namespace(ns: NamespaceType, a: Option<Pid>, b: Option<Pid>) -> Result<bool> {
    Ok(namespace_inode(ns, a)? == namespace_inode(ns, b)?)
}
