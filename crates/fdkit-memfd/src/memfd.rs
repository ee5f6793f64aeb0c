//! Anonymous memory-backed files

use std::ffi::OsStr;
use std::fmt;
use std::os::fd::AsRawFd;

use fdkit_core::error::{CallSite, ErrorKind, FdkitError, Result};
use fdkit_core::{ffi, impl_eventlike, Handle};
use log::debug;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

static CREATE: CallSite = CallSite::new(
    "memfd_create",
    &[
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
        (Errno::ENODEV, ErrorKind::NotSupported),
        (Errno::ENOSYS, ErrorKind::NotSupported),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
        (Errno::EFAULT, ErrorKind::InternalFault),
    ],
);

static TRUNCATE: CallSite = CallSite::new(
    "ftruncate",
    &[
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EFBIG, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EIO, ErrorKind::InternalFault),
    ],
);

static PREAD: CallSite = CallSite::new(
    "pread",
    &[
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EFBIG, ErrorKind::InvalidArgument),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EAGAIN, ErrorKind::WouldBlock),
        (Errno::EIO, ErrorKind::InternalFault),
    ],
);

static PWRITE: CallSite = CallSite::new(
    "pwrite",
    &[
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EFBIG, ErrorKind::InvalidArgument),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EAGAIN, ErrorKind::WouldBlock),
        (Errno::EIO, ErrorKind::InternalFault),
    ],
);

static FSTAT: CallSite = CallSite::new(
    "fstat",
    &[
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EOVERFLOW, ErrorKind::InternalFault),
    ],
);

static DUP: CallSite = CallSite::new(
    "fcntl(F_DUPFD_CLOEXEC)",
    &[
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EMFILE, ErrorKind::ResourceExhausted),
    ],
);

/// How a memfd is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemfdConfig {
    /// Permit seals to be added later. Without it the region is born sealed.
    pub allow_sealing: bool,
    pub cloexec: bool,
    /// Size to truncate the region to right after creation.
    pub len: u64,
}

impl Default for MemfdConfig {
    fn default() -> Self {
        Self {
            allow_sealing: true,
            cloexec: true,
            len: 0,
        }
    }
}

impl MemfdConfig {
    pub fn with_len(len: u64) -> Self {
        Self {
            len,
            ..Self::default()
        }
    }

    fn flags(&self) -> libc::c_uint {
        let mut flags = 0;
        if self.allow_sealing {
            flags |= libc::MFD_ALLOW_SEALING;
        }
        if self.cloexec {
            flags |= libc::MFD_CLOEXEC;
        }
        flags
    }
}

/// A memory region reachable only through descriptors
///
/// The name is a debugging label (it shows up in `/proc/<pid>/fd`); it need
/// not be unique.
pub struct Memfd {
    pub(crate) handle: Handle,
    name: String,
    allow_sealing: bool,
}

impl_eventlike!(Memfd);

impl Memfd {
    /// Create an empty, sealable, close-on-exec region.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_config(name, &MemfdConfig::default())
    }

    pub fn with_config(name: &str, config: &MemfdConfig) -> Result<Self> {
        let c_name = ffi::c_string("memfd name", OsStr::new(name))?;
        let fd = CREATE.check(unsafe { libc::memfd_create(c_name.as_ptr(), config.flags()) })?;
        debug!("created memfd '{}' fd={} ({:?})", name, fd, config);

        let memfd = Self {
            handle: unsafe { Handle::from_raw(fd) },
            name: name.to_string(),
            allow_sealing: config.allow_sealing,
        };
        if config.len > 0 {
            memfd.set_len(config.len)?;
        }
        Ok(memfd)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allows_sealing(&self) -> bool {
        self.allow_sealing
    }

    /// Resize the region. Fails with permission-denied when a grow or
    /// shrink seal forbids the change.
    pub fn set_len(&self, len: u64) -> Result<()> {
        let len = libc::off_t::try_from(len)
            .map_err(|_| FdkitError::InvalidArgument(format!("length {} is too large", len)))?;
        let fd = self.handle.as_fd()?;
        TRUNCATE.check(unsafe { libc::ftruncate(fd.as_raw_fd(), len) })?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        let fd = self.handle.as_fd()?;
        let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
        FSTAT.check(unsafe { libc::fstat(fd.as_raw_fd(), stat.as_mut_ptr()) })?;
        let stat = unsafe { stat.assume_init() };
        Ok(stat.st_size as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Write `buf` at `offset`, growing the region if needed.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let offset = to_off_t(offset)?;
        let fd = self.handle.as_fd()?;
        let n = PWRITE.check(unsafe {
            libc::pwrite(
                fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                offset,
            )
        })?;
        Ok(n as usize)
    }

    /// Read into `buf` from `offset`. Returns 0 at the end of the region.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = to_off_t(offset)?;
        let fd = self.handle.as_fd()?;
        let n = PREAD.check(unsafe {
            libc::pread(
                fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                offset,
            )
        })?;
        Ok(n as usize)
    }

    /// Open a second descriptor on the same region.
    pub fn try_clone(&self) -> Result<Memfd> {
        let fd = self.handle.as_fd()?;
        let dup = DUP.check(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, 0) })?;
        debug!("duplicated memfd '{}' fd={} -> {}", self.name, fd.as_raw_fd(), dup);
        Ok(Self {
            handle: unsafe { Handle::from_raw(dup) },
            name: self.name.clone(),
            allow_sealing: self.allow_sealing,
        })
    }
}

fn to_off_t(offset: u64) -> Result<libc::off_t> {
    libc::off_t::try_from(offset)
        .map_err(|_| FdkitError::InvalidArgument(format!("offset {} is too large", offset)))
}

impl fmt::Display for Memfd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Memfd fd={} name='{}'>",
            self.handle.display_fd(),
            self.name
        )
    }
}

impl fmt::Debug for Memfd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memfd")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("allow_sealing", &self.allow_sealing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdkit_core::Eventlike;

    #[test]
    fn test_write_then_read_back() {
        let memfd = Memfd::new("rw").unwrap();
        assert!(memfd.is_empty().unwrap());
        assert_eq!(memfd.write_at(b"hello world", 0).unwrap(), 11);
        assert_eq!(memfd.len().unwrap(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(memfd.read_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(memfd.read_at(&mut buf, 11).unwrap(), 0);
    }

    #[test]
    fn test_initial_len_from_config() {
        let memfd = Memfd::with_config("sized", &MemfdConfig::with_len(4096)).unwrap();
        assert_eq!(memfd.len().unwrap(), 4096);
        memfd.set_len(10).unwrap();
        assert_eq!(memfd.len().unwrap(), 10);
    }

    #[test]
    fn test_display_includes_name() {
        let mut memfd = Memfd::new("scratch").unwrap();
        let fd = memfd.fileno().unwrap();
        assert_eq!(memfd.to_string(), format!("<Memfd fd={} name='scratch'>", fd));
        memfd.close().unwrap();
        assert_eq!(memfd.to_string(), "<Memfd fd=closed name='scratch'>");
    }

    #[test]
    fn test_name_with_nul_is_invalid_argument() {
        let err = Memfd::new("bad\0name").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_overlong_name_is_invalid_argument() {
        let name = "n".repeat(300);
        let err = Memfd::new(&name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn test_clone_is_a_distinct_descriptor() {
        let memfd = Memfd::new("dup").unwrap();
        let other = memfd.try_clone().unwrap();
        assert!(memfd != other);
        other.write_at(b"shared", 0).unwrap();
        assert_eq!(memfd.len().unwrap(), 6);
    }

    #[test]
    fn test_config_json_defaults() {
        let config: MemfdConfig = serde_json::from_str(r#"{"len": 64}"#).unwrap();
        assert_eq!(config.len, 64);
        assert!(config.allow_sealing);
        assert_eq!(config.flags(), libc::MFD_ALLOW_SEALING | libc::MFD_CLOEXEC);
    }
}
