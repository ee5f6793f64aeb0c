//! Descriptor lifecycle shared by every event source
//!
//! A [`Handle`] owns exactly one kernel descriptor. Its state is tagged
//! explicitly: `Some(fd)` is OPEN, `None` is CLOSED. The descriptor number is
//! never used as a sentinel because the kernel hands the same small integer out
//! again as soon as it is released.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use log::{debug, warn};
use nix::errno::Errno;

use crate::error::{CallSite, ErrorKind, FdkitError, Result};

static CLOSE: CallSite = CallSite::new(
    "close",
    &[
        (Errno::EBADF, ErrorKind::InternalFault),
        (Errno::EIO, ErrorKind::InternalFault),
    ],
);

/// Owner of a single kernel descriptor
///
/// Two open handles compare equal iff they hold the same descriptor value.
/// A closed handle compares equal to nothing, itself included, which is why
/// `Handle` implements `PartialEq` and `Hash` but not `Eq`.
pub struct Handle {
    fd: Option<OwnedFd>,
}

impl Handle {
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// Adopt a descriptor returned by a factory syscall.
    ///
    /// # Safety
    ///
    /// `fd` must be open and not owned by anything else.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self::from_owned(OwnedFd::from_raw_fd(fd))
    }

    /// The live descriptor value.
    pub fn fileno(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| FdkitError::closed("fileno"))
    }

    /// Borrow the live descriptor.
    pub fn as_fd(&self) -> Result<BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        self.fd
            .as_ref()
            .map(AsFd::as_fd)
            .ok_or_else(|| FdkitError::closed("as_fd"))
    }

    /// Release the descriptor.
    ///
    /// The handle is CLOSED afterwards even if the kernel reports an error,
    /// since Linux frees the descriptor number regardless. A second call
    /// fails with [`ErrorKind::InvalidState`].
    pub fn close(&mut self) -> Result<()> {
        let fd = self.fd.take().ok_or_else(|| FdkitError::closed("close"))?;
        let raw = fd.into_raw_fd();
        debug!("closing fd {}", raw);
        CLOSE.check(unsafe { libc::close(raw) })?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    /// Renders as the descriptor value or `closed`.
    pub fn display_fd(&self) -> DisplayFd<'_> {
        DisplayFd(self)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            let raw = fd.into_raw_fd();
            if let Err(e) = CLOSE.check(unsafe { libc::close(raw) }) {
                warn!("failed to close fd {} on drop: {}", raw, e);
            }
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        match (self.fileno(), other.fileno()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fileno().ok().hash(state);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(fd={})", self.display_fd())
    }
}

pub struct DisplayFd<'a>(&'a Handle);

impl fmt::Display for DisplayFd<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.fileno() {
            Ok(fd) => write!(f, "{}", fd),
            Err(_) => f.write_str("closed"),
        }
    }
}

/// A descriptor-backed kernel object
///
/// Implementors only supply access to their [`Handle`]; the lifecycle
/// contract comes from the provided methods.
pub trait Eventlike {
    fn handle(&self) -> &Handle;

    fn handle_mut(&mut self) -> &mut Handle;

    fn fileno(&self) -> Result<RawFd> {
        self.handle().fileno()
    }

    fn close(&mut self) -> Result<()> {
        self.handle_mut().close()
    }

    fn is_closed(&self) -> bool {
        self.handle().is_closed()
    }
}

/// Implement `PartialEq`, `Hash` and the `<Type fd=..>` display for an
/// [`Eventlike`] type whose handle lives in a field called `handle`.
#[macro_export]
macro_rules! impl_eventlike {
    ($ty:ident) => {
        impl $crate::handle::Eventlike for $ty {
            fn handle(&self) -> &$crate::handle::Handle {
                &self.handle
            }

            fn handle_mut(&mut self) -> &mut $crate::handle::Handle {
                &mut self.handle
            }
        }

        impl ::std::cmp::PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.handle == other.handle
            }
        }

        impl ::std::hash::Hash for $ty {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                ::std::hash::Hash::hash(&self.handle, state);
            }
        }
    };
    ($ty:ident, display) => {
        $crate::impl_eventlike!($ty);

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(
                    f,
                    "<{} fd={}>",
                    stringify!($ty),
                    self.handle.display_fd()
                )
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn pipe_handles() -> (Handle, Handle) {
        let mut fds = [0; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        assert_eq!(ret, 0, "pipe2 failed: {}", std::io::Error::last_os_error());
        unsafe { (Handle::from_raw(fds[0]), Handle::from_raw(fds[1])) }
    }

    fn hash_of(handle: &Handle) -> u64 {
        let mut hasher = DefaultHasher::new();
        handle.hash(&mut hasher);
        hasher.finish()
    }

    struct Probe {
        handle: Handle,
    }

    impl_eventlike!(Probe, display);

    #[test]
    fn test_double_close_is_invalid_state() {
        let (mut r, _w) = pipe_handles();
        assert!(r.close().is_ok());
        let err = r.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_fileno_after_close_is_invalid_state() {
        let (mut r, _w) = pipe_handles();
        assert!(r.fileno().is_ok());
        r.close().unwrap();
        assert_eq!(r.fileno().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(r.as_fd().unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_is_closed_tracks_state() {
        let (mut r, _w) = pipe_handles();
        assert!(!r.is_closed());
        r.close().unwrap();
        assert!(r.is_closed());
    }

    #[test]
    #[allow(clippy::eq_op)]
    fn test_live_handles_compare_by_descriptor() {
        let (r, w) = pipe_handles();
        assert!(r == r);
        assert!(r != w);
        assert_eq!(hash_of(&r), hash_of(&r));
    }

    #[test]
    #[allow(clippy::eq_op)]
    fn test_closed_handle_equals_nothing() {
        let (mut r, mut w) = pipe_handles();
        r.close().unwrap();
        assert!(r != r);
        assert!(r != w);
        w.close().unwrap();
        assert!(r != w);
    }

    #[test]
    fn test_display_shows_type_and_fd() {
        let (r, _w) = pipe_handles();
        let fd = r.fileno().unwrap();
        let mut probe = Probe { handle: r };
        let shown = probe.to_string();
        assert!(shown.contains("Probe"), "{shown}");
        assert!(shown.contains(&format!("fd={}", fd)), "{shown}");

        probe.close().unwrap();
        assert_eq!(probe.to_string(), "<Probe fd=closed>");
        assert!(probe.is_closed());
    }

    #[test]
    fn test_eventlike_double_close() {
        let (r, _w) = pipe_handles();
        let mut probe = Probe { handle: r };
        probe.close().unwrap();
        assert_eq!(probe.close().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(probe.fileno().unwrap_err().kind(), ErrorKind::InvalidState);
    }
}
