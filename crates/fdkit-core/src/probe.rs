//! Buffered-length probe and the single read cycle
//!
//! Event descriptors report how many bytes are queued through `FIONREAD`.
//! For inotify and fanotify the kernel only ever queues whole records, so a
//! read of exactly that many bytes yields a buffer the decoder can consume
//! without a partial trailer.

use std::os::fd::{AsRawFd, BorrowedFd};

use log::trace;
use nix::errno::Errno;

use crate::error::{CallSite, ErrorKind, FdkitError, Result};

mod ioctl {
    nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);
}

static FIONREAD: CallSite = CallSite::new(
    "ioctl(FIONREAD)",
    &[
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EINVAL, ErrorKind::NotSupported),
        (Errno::ENOTTY, ErrorKind::NotSupported),
        (Errno::EFAULT, ErrorKind::InternalFault),
    ],
);

static READ: CallSite = CallSite::new(
    "read",
    &[
        (Errno::EAGAIN, ErrorKind::WouldBlock),
        (Errno::EINTR, ErrorKind::RetryLater),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::EFAULT, ErrorKind::InternalFault),
        (Errno::EIO, ErrorKind::InternalFault),
    ],
);

/// Number of bytes that can be read from `fd` without blocking.
pub fn buffered_len(fd: BorrowedFd<'_>) -> Result<usize> {
    let mut pending: libc::c_int = 0;
    unsafe { ioctl::fionread(fd.as_raw_fd(), &mut pending) }.map_err(|e| FIONREAD.error(e))?;
    pending_len(pending)
}

/// The kernel never reports a negative count; treat one as a fault.
fn pending_len(raw: libc::c_int) -> Result<usize> {
    usize::try_from(raw)
        .map_err(|_| FdkitError::decode(0, format!("FIONREAD reported {} bytes pending", raw)))
}

/// Perform one read cycle on `fd`.
///
/// Reads as many bytes as are queued. When nothing is queued, `min_len`
/// bytes are requested instead so a blocking descriptor waits in `read` for
/// the next record; `min_len` must fit the largest record the descriptor can
/// produce. The returned buffer holds exactly the bytes the kernel wrote.
pub fn read_available(fd: BorrowedFd<'_>, min_len: usize) -> Result<Vec<u8>> {
    let pending = buffered_len(fd)?;
    let len = pending.max(min_len);
    let mut buf = vec![0u8; len];

    let n = READ.check(unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    })?;

    buf.truncate(n as usize);
    trace!(
        "read {} bytes from fd {} ({} pending)",
        buf.len(),
        fd.as_raw_fd(),
        pending
    );
    Ok(buf)
}
