//! Mapping a memfd into the address space

use std::fmt;
use std::os::fd::AsRawFd;
use std::ptr::NonNull;

use fdkit_core::error::{CallSite, ErrorKind, FdkitError, Result};
use log::{debug, warn};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

use crate::memfd::Memfd;
use crate::seal::SealFlags;

static MMAP: CallSite = CallSite::new(
    "mmap",
    &[
        (Errno::EACCES, ErrorKind::PermissionDenied),
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::EOVERFLOW, ErrorKind::InvalidArgument),
        (Errno::EBADF, ErrorKind::InvalidArgument),
        (Errno::ENOMEM, ErrorKind::OutOfMemory),
        (Errno::ENODEV, ErrorKind::NotSupported),
        (Errno::ENFILE, ErrorKind::ResourceExhausted),
        (Errno::EAGAIN, ErrorKind::RetryLater),
    ],
);

static MUNMAP: CallSite = CallSite::new("munmap", &[(Errno::EINVAL, ErrorKind::InternalFault)]);

/// Page protection of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Default for Protection {
    fn default() -> Self {
        Self::read_write()
    }
}

impl Protection {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            exec: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            exec: false,
        }
    }

    fn bits(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.read {
            prot |= libc::PROT_READ;
        }
        if self.write {
            prot |= libc::PROT_WRITE;
        }
        if self.exec {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

/// Whether writes reach the region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sharing {
    /// Writes go to the region and are seen by every other mapping.
    #[default]
    Shared,
    /// Copy-on-write; writes stay in this mapping.
    Private,
}

impl Sharing {
    fn bits(self) -> libc::c_int {
        match self {
            Sharing::Shared => libc::MAP_SHARED,
            Sharing::Private => libc::MAP_PRIVATE,
        }
    }
}

/// What part of a memfd to map, and how
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    /// Bytes to map; the rest of the region from `offset` when unset.
    pub len: Option<usize>,
    /// Must be a multiple of the page size.
    pub offset: u64,
    pub protection: Protection,
    pub sharing: Sharing,
}

impl MapOptions {
    pub fn read_only() -> Self {
        Self {
            protection: Protection::read_only(),
            ..Self::default()
        }
    }

    pub fn private() -> Self {
        Self {
            sharing: Sharing::Private,
            ..Self::default()
        }
    }
}

/// A live mapping, unmapped on drop
///
/// The mapping keeps the region alive on its own, so it may outlive the
/// [`Memfd`] it was created from. While a shared writable mapping exists the
/// write capability cannot be revoked.
///
/// Touching a page past the end of the region raises SIGBUS. The safe views
/// are only handed out when the region carried the `SHRINK` seal at map
/// time, since then it can never become shorter than the mapping.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
    protection: Protection,
    sharing: Sharing,
    shrink_sealed: bool,
}

impl MappedRegion {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    /// Whether the backing region is guaranteed to cover the whole mapping.
    pub fn is_stable(&self) -> bool {
        self.shrink_sealed
    }

    fn check_view(&self, op: &'static str, allowed: bool, missing: &str) -> Result<()> {
        if !allowed {
            return Err(FdkitError::InvalidState {
                op,
                reason: format!("mapping is not {}", missing),
            });
        }
        if !self.shrink_sealed {
            return Err(FdkitError::InvalidState {
                op,
                reason: "region can still shrink; revoke SHRINK before mapping".into(),
            });
        }
        Ok(())
    }

    /// View the mapped bytes.
    ///
    /// Fails unless the mapping is readable and the region was shrink-sealed
    /// when it was mapped.
    pub fn as_slice(&self) -> Result<&[u8]> {
        self.check_view("as_slice", self.protection.read, "readable")?;
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) })
    }

    /// Mutable view of the mapped bytes, under the same conditions as
    /// [`as_slice`](Self::as_slice) but requiring a writable mapping.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        self.check_view("as_mut_slice", self.protection.write, "writable")?;
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// View the mapped bytes of a region that may still shrink.
    ///
    /// # Safety
    ///
    /// The mapping must be readable, and no holder of the region may shrink
    /// it below the end of this mapping while the slice is alive.
    pub unsafe fn as_slice_unchecked(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// Mutable counterpart of [`as_slice_unchecked`](Self::as_slice_unchecked).
    ///
    /// # Safety
    ///
    /// The mapping must be writable, and no holder of the region may shrink
    /// it below the end of this mapping while the slice is alive.
    pub unsafe fn as_mut_slice_unchecked(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
        if let Err(e) = MUNMAP.check(ret) {
            warn!("failed to unmap {} bytes at {:p}: {}", self.len, self.ptr, e);
        }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("protection", &self.protection)
            .field("sharing", &self.sharing)
            .finish()
    }
}

impl Memfd {
    /// Map the region (or a window of it) into memory.
    ///
    /// The window must lie inside the region's current length.
    pub fn map(&self, options: &MapOptions) -> Result<MappedRegion> {
        // Seals first: once SHRINK is seen, the length read below is a floor.
        let shrink_sealed = self.seal_bits()?.contains(SealFlags::SHRINK);
        let total = self.len()?;

        let len = match options.len {
            Some(len) => len,
            None => usize::try_from(total.saturating_sub(options.offset)).map_err(|_| {
                FdkitError::InvalidArgument(format!("region of {} bytes cannot be mapped", total))
            })?,
        };
        if len == 0 {
            return Err(FdkitError::InvalidArgument(format!(
                "nothing to map in memfd '{}' at offset {}",
                self.name(),
                options.offset
            )));
        }
        let end = options.offset.checked_add(len as u64);
        if !matches!(end, Some(end) if end <= total) {
            return Err(FdkitError::InvalidArgument(format!(
                "window of {} bytes at offset {} exceeds memfd '{}' of {} bytes",
                len,
                options.offset,
                self.name(),
                total
            )));
        }
        let offset = libc::off_t::try_from(options.offset).map_err(|_| {
            FdkitError::InvalidArgument(format!("offset {} is too large", options.offset))
        })?;

        let fd = self.handle.as_fd()?;
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                options.protection.bits(),
                options.sharing.bits(),
                fd.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(MMAP.error(Errno::last()));
        }
        let ptr = NonNull::new(addr as *mut u8).ok_or_else(|| {
            FdkitError::InvalidState {
                op: "mmap",
                reason: "kernel returned a null mapping".into(),
            }
        })?;
        debug!(
            "mapped {} bytes of memfd '{}' at {:p} ({:?}, {:?}, shrink sealed: {})",
            len,
            self.name(),
            ptr,
            options.protection,
            options.sharing,
            shrink_sealed
        );

        Ok(MappedRegion {
            ptr,
            len,
            protection: options.protection,
            sharing: options.sharing,
            shrink_sealed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfd::MemfdConfig;

    #[test]
    fn test_shared_mapping_sees_writes() {
        let memfd = Memfd::with_config("map", &MemfdConfig::with_len(4096)).unwrap();
        memfd.revoke_shrink().unwrap();
        let mut region = memfd.map(&MapOptions::default()).unwrap();
        assert_eq!(region.len(), 4096);

        region.as_mut_slice().unwrap()[..5].copy_from_slice(b"hello");
        let mut buf = [0u8; 5];
        memfd.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_private_mapping_does_not_write_through() {
        let memfd = Memfd::with_config("cow", &MemfdConfig::with_len(4096)).unwrap();
        memfd.revoke_shrink().unwrap();
        let mut region = memfd.map(&MapOptions::private()).unwrap();
        region.as_mut_slice().unwrap()[0] = 0xff;

        let mut buf = [0u8; 1];
        memfd.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn test_read_only_mapping_refuses_mutable_view() {
        let memfd = Memfd::with_config("ro", &MemfdConfig::with_len(4096)).unwrap();
        memfd.write_at(b"data", 0).unwrap();
        memfd.revoke_shrink().unwrap();
        let mut region = memfd.map(&MapOptions::read_only()).unwrap();
        assert_eq!(&region.as_slice().unwrap()[..4], b"data");
        assert_eq!(region.as_mut_slice().unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_empty_region_cannot_be_mapped() {
        let memfd = Memfd::new("empty").unwrap();
        let err = memfd.map(&MapOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_unaligned_offset_is_invalid_argument() {
        let memfd = Memfd::with_config("unaligned", &MemfdConfig::with_len(8192)).unwrap();
        let options = MapOptions {
            len: Some(16),
            offset: 3,
            ..MapOptions::default()
        };
        let err = memfd.map(&options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn test_window_past_end_is_invalid_argument() {
        let memfd = Memfd::with_config("short", &MemfdConfig::with_len(16)).unwrap();
        let options = MapOptions {
            len: Some(3 * 4096),
            ..MapOptions::default()
        };
        let err = memfd.map(&options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.raw_os_error(), None);

        let options = MapOptions {
            len: Some(16),
            offset: 4096,
            ..MapOptions::default()
        };
        assert_eq!(
            memfd.map(&options).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );

        let options = MapOptions {
            len: Some(16),
            ..MapOptions::default()
        };
        assert_eq!(memfd.map(&options).unwrap().len(), 16);
    }

    #[test]
    fn test_shrinkable_region_refuses_safe_views() {
        let memfd = Memfd::with_config("shrinkable", &MemfdConfig::with_len(8192)).unwrap();
        let mut region = memfd.map(&MapOptions::default()).unwrap();
        assert!(!region.is_stable());
        assert_eq!(region.as_slice().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(region.as_mut_slice().unwrap_err().kind(), ErrorKind::InvalidState);

        // Shrinking under the mapping is still possible; the views stay refused.
        memfd.set_len(0).unwrap();
        assert_eq!(region.as_slice().unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_shrink_sealed_region_keeps_its_mapping_covered() {
        let memfd = Memfd::with_config("stable", &MemfdConfig::with_len(8192)).unwrap();
        memfd.revoke_shrink().unwrap();
        let region = memfd.map(&MapOptions::default()).unwrap();
        assert!(region.is_stable());

        let err = memfd.set_len(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(region.as_slice().unwrap()[5000], 0);
    }

    #[test]
    fn test_unchecked_view_of_shrinkable_region() {
        let memfd = Memfd::with_config("unchecked", &MemfdConfig::with_len(4096)).unwrap();
        memfd.write_at(b"raw", 0).unwrap();
        let region = memfd.map(&MapOptions::read_only()).unwrap();
        // Nothing shrinks the region while the slice is alive.
        let bytes = unsafe { region.as_slice_unchecked() };
        assert_eq!(&bytes[..3], b"raw");
    }

    #[test]
    fn test_options_from_json() {
        let options: MapOptions =
            serde_json::from_str(r#"{"sharing": "private", "protection": {"write": false}}"#)
                .unwrap();
        assert_eq!(options.sharing, Sharing::Private);
        assert_eq!(options.protection, Protection::read_only());
        assert_eq!(options.len, None);
    }
}
