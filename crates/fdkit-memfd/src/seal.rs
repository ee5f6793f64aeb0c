//! Sealing state machine
//!
//! Seals are properties of the memory region, not of a descriptor: every
//! descriptor (in any process) that refers to the region sees the same set,
//! and a seal can never be removed once added. The API mirrors that. There
//! are no setters, only `revoke_*` calls that take a capability away and
//! [`Memfd::seal`], which freezes the set.

use std::os::fd::AsRawFd;

use bitflags::bitflags;
use fdkit_core::error::{CallSite, ErrorKind, FdkitError, Result};
use log::debug;
use nix::errno::Errno;

use crate::memfd::Memfd;

static GET_SEALS: CallSite = CallSite::new(
    "fcntl(F_GET_SEALS)",
    &[(Errno::EINVAL, ErrorKind::NotSupported)],
);

static REVOKE: CallSite = CallSite::new(
    "fcntl(F_ADD_SEALS)",
    &[
        (Errno::EPERM, ErrorKind::InvalidState),
        (Errno::EBUSY, ErrorKind::PermissionDenied),
        (Errno::EINVAL, ErrorKind::NotSupported),
    ],
);

static SEAL: CallSite = CallSite::new(
    "fcntl(F_ADD_SEALS, F_SEAL_SEAL)",
    &[
        (Errno::EPERM, ErrorKind::InvalidState),
        (Errno::EINVAL, ErrorKind::NotSupported),
    ],
);

bitflags! {
    /// Capabilities removed from a region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SealFlags: libc::c_int {
        /// The region can no longer shrink.
        const SHRINK = libc::F_SEAL_SHRINK;
        /// The region can no longer grow.
        const GROW = libc::F_SEAL_GROW;
        /// The contents can no longer change.
        const WRITE = libc::F_SEAL_WRITE;
        /// The seal set itself is frozen.
        const SEAL = libc::F_SEAL_SEAL;
    }
}

impl SealFlags {
    /// Bits that [`Memfd::revoke`] accepts.
    pub const CAPABILITIES: SealFlags = SealFlags::SHRINK
        .union(SealFlags::GROW)
        .union(SealFlags::WRITE);
}

impl Memfd {
    fn require_sealing(&self, op: &str) -> Result<()> {
        if self.allows_sealing() {
            Ok(())
        } else {
            Err(FdkitError::NotSupported(format!(
                "{}: memfd '{}' was created without sealing",
                op,
                self.name()
            )))
        }
    }

    /// Seals currently set on the region.
    pub fn current_flags(&self) -> Result<SealFlags> {
        self.require_sealing("current_flags")?;
        self.seal_bits()
    }

    /// Raw seal set, also for regions created without sealing (which
    /// report `SEAL` alone).
    pub(crate) fn seal_bits(&self) -> Result<SealFlags> {
        let fd = self.handle.as_fd()?;
        let bits = GET_SEALS.check(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GET_SEALS) })?;
        Ok(SealFlags::from_bits_retain(bits))
    }

    /// Remove the capabilities in `flags` in one call.
    ///
    /// Fails with invalid-state once the region is sealed, and with
    /// permission-denied when `WRITE` is requested while a writable shared
    /// mapping exists. Revoking something already revoked is a no-op.
    pub fn revoke(&self, flags: SealFlags) -> Result<()> {
        self.require_sealing("revoke")?;
        if !SealFlags::CAPABILITIES.contains(flags) {
            return Err(FdkitError::InvalidArgument(format!(
                "revoke takes only SHRINK, GROW and WRITE, got {:?}",
                flags
            )));
        }
        let fd = self.handle.as_fd()?;
        REVOKE.check(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_ADD_SEALS, flags.bits()) })?;
        debug!("revoked {:?} on memfd '{}'", flags, self.name());
        Ok(())
    }

    pub fn revoke_grow(&self) -> Result<()> {
        self.revoke(SealFlags::GROW)
    }

    pub fn revoke_shrink(&self) -> Result<()> {
        self.revoke(SealFlags::SHRINK)
    }

    pub fn revoke_write(&self) -> Result<()> {
        self.revoke(SealFlags::WRITE)
    }

    /// Freeze the seal set. Sealing twice is an invalid-state error.
    pub fn seal(&self) -> Result<()> {
        self.require_sealing("seal")?;
        let fd = self.handle.as_fd()?;
        SEAL.check(unsafe {
            libc::fcntl(fd.as_raw_fd(), libc::F_ADD_SEALS, libc::F_SEAL_SEAL)
        })?;
        debug!("sealed memfd '{}'", self.name());
        Ok(())
    }

    pub fn growable(&self) -> Result<bool> {
        Ok(!self.current_flags()?.contains(SealFlags::GROW))
    }

    pub fn shrinkable(&self) -> Result<bool> {
        Ok(!self.current_flags()?.contains(SealFlags::SHRINK))
    }

    pub fn writable(&self) -> Result<bool> {
        Ok(!self.current_flags()?.contains(SealFlags::WRITE))
    }

    pub fn is_sealed(&self) -> Result<bool> {
        Ok(self.current_flags()?.contains(SealFlags::SEAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfd::MemfdConfig;

    fn sealable() -> Memfd {
        Memfd::new("seal-test").unwrap()
    }

    #[test]
    fn test_fresh_region_has_no_seals() {
        let memfd = sealable();
        assert_eq!(memfd.current_flags().unwrap(), SealFlags::empty());
        assert!(memfd.growable().unwrap());
        assert!(memfd.shrinkable().unwrap());
        assert!(memfd.writable().unwrap());
        assert!(!memfd.is_sealed().unwrap());
    }

    #[test]
    fn test_revoke_write_then_grow() {
        let memfd = sealable();
        memfd.revoke(SealFlags::WRITE).unwrap();
        memfd.revoke(SealFlags::GROW).unwrap();
        assert_eq!(
            memfd.current_flags().unwrap(),
            SealFlags::WRITE | SealFlags::GROW
        );
        assert!(!memfd.writable().unwrap());
        assert!(!memfd.growable().unwrap());
        assert!(memfd.shrinkable().unwrap());
    }

    #[test]
    fn test_revoke_after_seal_is_invalid_state() {
        let memfd = sealable();
        memfd.seal().unwrap();
        let err = memfd.revoke(SealFlags::SHRINK).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(memfd.current_flags().unwrap(), SealFlags::SEAL);
    }

    #[test]
    fn test_double_seal_is_invalid_state() {
        let memfd = sealable();
        memfd.seal().unwrap();
        assert!(memfd.is_sealed().unwrap());
        assert_eq!(memfd.seal().unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_flags_never_decrease() {
        let memfd = sealable();
        let mut previous = memfd.current_flags().unwrap();
        for step in [
            SealFlags::SHRINK,
            SealFlags::SHRINK,
            SealFlags::GROW | SealFlags::SHRINK,
            SealFlags::WRITE,
        ] {
            memfd.revoke(step).unwrap();
            let now = memfd.current_flags().unwrap();
            assert!(now.contains(previous), "{:?} lost bits of {:?}", now, previous);
            previous = now;
        }
        assert_eq!(previous, SealFlags::CAPABILITIES);
    }

    #[test]
    fn test_revoke_rejects_seal_bit() {
        let memfd = sealable();
        let err = memfd.revoke(SealFlags::SEAL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!memfd.is_sealed().unwrap());
    }

    #[test]
    fn test_unsealable_region_reports_not_supported() {
        let config = MemfdConfig {
            allow_sealing: false,
            ..MemfdConfig::default()
        };
        let memfd = Memfd::with_config("plain", &config).unwrap();
        assert_eq!(memfd.current_flags().unwrap_err().kind(), ErrorKind::NotSupported);
        assert_eq!(memfd.revoke_write().unwrap_err().kind(), ErrorKind::NotSupported);
        assert_eq!(memfd.seal().unwrap_err().kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_site_tables_disagree_on_ebusy() {
        assert_eq!(REVOKE.classify(Errno::EBUSY), ErrorKind::PermissionDenied);
        assert_eq!(SEAL.classify(Errno::EBUSY), ErrorKind::Unknown);
        assert_eq!(GET_SEALS.classify(Errno::EINVAL), ErrorKind::NotSupported);
    }
}
