//! User namespace UID/GID mapping
//!
//! A fresh user namespace starts with no mappings; every id reads as the
//! overflow id until `uid_map` and `gid_map` are written. An unprivileged
//! writer must deny `setgroups` before writing `gid_map`.

use std::fs;

use fdkit_core::error::{CallSite, ErrorKind, Result};
use log::debug;
use nix::errno::Errno;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::config::NamespaceConfig;
use crate::ns::unshare;

static WRITE_MAP: CallSite = CallSite::new(
    "write(/proc/<pid>/*_map)",
    &[
        (Errno::EPERM, ErrorKind::PermissionDenied),
        (Errno::EACCES, ErrorKind::PermissionDenied),
        (Errno::EINVAL, ErrorKind::InvalidArgument),
        (Errno::ENOENT, ErrorKind::InvalidArgument),
    ],
);

/// One uid and one gid mapped across a user namespace boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub inside_uid: u32,
    pub outside_uid: u32,
    pub inside_gid: u32,
    pub outside_gid: u32,
}

impl IdMapping {
    /// Map root inside the namespace to the caller's current ids.
    ///
    /// Must be captured before unsharing; afterwards the caller's ids read as
    /// the overflow id.
    pub fn root_to_current() -> Self {
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            inside_uid: 0,
            outside_uid: uid,
            inside_gid: 0,
            outside_gid: gid,
        }
    }

    pub fn uid_map_line(&self) -> String {
        format!("{} {} 1\n", self.inside_uid, self.outside_uid)
    }

    pub fn gid_map_line(&self) -> String {
        format!("{} {} 1\n", self.inside_gid, self.outside_gid)
    }
}

fn proc_dir(pid: Option<Pid>) -> String {
    match pid {
        Some(pid) => format!("/proc/{}", pid.as_raw()),
        None => "/proc/self".to_string(),
    }
}

/// Write the uid/gid maps of `pid` (or the caller).
pub fn write_id_maps(pid: Option<Pid>, mapping: &IdMapping) -> Result<()> {
    let dir = proc_dir(pid);

    fs::write(format!("{}/uid_map", dir), mapping.uid_map_line())
        .map_err(|e| WRITE_MAP.io_error(e))?;
    fs::write(format!("{}/setgroups", dir), "deny\n").map_err(|e| WRITE_MAP.io_error(e))?;
    fs::write(format!("{}/gid_map", dir), mapping.gid_map_line())
        .map_err(|e| WRITE_MAP.io_error(e))?;

    debug!("wrote id maps for {}: {:?}", dir, mapping);
    Ok(())
}

/// Map the calling process's ids after it unshared its user namespace.
pub fn map_current_user(mapping: &IdMapping) -> Result<()> {
    write_id_maps(None, mapping)
}

/// Unshare a user namespace and become root inside it.
pub fn enter_user_namespace() -> Result<IdMapping> {
    let mapping = IdMapping::root_to_current();
    unshare(&NamespaceConfig {
        user: true,
        ..NamespaceConfig::default()
    })?;
    map_current_user(&mapping)?;
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_lines() {
        let mapping = IdMapping {
            inside_uid: 0,
            outside_uid: 1000,
            inside_gid: 0,
            outside_gid: 100,
        };
        assert_eq!(mapping.uid_map_line(), "0 1000 1\n");
        assert_eq!(mapping.gid_map_line(), "0 100 1\n");
    }

    #[test]
    fn test_write_maps_for_missing_process_fails() {
        let result = write_id_maps(
            Some(Pid::from_raw(999_999_999)),
            &IdMapping::root_to_current(),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
    }
}
