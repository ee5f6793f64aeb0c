//! Runtime detection of kernel features
//!
//! Probes the running kernel to find out which descriptor facilities are
//! usable, so callers can degrade gracefully instead of failing halfway.

use std::path::Path;

use nix::errno::Errno;

/// Detected kernel features
#[derive(Debug, Clone)]
pub struct KernelFeatures {
    /// Running as root (euid == 0)
    pub has_root: bool,
    /// inotify is compiled in
    pub has_inotify: bool,
    /// Per-user inotify watch limit
    pub max_user_watches: Option<u64>,
    /// Per-user inotify instance limit
    pub max_user_instances: Option<u64>,
    /// The fanotify syscalls exist
    pub has_fanotify: bool,
    /// fanotify_init succeeds for this process (needs CAP_SYS_ADMIN)
    pub can_fanotify: bool,
    /// memfd_create is available
    pub has_memfd: bool,
    /// Unprivileged user namespaces are available
    pub has_user_namespaces: bool,
}

impl KernelFeatures {
    /// Detect all features on the current system
    pub fn detect() -> Self {
        let (has_fanotify, can_fanotify) = detect_fanotify();
        Self {
            has_root: detect_root(),
            has_inotify: Path::new("/proc/sys/fs/inotify").exists(),
            max_user_watches: read_limit("/proc/sys/fs/inotify/max_user_watches"),
            max_user_instances: read_limit("/proc/sys/fs/inotify/max_user_instances"),
            has_fanotify,
            can_fanotify,
            has_memfd: detect_memfd(),
            has_user_namespaces: detect_user_namespaces(),
        }
    }

    /// Get a human-readable summary of features
    pub fn summary(&self) -> String {
        let check = |available: bool| if available { "[ok]" } else { "[--]" };
        let limit = |value: Option<u64>| match value {
            Some(v) => v.to_string(),
            None => "?".to_string(),
        };

        let lines = [
            format!("{} Root privileges", check(self.has_root)),
            format!(
                "{} inotify (watches {}, instances {})",
                check(self.has_inotify),
                limit(self.max_user_watches),
                limit(self.max_user_instances)
            ),
            format!("{} fanotify syscalls", check(self.has_fanotify)),
            format!("{} fanotify permitted", check(self.can_fanotify)),
            format!("{} memfd", check(self.has_memfd)),
            format!("{} User namespaces", check(self.has_user_namespaces)),
        ];

        lines.join("\n")
    }
}

fn detect_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn read_limit(path: &str) -> Option<u64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse().ok())
}

fn detect_fanotify() -> (bool, bool) {
    let fd = unsafe {
        libc::fanotify_init(
            libc::FAN_CLASS_NOTIF | libc::FAN_CLOEXEC,
            libc::O_RDONLY as libc::c_uint,
        )
    };
    if fd >= 0 {
        unsafe { libc::close(fd) };
        return (true, true);
    }
    (Errno::last() != Errno::ENOSYS, false)
}

fn detect_memfd() -> bool {
    let fd = unsafe { libc::memfd_create(c"fdkit-probe".as_ptr(), libc::MFD_CLOEXEC) };
    if fd >= 0 {
        unsafe { libc::close(fd) };
        return true;
    }
    Errno::last() != Errno::ENOSYS
}

fn detect_user_namespaces() -> bool {
    if let Ok(content) = std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone") {
        if content.trim() == "0" {
            return false;
        }
    }

    match read_limit("/proc/sys/user/max_user_namespaces") {
        Some(max) => max > 0,
        // Assume available on modern kernels
        None => true,
    }
}
