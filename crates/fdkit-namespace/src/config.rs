//! Namespace selection

use std::fmt;

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};

/// Namespace types that can be unshared or joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamespaceType {
    Pid,
    Ipc,
    Net,
    Mount,
    Uts,
    User,
    Cgroup,
}

impl NamespaceType {
    pub const ALL: [NamespaceType; 7] = [
        NamespaceType::Pid,
        NamespaceType::Ipc,
        NamespaceType::Net,
        NamespaceType::Mount,
        NamespaceType::Uts,
        NamespaceType::User,
        NamespaceType::Cgroup,
    ];

    /// Entry name under `/proc/<pid>/ns/`.
    pub fn proc_name(self) -> &'static str {
        match self {
            NamespaceType::Pid => "pid",
            NamespaceType::Ipc => "ipc",
            NamespaceType::Net => "net",
            NamespaceType::Mount => "mnt",
            NamespaceType::Uts => "uts",
            NamespaceType::User => "user",
            NamespaceType::Cgroup => "cgroup",
        }
    }

    pub fn clone_flag(self) -> CloneFlags {
        match self {
            NamespaceType::Pid => CloneFlags::CLONE_NEWPID,
            NamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
            NamespaceType::Net => CloneFlags::CLONE_NEWNET,
            NamespaceType::Mount => CloneFlags::CLONE_NEWNS,
            NamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
            NamespaceType::User => CloneFlags::CLONE_NEWUSER,
            NamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Which namespaces to leave
///
/// The default selects nothing, so a partial configuration only unshares
/// what it names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub pid: bool,
    pub ipc: bool,
    pub net: bool,
    pub mount: bool,
    pub uts: bool,
    pub user: bool,
    pub cgroup: bool,
}

impl NamespaceConfig {
    /// Every namespace type
    pub fn all() -> Self {
        Self {
            pid: true,
            ipc: true,
            net: true,
            mount: true,
            uts: true,
            user: true,
            cgroup: true,
        }
    }

    /// Everything except user and cgroup, for callers that already hold
    /// CAP_SYS_ADMIN
    pub fn privileged() -> Self {
        Self {
            user: false,
            cgroup: false,
            ..Self::all()
        }
    }

    /// Everything, with a user namespace so no capability is needed
    pub fn unprivileged() -> Self {
        Self::all()
    }

    /// A single namespace type
    pub fn only(ns: NamespaceType) -> Self {
        let mut config = Self::default();
        config.set(ns, true);
        config
    }

    pub fn set(&mut self, ns: NamespaceType, enabled: bool) {
        match ns {
            NamespaceType::Pid => self.pid = enabled,
            NamespaceType::Ipc => self.ipc = enabled,
            NamespaceType::Net => self.net = enabled,
            NamespaceType::Mount => self.mount = enabled,
            NamespaceType::Uts => self.uts = enabled,
            NamespaceType::User => self.user = enabled,
            NamespaceType::Cgroup => self.cgroup = enabled,
        }
    }

    pub fn contains(&self, ns: NamespaceType) -> bool {
        match ns {
            NamespaceType::Pid => self.pid,
            NamespaceType::Ipc => self.ipc,
            NamespaceType::Net => self.net,
            NamespaceType::Mount => self.mount,
            NamespaceType::Uts => self.uts,
            NamespaceType::User => self.user,
            NamespaceType::Cgroup => self.cgroup,
        }
    }

    /// Selected types, in [`NamespaceType::ALL`] order.
    pub fn types(&self) -> impl Iterator<Item = NamespaceType> + '_ {
        NamespaceType::ALL
            .into_iter()
            .filter(move |ns| self.contains(*ns))
    }

    /// Convert to clone flags
    pub fn to_clone_flags(&self) -> CloneFlags {
        self.types()
            .fold(CloneFlags::empty(), |flags, ns| flags | ns.clone_flag())
    }

    pub fn enabled_count(&self) -> usize {
        self.types().count()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selects_nothing() {
        let config = NamespaceConfig::default();
        assert!(config.is_empty());
        assert!(config.to_clone_flags().is_empty());
    }

    #[test]
    fn test_all_and_privileged() {
        assert_eq!(NamespaceConfig::all().enabled_count(), 7);
        let privileged = NamespaceConfig::privileged();
        assert_eq!(privileged.enabled_count(), 5);
        assert!(!privileged.user);
        assert!(NamespaceConfig::unprivileged().user);
    }

    #[test]
    fn test_clone_flags_conversion() {
        let flags = NamespaceConfig::all().to_clone_flags();
        for ns in NamespaceType::ALL {
            assert!(flags.contains(ns.clone_flag()), "{} missing", ns);
        }
        let flags = NamespaceConfig::only(NamespaceType::Cgroup).to_clone_flags();
        assert_eq!(flags, CloneFlags::CLONE_NEWCGROUP);
        assert_eq!(flags.bits(), libc::CLONE_NEWCGROUP);
    }

    #[test]
    fn test_proc_names() {
        assert_eq!(NamespaceType::Mount.proc_name(), "mnt");
        assert_eq!(NamespaceType::Cgroup.to_string(), "cgroup");
    }

    #[test]
    fn test_config_from_json() {
        let config: NamespaceConfig =
            serde_json::from_str(r#"{"user": true, "net": true}"#).unwrap();
        assert_eq!(
            config.types().collect::<Vec<_>>(),
            vec![NamespaceType::Net, NamespaceType::User]
        );
    }
}
