//! Aggregate configuration
//!
//! Groups the per-facility configs so an application can keep them in one
//! JSON document. Every section is optional and falls back to its default.

use fdkit_core::{FdkitError, Result};
use fdkit_memfd::{MapOptions, MemfdConfig};
use fdkit_namespace::NamespaceConfig;
use fdkit_notify::{EventfdConfig, FanotifyConfig, InotifyConfig, SignalfdConfig, TimerConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdkitConfig {
    pub inotify: InotifyConfig,
    pub fanotify: FanotifyConfig,
    pub eventfd: EventfdConfig,
    pub timer: TimerConfig,
    pub signalfd: SignalfdConfig,
    pub memfd: MemfdConfig,
    pub map: MapOptions,
    pub namespaces: NamespaceConfig,
}

impl FdkitConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FdkitError::InvalidArgument(format!("invalid fdkit config: {}", e)))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FdkitError::InvalidArgument(format!("cannot serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdkit_core::ErrorKind;
    use fdkit_memfd::Sharing;
    use fdkit_notify::{AccessMode, Clock};

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(FdkitConfig::from_json_str("{}").unwrap(), FdkitConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = FdkitConfig::from_json_str(
            r#"{
                "inotify": {"nonblocking": true},
                "fanotify": {"access": "read-write"},
                "map": {"sharing": "private"},
                "timer": {"clock": "realtime"},
                "namespaces": {"user": true}
            }"#,
        )
        .unwrap();
        assert!(config.inotify.nonblocking);
        assert!(config.inotify.cloexec);
        assert_eq!(config.fanotify.access, AccessMode::ReadWrite);
        assert_eq!(config.map.sharing, Sharing::Private);
        assert_eq!(config.timer.clock, Clock::Realtime);
        assert!(config.signalfd.cloexec);
        assert_eq!(config.namespaces.enabled_count(), 1);
        assert!(config.memfd.allow_sealing);
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut config = FdkitConfig::default();
        config.eventfd.semaphore = true;
        config.memfd.len = 4096;
        let json = config.to_json_pretty().unwrap();
        assert_eq!(FdkitConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_malformed_json_is_invalid_argument() {
        let err = FdkitConfig::from_json_str(r#"{"inotify": 3}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
