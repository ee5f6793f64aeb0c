//! fdkit: descriptor-backed Linux kernel facilities
//!
//! Safe wrappers for inotify, fanotify, eventfd, timerfd, signalfd, sealable
//! memfd regions and namespaces, with one error taxonomy across all of them.
//!
//! # Crates
//!
//! - **fdkit_core**: descriptor lifecycle, errno classification, buffered reads
//! - **fdkit_notify**: inotify/fanotify/eventfd/timerfd/signalfd sources and the event decoder
//! - **fdkit_memfd**: anonymous memory files, seals and mappings
//! - **fdkit_namespace**: unshare, setns and user namespace mapping
//!
//! # Example
//!
//! ```ignore
//! use fdkit::{Inotify, WatchMask};
//!
//! let inotify = Inotify::new()?;
//! inotify.add_watch("/tmp", WatchMask::CREATE | WatchMask::MOVE)?;
//! for event in inotify.read_events()? {
//!     println!("{:?} {:?}", event.mask, event.name_lossy());
//! }
//! ```

pub mod config;

pub use fdkit_core;
pub use fdkit_memfd;
pub use fdkit_namespace;
pub use fdkit_notify;

pub use config::FdkitConfig;
pub use fdkit_core::{CallSite, ErrorKind, Eventlike, FdkitError, Handle, KernelFeatures, Result};
pub use fdkit_memfd::{MapOptions, MappedRegion, Memfd, MemfdConfig, SealFlags};
pub use fdkit_namespace::{NamespaceConfig, NamespaceFd, NamespaceType};
pub use fdkit_notify::{
    Event, EventMask, Eventfd, EventfdConfig, FanMask, Fanotify, FanotifyConfig, Inotify,
    InotifyConfig, InotifyEvent, Signalfd, SignalfdConfig, Timer, TimerConfig, TimerVal,
    WatchMask, WireFormat,
};

use log::debug;

/// Copy `contents` into a new memfd and lock it down completely.
///
/// The result can be handed to another process: it can read the bytes but
/// never change them or the region's size, and the seals cannot be undone.
pub fn sealed_buffer(name: &str, contents: &[u8]) -> Result<Memfd> {
    let memfd = Memfd::with_config(name, &MemfdConfig::default())?;
    let mut written = 0;
    while written < contents.len() {
        written += memfd.write_at(&contents[written..], written as u64)?;
    }
    memfd.revoke(SealFlags::CAPABILITIES)?;
    memfd.seal()?;
    debug!("sealed {} bytes into {}", contents.len(), memfd);
    Ok(memfd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sealed_buffer_is_immutable() {
        let memfd = sealed_buffer("frozen", b"immutable").unwrap();
        assert_eq!(memfd.current_flags().unwrap(), SealFlags::all());
        assert_eq!(memfd.len().unwrap(), 9);
        assert_eq!(
            memfd.write_at(b"x", 0).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_sealed_buffer_empty_contents() {
        let memfd = sealed_buffer("empty", b"").unwrap();
        assert!(memfd.is_sealed().unwrap());
        assert!(memfd.is_empty().unwrap());
    }
}
