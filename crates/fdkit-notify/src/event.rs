//! Structured event records produced by the decoder

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;

use serde::{Deserialize, Serialize};

use crate::mask::{EventMask, FanMask};

/// Identifies an inotify watch
///
/// Returned by [`Inotify::add_watch`](crate::Inotify::add_watch) and carried
/// by every record the watch produces. Queue overflow records use `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchDescriptor(pub(crate) i32);

impl WatchDescriptor {
    pub fn from_raw(wd: i32) -> Self {
        Self(wd)
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }
}

/// Access mode of the descriptors a fanotify group hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Derive the mode from open(2) style flags by inspecting `O_ACCMODE`.
    pub fn from_open_flags(flags: libc::c_int) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_RDWR => AccessMode::ReadWrite,
            libc::O_WRONLY => AccessMode::WriteOnly,
            _ => AccessMode::ReadOnly,
        }
    }

    pub fn open_flags(self) -> libc::c_int {
        match self {
            AccessMode::ReadOnly => libc::O_RDONLY,
            AccessMode::WriteOnly => libc::O_WRONLY,
            AccessMode::ReadWrite => libc::O_RDWR,
        }
    }

    pub fn can_read(self) -> bool {
        self != AccessMode::WriteOnly
    }

    pub fn can_write(self) -> bool {
        self != AccessMode::ReadOnly
    }
}

/// One inotify record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InotifyEvent {
    pub wd: WatchDescriptor,
    pub mask: EventMask,
    /// Links the two halves of a rename; zero otherwise.
    pub cookie: u32,
    /// Entry name, for events on the children of a watched directory.
    pub name: Option<OsString>,
}

impl InotifyEvent {
    pub fn name_lossy(&self) -> Option<Cow<'_, str>> {
        self.name.as_deref().map(|n| String::from_utf8_lossy(n.as_bytes()))
    }

    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }

    pub fn is_overflow(&self) -> bool {
        self.mask.contains(EventMask::Q_OVERFLOW)
    }
}

/// One fanotify metadata record, exactly as the kernel delivered it
///
/// `fd` is still a bare number here; [`crate::Fanotify::read_events`] takes
/// ownership of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanotifyRecord {
    pub version: u8,
    pub mask: FanMask,
    pub fd: Option<RawFd>,
    pub pid: i32,
    /// Self-declared record length, metadata plus any trailing info records.
    pub event_len: u32,
    /// Mode the group opens event descriptors with.
    pub access: AccessMode,
}

impl FanotifyRecord {
    /// Whether the record layout matches the one this crate was built for.
    pub fn check_version(&self) -> bool {
        self.version == libc::FANOTIFY_METADATA_VERSION
    }
}

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin<'a> {
    Watch {
        wd: WatchDescriptor,
        name: Option<&'a OsStr>,
    },
    File {
        fd: Option<RawFd>,
        pid: i32,
    },
}

/// Capabilities shared by every decoded record
pub trait EventRecord {
    fn origin(&self) -> Origin<'_>;

    fn mask_bits(&self) -> u64;

    /// Correlation value linking this record to another, if any.
    fn cookie(&self) -> Option<u32> {
        None
    }
}

impl EventRecord for InotifyEvent {
    fn origin(&self) -> Origin<'_> {
        Origin::Watch {
            wd: self.wd,
            name: self.name.as_deref(),
        }
    }

    fn mask_bits(&self) -> u64 {
        u64::from(self.mask.bits())
    }

    fn cookie(&self) -> Option<u32> {
        (self.cookie != 0).then_some(self.cookie)
    }
}

impl EventRecord for FanotifyRecord {
    fn origin(&self) -> Origin<'_> {
        Origin::File {
            fd: self.fd,
            pid: self.pid,
        }
    }

    fn mask_bits(&self) -> u64 {
        self.mask.bits()
    }
}

/// A record from either wire format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Inotify(InotifyEvent),
    Fanotify(FanotifyRecord),
}

impl EventRecord for Event {
    fn origin(&self) -> Origin<'_> {
        match self {
            Event::Inotify(e) => e.origin(),
            Event::Fanotify(e) => e.origin(),
        }
    }

    fn mask_bits(&self) -> u64 {
        match self {
            Event::Inotify(e) => e.mask_bits(),
            Event::Fanotify(e) => e.mask_bits(),
        }
    }

    fn cookie(&self) -> Option<u32> {
        match self {
            Event::Inotify(e) => e.cookie(),
            Event::Fanotify(e) => e.cookie(),
        }
    }
}

/// The two halves of a rename within one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePair<'a> {
    pub from: &'a InotifyEvent,
    pub to: &'a InotifyEvent,
}

/// Pair adjacent MOVED_FROM / MOVED_TO records that share a cookie.
///
/// The kernel queues both halves back to back, so only neighbours are
/// considered. A half whose partner fell outside the read (or outside the
/// watched tree) stays unpaired.
pub fn correlate_moves(events: &[InotifyEvent]) -> Vec<MovePair<'_>> {
    events
        .windows(2)
        .filter_map(|pair| {
            let (from, to) = (&pair[0], &pair[1]);
            let linked = from.mask.contains(EventMask::MOVED_FROM)
                && to.mask.contains(EventMask::MOVED_TO)
                && from.cookie != 0
                && from.cookie == to.cookie;
            linked.then_some(MovePair { from, to })
        })
        .collect()
}
