//! Event mask constants
//!
//! Statically declared from the platform's libc bindings.

use bitflags::bitflags;

bitflags! {
    /// What an inotify watch subscribes to, and how
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WatchMask: u32 {
        /// File was accessed.
        const ACCESS = libc::IN_ACCESS;
        /// Metadata changed.
        const ATTRIB = libc::IN_ATTRIB;
        /// File opened for writing was closed.
        const CLOSE_WRITE = libc::IN_CLOSE_WRITE;
        /// File not opened for writing was closed.
        const CLOSE_NOWRITE = libc::IN_CLOSE_NOWRITE;
        /// Entry created in watched directory.
        const CREATE = libc::IN_CREATE;
        /// Entry deleted from watched directory.
        const DELETE = libc::IN_DELETE;
        /// Watched file or directory was itself deleted.
        const DELETE_SELF = libc::IN_DELETE_SELF;
        /// File was modified.
        const MODIFY = libc::IN_MODIFY;
        /// Watched file or directory was itself moved.
        const MOVE_SELF = libc::IN_MOVE_SELF;
        /// Entry renamed away from the watched directory.
        const MOVED_FROM = libc::IN_MOVED_FROM;
        /// Entry renamed into the watched directory.
        const MOVED_TO = libc::IN_MOVED_TO;
        /// File or directory was opened.
        const OPEN = libc::IN_OPEN;

        const ALL_EVENTS = libc::IN_ALL_EVENTS;
        const MOVE = libc::IN_MOVE;
        const CLOSE = libc::IN_CLOSE;

        /// Don't dereference the path if it is a symbolic link.
        const DONT_FOLLOW = libc::IN_DONT_FOLLOW;
        /// Stop reporting children once they are unlinked.
        const EXCL_UNLINK = libc::IN_EXCL_UNLINK;
        /// Amend an existing watch instead of replacing its mask.
        const MASK_ADD = libc::IN_MASK_ADD;
        /// Report one event, then remove the watch.
        const ONESHOT = libc::IN_ONESHOT;
        /// Only watch the path if it is a directory.
        const ONLYDIR = libc::IN_ONLYDIR;
    }
}

bitflags! {
    /// What happened, as reported in an inotify record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const ACCESS = libc::IN_ACCESS;
        const ATTRIB = libc::IN_ATTRIB;
        const CLOSE_WRITE = libc::IN_CLOSE_WRITE;
        const CLOSE_NOWRITE = libc::IN_CLOSE_NOWRITE;
        const CREATE = libc::IN_CREATE;
        const DELETE = libc::IN_DELETE;
        const DELETE_SELF = libc::IN_DELETE_SELF;
        const MODIFY = libc::IN_MODIFY;
        const MOVE_SELF = libc::IN_MOVE_SELF;
        const MOVED_FROM = libc::IN_MOVED_FROM;
        const MOVED_TO = libc::IN_MOVED_TO;
        const OPEN = libc::IN_OPEN;

        /// Watch was removed, explicitly or because the file went away.
        const IGNORED = libc::IN_IGNORED;
        /// Subject of the event is a directory.
        const ISDIR = libc::IN_ISDIR;
        /// Event queue overflowed; the watch id is -1.
        const Q_OVERFLOW = libc::IN_Q_OVERFLOW;
        /// Filesystem containing the watched object was unmounted.
        const UNMOUNT = libc::IN_UNMOUNT;
    }
}

bitflags! {
    /// fanotify event mask, used both for marks and for reported events
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FanMask: u64 {
        const ACCESS = libc::FAN_ACCESS as u64;
        const MODIFY = libc::FAN_MODIFY as u64;
        const ATTRIB = libc::FAN_ATTRIB as u64;
        const CLOSE_WRITE = libc::FAN_CLOSE_WRITE as u64;
        const CLOSE_NOWRITE = libc::FAN_CLOSE_NOWRITE as u64;
        const OPEN = libc::FAN_OPEN as u64;
        const MOVED_FROM = libc::FAN_MOVED_FROM as u64;
        const MOVED_TO = libc::FAN_MOVED_TO as u64;
        const CREATE = libc::FAN_CREATE as u64;
        const DELETE = libc::FAN_DELETE as u64;
        const DELETE_SELF = libc::FAN_DELETE_SELF as u64;
        const MOVE_SELF = libc::FAN_MOVE_SELF as u64;
        const OPEN_EXEC = libc::FAN_OPEN_EXEC as u64;

        /// Event queue overflowed.
        const Q_OVERFLOW = libc::FAN_Q_OVERFLOW as u64;

        /// Permission to open was requested.
        const OPEN_PERM = libc::FAN_OPEN_PERM as u64;
        /// Permission to read was requested.
        const ACCESS_PERM = libc::FAN_ACCESS_PERM as u64;
        /// Permission to open for execution was requested.
        const OPEN_EXEC_PERM = libc::FAN_OPEN_EXEC_PERM as u64;

        /// Report events for the immediate children of a marked directory.
        const EVENT_ON_CHILD = libc::FAN_EVENT_ON_CHILD as u64;
        /// Event occurred against a directory.
        const ONDIR = libc::FAN_ONDIR as u64;

        const CLOSE = libc::FAN_CLOSE as u64;
        const MOVE = libc::FAN_MOVE as u64;
    }
}

impl FanMask {
    /// Events that must be answered with a [`Response`](crate::fanotify::Response).
    pub const PERMISSION: FanMask = FanMask::OPEN_PERM
        .union(FanMask::ACCESS_PERM)
        .union(FanMask::OPEN_EXEC_PERM);

    pub fn needs_response(self) -> bool {
        self.intersects(Self::PERMISSION)
    }
}
