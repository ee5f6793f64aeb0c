//! fdkit-notify: filesystem notification sources
//!
//! - [`Inotify`]: per-path watches, decoded into [`InotifyEvent`]s
//! - [`Fanotify`]: mount/filesystem-wide marks and permission decisions
//! - [`Eventfd`]: a counter for waking a blocked reader
//! - [`Timer`]: timer expirations as a readable counter
//! - [`Signalfd`]: blocked signals as readable records
//! - [`decode`]: the pure decoder for both kernel wire formats

pub mod decode;
pub mod event;
pub mod eventfd;
pub mod fanotify;
pub mod inotify;
pub mod mask;
pub mod signalfd;
pub mod timerfd;

pub use decode::{decode, decode_fanotify, decode_inotify, WireFormat};
pub use event::{
    correlate_moves, AccessMode, Event, EventRecord, FanotifyRecord, InotifyEvent, MovePair,
    Origin, WatchDescriptor,
};
pub use eventfd::{Eventfd, EventfdConfig};
pub use fanotify::{Fanotify, FanotifyConfig, FanotifyEvent, MarkFlags, NotificationClass, Response};
pub use inotify::{Inotify, InotifyConfig};
pub use mask::{EventMask, FanMask, WatchMask};
pub use nix::sys::signal::{SigSet, Signal};
pub use signalfd::{block_signals, restore_signal_mask, SignalInfo, Signalfd, SignalfdConfig};
pub use timerfd::{Clock, Timer, TimerConfig, TimerVal};
