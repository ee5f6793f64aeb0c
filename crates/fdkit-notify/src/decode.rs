//! Binary event decoder
//!
//! Turns the bytes returned by one read of an inotify or fanotify descriptor
//! into ordered records. Decoding is pure: it looks only at the buffer (and,
//! for fanotify, the group's access mode) and never reads, blocks or retries.
//!
//! The kernel only queues whole records, so a buffer that ends inside a
//! record means a truncated read or an ABI mismatch. Both are reported as
//! [`ErrorKind::InternalFault`](fdkit_core::ErrorKind::InternalFault) and no
//! partial result is returned to the caller.

use std::ffi::OsStr;
use std::mem::size_of;
use std::os::unix::ffi::OsStrExt;

use fdkit_core::{FdkitError, Result};
use log::trace;

use crate::event::{AccessMode, Event, FanotifyRecord, InotifyEvent, WatchDescriptor};
use crate::mask::{EventMask, FanMask};

/// Size of `struct inotify_event` without the trailing name.
pub const INOTIFY_HEADER_LEN: usize = 16;

/// Size of `struct fanotify_event_metadata`.
pub const FANOTIFY_METADATA_LEN: usize = 24;

const _: () = assert!(size_of::<libc::inotify_event>() == INOTIFY_HEADER_LEN);
const _: () = assert!(size_of::<libc::fanotify_event_metadata>() == FANOTIFY_METADATA_LEN);

/// Which layout a buffer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Fixed header followed by a NUL padded name.
    Inotify,
    /// Fixed size metadata advanced by its declared length.
    Fanotify(AccessMode),
}

/// Decode a buffer in the given format.
pub fn decode(buf: &[u8], format: WireFormat) -> Result<Vec<Event>> {
    match format {
        WireFormat::Inotify => Ok(decode_inotify(buf)?
            .into_iter()
            .map(Event::Inotify)
            .collect()),
        WireFormat::Fanotify(access) => Ok(decode_fanotify(buf, access)?
            .into_iter()
            .map(Event::Fanotify)
            .collect()),
    }
}

/// Decode back-to-back `inotify_event` records.
pub fn decode_inotify(buf: &[u8]) -> Result<Vec<InotifyEvent>> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < INOTIFY_HEADER_LEN {
            return Err(FdkitError::decode(
                offset,
                format!(
                    "truncated inotify header: {} bytes left, {} needed",
                    remaining, INOTIFY_HEADER_LEN
                ),
            ));
        }

        let wd = i32::from_ne_bytes(field(buf, offset));
        let mask = u32::from_ne_bytes(field(buf, offset + 4));
        let cookie = u32::from_ne_bytes(field(buf, offset + 8));
        let name_len = u32::from_ne_bytes(field(buf, offset + 12)) as usize;

        let name_start = offset + INOTIFY_HEADER_LEN;
        if name_len > buf.len() - name_start {
            return Err(FdkitError::decode(
                offset,
                format!(
                    "inotify name length {} overruns buffer ({} bytes left)",
                    name_len,
                    buf.len() - name_start
                ),
            ));
        }

        let name = trim_nul(&buf[name_start..name_start + name_len]);
        let event = InotifyEvent {
            wd: WatchDescriptor(wd),
            mask: EventMask::from_bits_retain(mask),
            cookie,
            name: (!name.is_empty()).then(|| OsStr::from_bytes(name).to_os_string()),
        };
        trace!("decoded {:?} at offset {}", event, offset);
        events.push(event);

        offset = name_start + name_len;
    }

    Ok(events)
}

/// Decode back-to-back `fanotify_event_metadata` records.
///
/// Each record is skipped by its own `event_len`, so records carrying
/// trailing information blocks (or fields added by newer kernels) decode
/// without knowing their layout.
pub fn decode_fanotify(buf: &[u8], access: AccessMode) -> Result<Vec<FanotifyRecord>> {
    let (records, fault) = decode_fanotify_prefix(buf, access);
    match fault {
        Some(err) => Err(err),
        None => Ok(records),
    }
}

/// Decode up to the first malformed record.
///
/// Returns the records before the fault along with it, so a reader can
/// still release the descriptors those records carry.
pub(crate) fn decode_fanotify_prefix(
    buf: &[u8],
    access: AccessMode,
) -> (Vec<FanotifyRecord>, Option<FdkitError>) {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < FANOTIFY_METADATA_LEN {
            let reason = format!(
                "truncated fanotify metadata: {} bytes left, {} needed",
                remaining, FANOTIFY_METADATA_LEN
            );
            return (records, Some(FdkitError::decode(offset, reason)));
        }

        let event_len = u32::from_ne_bytes(field(buf, offset));
        let version = buf[offset + 4];
        let mask = u64::from_ne_bytes(field(buf, offset + 8));
        let fd = i32::from_ne_bytes(field(buf, offset + 16));
        let pid = i32::from_ne_bytes(field(buf, offset + 20));

        let declared = event_len as usize;
        if declared < FANOTIFY_METADATA_LEN {
            let reason = format!(
                "fanotify event_len {} is shorter than the metadata ({})",
                declared, FANOTIFY_METADATA_LEN
            );
            return (records, Some(FdkitError::decode(offset, reason)));
        }
        if declared > remaining {
            let reason = format!(
                "fanotify event_len {} overruns buffer ({} bytes left)",
                declared, remaining
            );
            return (records, Some(FdkitError::decode(offset, reason)));
        }

        let record = FanotifyRecord {
            version,
            mask: FanMask::from_bits_retain(mask),
            fd: (fd != libc::FAN_NOFD).then_some(fd),
            pid,
            event_len,
            access,
        };
        trace!("decoded {:?} at offset {}", record, offset);
        records.push(record);

        offset += declared;
    }

    (records, None)
}

/// Copy `N` bytes starting at `at`. Callers bounds-check first.
fn field<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
