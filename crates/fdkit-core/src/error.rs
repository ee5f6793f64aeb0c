//! Error types and errno classification for fdkit operations
//!
//! Every wrapped syscall owns a [`CallSite`]: a small static table mapping the
//! errno values that call can legitimately produce to an [`ErrorKind`]. The
//! same raw code means different things on different calls, so tables are
//! never shared between sites. Codes missing from a table classify as
//! [`ErrorKind::Unknown`] and are still surfaced with the raw value attached.

use std::fmt;
use std::io;

use log::warn;
use nix::errno::{Errno, ErrnoSentinel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for fdkit operations
pub type Result<T> = std::result::Result<T, FdkitError>;

/// Semantic failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad flags, path or size. A caller bug, not retryable.
    InvalidArgument,
    /// Missing capability or a conflicting mapping.
    PermissionDenied,
    /// Per-process or system-wide descriptor/watch limit reached.
    ResourceExhausted,
    /// Kernel allocation failure.
    OutOfMemory,
    /// Feature unavailable on this kernel or configuration.
    NotSupported,
    /// Decoder invariant violated or the kernel returned an impossible value.
    InternalFault,
    /// Transient busy condition. Advisory only, nothing retries internally.
    RetryLater,
    /// Unclassified raw code.
    Unknown,
    /// Operation is illegal in the object's current state (closed handle,
    /// sealed region).
    InvalidState,
    /// A non-blocking descriptor had nothing to deliver.
    WouldBlock,
}

impl ErrorKind {
    /// Whether the caller may reasonably try again after changing nothing
    /// but time or resource usage.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ResourceExhausted
                | ErrorKind::OutOfMemory
                | ErrorKind::RetryLater
                | ErrorKind::WouldBlock
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::InternalFault => "internal fault",
            ErrorKind::RetryLater => "retry later",
            ErrorKind::Unknown => "unknown error",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::WouldBlock => "would block",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during fdkit operations
#[derive(Error, Debug)]
pub enum FdkitError {
    #[error("{op} failed: {kind} (os error {}: {})", raw_code(.errno), .errno.desc())]
    Os {
        op: &'static str,
        kind: ErrorKind,
        errno: Errno,
    },

    #[error("Invalid state: {op}: {reason}")]
    InvalidState { op: &'static str, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Malformed event buffer at offset {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn raw_code(errno: &Errno) -> i32 {
    *errno as i32
}

impl FdkitError {
    /// The descriptor backing `op` has already been released.
    pub fn closed(op: &'static str) -> Self {
        FdkitError::InvalidState {
            op,
            reason: "descriptor is closed".to_string(),
        }
    }

    pub fn decode(offset: usize, reason: impl Into<String>) -> Self {
        FdkitError::Decode {
            offset,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FdkitError::Os { kind, .. } => *kind,
            FdkitError::InvalidState { .. } => ErrorKind::InvalidState,
            FdkitError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FdkitError::NotSupported(_) => ErrorKind::NotSupported,
            FdkitError::Decode { .. } => ErrorKind::InternalFault,
            FdkitError::Io(e) => match e.kind() {
                io::ErrorKind::WouldBlock => ErrorKind::WouldBlock,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
                io::ErrorKind::Unsupported => ErrorKind::NotSupported,
                io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
                _ => ErrorKind::Unknown,
            },
        }
    }

    /// The raw OS error code, when the failure came from the kernel.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            FdkitError::Os { errno, .. } => Some(*errno as i32),
            FdkitError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_would_block(&self) -> bool {
        self.kind() == ErrorKind::WouldBlock
    }
}

/// Classification table for a single foreign call.
#[derive(Debug)]
pub struct CallSite {
    name: &'static str,
    table: &'static [(Errno, ErrorKind)],
}

impl CallSite {
    pub const fn new(name: &'static str, table: &'static [(Errno, ErrorKind)]) -> Self {
        Self { name, table }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Map a raw errno to its meaning at this call site.
    pub fn classify(&self, errno: Errno) -> ErrorKind {
        self.table
            .iter()
            .find(|(code, _)| *code == errno)
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Build the classified error for `errno`.
    pub fn error(&self, errno: Errno) -> FdkitError {
        let kind = self.classify(errno);
        if kind == ErrorKind::Unknown {
            warn!(
                "{} returned unclassified errno {} ({})",
                self.name, errno as i32, errno
            );
        }
        FdkitError::Os {
            op: self.name,
            kind,
            errno,
        }
    }

    /// Classify an `io::Error` raised by a std call made on behalf of this
    /// site. Errors without an OS code are passed through.
    pub fn io_error(&self, err: io::Error) -> FdkitError {
        match err.raw_os_error() {
            Some(code) => self.error(Errno::from_raw(code)),
            None => FdkitError::Io(err),
        }
    }

    /// Convert a raw syscall return into a classified result.
    ///
    /// `value` is the foreign call's return; the `-1` sentinel triggers a
    /// read of the thread's errno.
    pub fn check<S: ErrnoSentinel + PartialEq<S>>(&self, value: S) -> Result<S> {
        Errno::result(value).map_err(|errno| self.error(errno))
    }
}
