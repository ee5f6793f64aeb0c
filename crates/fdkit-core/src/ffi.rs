//! Argument conversion for foreign calls

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{FdkitError, Result};

/// NUL-terminate `value` for a syscall. Interior NUL bytes are rejected.
pub fn c_string(what: &str, value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|_| {
        FdkitError::InvalidArgument(format!(
            "{} contains a NUL byte: {:?}",
            what, value
        ))
    })
}

pub fn c_path(path: &Path) -> Result<CString> {
    c_string("path", path.as_os_str())
}
