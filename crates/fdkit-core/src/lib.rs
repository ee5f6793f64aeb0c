//! fdkit-core: descriptor lifecycle, errno taxonomy and read-cycle plumbing
//!
//! This crate provides the foundation shared by all fdkit sub-crates:
//! - Error kinds, per-call-site errno classification and the Result alias
//! - The [`Handle`] descriptor owner and the [`Eventlike`] lifecycle trait
//! - The buffered-length probe used before every event read
//! - Runtime detection of kernel features

pub mod capabilities;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod probe;

pub use capabilities::KernelFeatures;
pub use error::{CallSite, ErrorKind, FdkitError, Result};
pub use handle::{Eventlike, Handle};
