//! fdkit-memfd: sealable anonymous memory files
//!
//! A [`Memfd`] is a file with no path. Its capabilities (grow, shrink,
//! write) can be revoked one way for every holder of the region, which makes
//! it suitable for handing a buffer to an untrusted peer.

pub mod memfd;
pub mod mmap;
pub mod seal;

pub use memfd::{Memfd, MemfdConfig};
pub use mmap::{MapOptions, MappedRegion, Protection, Sharing};
pub use seal::SealFlags;
