//! fdkit-namespace: Linux namespace isolation
//!
//! Provides namespace selection, `unshare`/`setns`, namespace descriptors and
//! user namespace UID/GID mapping for unprivileged use.

pub mod config;
pub mod ns;
pub mod user_ns;

pub use config::{NamespaceConfig, NamespaceType};
pub use ns::{namespace_inode, setns, shares_namespace, unshare, NamespaceFd};
pub use user_ns::{enter_user_namespace, map_current_user, write_id_maps, IdMapping};
