//! Secure, incremental archiving of dependency trees.
//!
//! [`pack`] streams a directory into a gzip-compressed tar whose first entry is
//! a [`HashIndex`] of every regular file. [`unpack`] applies such an archive
//! under an explicit root, skipping files whose content already matches, and
//! [`reconcile`] then removes whatever the archive did not contain. Entry names
//! and link targets pass through a [`PathPolicy`] in both directions.

pub mod digest;
pub mod error;
pub mod index;
mod manifest;
pub mod pack;
pub mod policy;
pub mod reconcile;
pub mod tree;
pub mod unpack;

pub use crate::digest::{ContentHash, sha256_reader, sha256_str};
pub use crate::index::{HashIndex, HashedTreeItem, INDEX_ENTRY_NAME};
pub use crate::manifest::Manifest;
pub use crate::pack::{Packed, pack};
pub use crate::policy::{LinkCheck, PathPolicy};
pub use crate::reconcile::reconcile;
pub use crate::tree::{Tree, TreeItem, TreeItemKind};
pub use crate::unpack::{Unpacked, unpack};
