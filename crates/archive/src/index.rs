//! The hash index carried as the first archive entry.

use crate::digest::ContentHash;
use crate::error::{ErrorKind, Result};
use crate::tree::Tree;
use exn::{OptionExt, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Entry name of the hash index. Always the first entry of an archive.
pub const INDEX_ENTRY_NAME: &str = ".modcache-index.json";

/// A regular file and the BLAKE3 digest of its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashedTreeItem {
    /// Slash-separated path relative to the archive root.
    pub path: String,
    pub digest: ContentHash,
}

/// Maps root-relative entry names to content digests.
///
/// Serialized as a single JSON object, `{"<path>": "<base64 BLAKE3>"}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashIndex(BTreeMap<String, ContentHash>);

impl HashIndex {
    /// Hashes every regular file of `tree`, whose item paths are relative to
    /// `root`.
    pub fn build(root: &Path, tree: &Tree) -> Result<Self> {
        let mut index = Self::default();
        for item in tree.regular_files() {
            let name = entry_name(&item.path)?;
            let digest = ContentHash::from_file(&root.join(&item.path))?;
            index.insert(HashedTreeItem { path: name, digest });
        }
        Ok(index)
    }

    pub fn insert(&mut self, item: HashedTreeItem) {
        self.0.insert(item.path, item.digest);
    }

    pub fn get(&self, path: &str) -> Option<&ContentHash> {
        self.0.get(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).or_raise(|| ErrorKind::InvalidIndex)
    }

    pub fn read_json(reader: impl Read) -> Result<Self> {
        serde_json::from_reader(reader).or_raise(|| ErrorKind::InvalidIndex)
    }
}

impl FromIterator<HashedTreeItem> for HashIndex {
    fn from_iter<I: IntoIterator<Item = HashedTreeItem>>(iter: I) -> Self {
        Self(iter.into_iter().map(|item| (item.path, item.digest)).collect())
    }
}

/// Renders a relative path as a slash-separated entry name.
///
/// Non-UTF-8 names cannot be represented in the index and are rejected.
pub fn entry_name(path: &Path) -> Result<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        let segment = component
            .as_os_str()
            .to_str()
            .ok_or_raise(|| ErrorKind::InvalidPath(path.to_string_lossy().into_owned()))?;
        segments.push(segment);
    }
    Ok(segments.join("/"))
}
