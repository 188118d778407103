//! Removal of files that the last extraction did not materialize.

use crate::error::{ErrorKind, Result};
use crate::manifest::Manifest;
use crate::tree::{self, TreeItemKind};
use exn::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Deletes every regular file and symlink under `root/directory` whose
/// root-relative path is absent from `manifest`, returning the removed paths.
///
/// Directories and other entries are left alone. A missing directory
/// reconciles to nothing.
#[instrument(skip_all, fields(root = %root.display(), directory = %directory.display()))]
pub fn reconcile(root: &Path, directory: &Path, manifest: &Manifest) -> Result<Vec<PathBuf>> {
    if fs::symlink_metadata(root.join(directory)).is_err() {
        tracing::debug!("nothing to reconcile");
        return Ok(Vec::new());
    }

    let keep = manifest.to_set();
    let tree = tree::walk(root, directory)?;
    let mut removed = Vec::new();
    for item in tree.iter() {
        if !matches!(item.kind, TreeItemKind::Regular | TreeItemKind::Symlink) || keep.contains(item.path.as_path()) {
            continue;
        }
        let path = root.join(&item.path);
        fs::remove_file(&path).or_raise(|| ErrorKind::Io(path.clone()))?;
        tracing::trace!(path = %item.path.display(), "removed stale file");
        removed.push(item.path.clone());
    }
    tracing::info!(removed = removed.len(), "reconciled tree");
    Ok(removed)
}
