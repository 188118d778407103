//! File tree enumeration without following symlinks.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Classification of a walked entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeItemKind {
    Regular,
    Symlink,
    Directory,
    /// Device, socket, fifo, or anything else that cannot be archived.
    Other,
}

/// A single entry of a walked tree.
#[derive(Clone, Debug)]
pub struct TreeItem {
    /// Path relative to the walk root.
    pub path: PathBuf,
    pub kind: TreeItemKind,
    /// Metadata of the entry itself (never of a link target).
    pub metadata: Metadata,
}

/// Snapshot of a directory tree in sorted walk order.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    items: Vec<TreeItem>,
}

impl Tree {
    pub fn iter(&self) -> impl Iterator<Item = &TreeItem> {
        self.items.iter()
    }

    /// Regular files only, in walk order.
    pub fn regular_files(&self) -> impl Iterator<Item = &TreeItem> {
        self.items.iter().filter(|item| item.kind == TreeItemKind::Regular)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Walks `root/directory` depth-first, parents before children, siblings sorted
/// by file name. Item paths are relative to `root`, so the first item is
/// `directory` itself.
pub fn walk(root: &Path, directory: &Path) -> Result<Tree> {
    let start = root.join(directory);
    let mut items = Vec::new();
    for entry in WalkDir::new(&start).follow_links(false).sort_by_file_name() {
        let entry = entry.or_raise(|| ErrorKind::Io(start.clone()))?;
        let metadata = entry.metadata().or_raise(|| ErrorKind::Io(entry.path().to_path_buf()))?;
        let path = entry
            .path()
            .strip_prefix(root)
            .or_raise(|| ErrorKind::InvalidPath(entry.path().display().to_string()))?
            .to_path_buf();
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            TreeItemKind::Symlink
        } else if file_type.is_dir() {
            TreeItemKind::Directory
        } else if file_type.is_file() {
            TreeItemKind::Regular
        } else {
            TreeItemKind::Other
        };
        items.push(TreeItem { path, kind, metadata });
    }
    tracing::trace!(start = %start.display(), count = items.len(), "walked tree");
    Ok(Tree { items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_sorted_with_relative_paths() {
        let temp = tempfile::tempdir().unwrap();
        let modules = temp.path().join("node_modules");
        fs::create_dir_all(modules.join("b")).unwrap();
        fs::create_dir_all(modules.join("a")).unwrap();
        fs::write(modules.join("b/index.js"), "b").unwrap();
        fs::write(modules.join("a/index.js"), "a").unwrap();

        let tree = walk(temp.path(), Path::new("node_modules")).unwrap();
        let paths: Vec<_> = tree.iter().map(|item| item.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("node_modules"),
                PathBuf::from("node_modules/a"),
                PathBuf::from("node_modules/a/index.js"),
                PathBuf::from("node_modules/b"),
                PathBuf::from("node_modules/b/index.js"),
            ]
        );
        assert_eq!(tree.regular_files().count(), 2);
        assert_eq!(tree.iter().next().unwrap().kind, TreeItemKind::Directory);
    }

    #[cfg(unix)]
    #[test]
    fn does_not_follow_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let modules = temp.path().join("node_modules");
        let outside = temp.path().join("outside");
        fs::create_dir_all(&modules).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(&outside, modules.join("link")).unwrap();

        let tree = walk(temp.path(), Path::new("node_modules")).unwrap();
        assert_eq!(tree.len(), 2);
        let link = tree.iter().find(|item| item.path.ends_with("link")).unwrap();
        assert_eq!(link.kind, TreeItemKind::Symlink);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = walk(temp.path(), Path::new("node_modules")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(_)));
    }
}
