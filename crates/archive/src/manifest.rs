use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Ordered list of root-relative paths that a pack or unpack pass
/// materialized: every regular file and symlink, never directories.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    paths: Vec<PathBuf>,
}

impl Manifest {
    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Set view for membership checks during reconciliation.
    pub fn to_set(&self) -> HashSet<&Path> {
        self.iter().collect()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for Manifest {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}
