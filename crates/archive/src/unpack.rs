//! Incremental archive extraction.
//!
//! Entries are materialized under an explicit root. Regular files whose
//! on-disk content already matches the hash index are left alone, so applying
//! the same archive twice writes nothing the second time. Nothing is created
//! below a symlink that is already on disk, whether it came from the archive
//! or was there before.

use crate::digest::ContentHash;
use crate::error::{ErrorKind, Result};
use crate::index::{HashIndex, INDEX_ENTRY_NAME};
use crate::manifest::Manifest;
use crate::policy::{LinkCheck, PathPolicy, lexical_normalize};
use exn::{OptionExt, ResultExt};
use filetime::FileTime;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Entry, EntryType};
use tracing::instrument;

/// Result of a successful [`unpack`].
#[derive(Debug, Default)]
pub struct Unpacked {
    /// Every regular file and symlink in the archive, in stream order, as the
    /// normalized path it landed on relative to the root.
    pub manifest: Manifest,
    pub warnings: Vec<String>,
    /// Regular files whose content was (re)written.
    pub written: usize,
    /// Regular files left untouched because their digest matched.
    pub skipped: usize,
}

/// Extracts a gzip-compressed tar stream under `root`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn unpack(source: impl Read, root: &Path, policy: PathPolicy) -> Result<Unpacked> {
    let root = lexical_normalize(&std::path::absolute(root).or_raise(|| ErrorKind::Io(root.to_path_buf()))?);
    let mut archive = tar::Archive::new(GzDecoder::new(source));
    let mut entries = archive.entries().or_raise(|| ErrorKind::InvalidData)?;

    let index = match entries.next() {
        Some(entry) => {
            let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
            let is_index = entry.header().entry_type().is_file()
                && entry.path_bytes().as_ref() == INDEX_ENTRY_NAME.as_bytes();
            if !is_index {
                exn::bail!(ErrorKind::MissingIndex);
            }
            HashIndex::read_json(&mut entry)?
        },
        None => exn::bail!(ErrorKind::MissingIndex),
    };
    tracing::debug!(hashed = index.len(), "read hash index");

    let mut extractor = Extractor {
        root: &root,
        policy,
        index,
        directories: Vec::new(),
        unpacked: Unpacked::default(),
    };
    for entry in entries {
        let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
        extractor.extract(&mut entry)?;
    }
    let unpacked = extractor.finish();
    tracing::info!(
        written = unpacked.written,
        skipped = unpacked.skipped,
        warnings = unpacked.warnings.len(),
        "archive extracted"
    );
    Ok(unpacked)
}

struct Extractor<'a> {
    root: &'a Path,
    policy: PathPolicy,
    index: HashIndex,
    /// Directory modes and mtimes, applied last-in first-out once every entry
    /// is down so read-only directories can still be filled.
    directories: Vec<(PathBuf, u32, FileTime)>,
    unpacked: Unpacked,
}

impl Extractor<'_> {
    fn extract<R: Read>(&mut self, entry: &mut Entry<'_, R>) -> Result<()> {
        let raw = utf8(entry.path_bytes().into_owned())?;
        let name = clean_entry_name(&raw);
        if self.policy.is_bad(&name) {
            exn::bail!(ErrorKind::InvalidPath(raw));
        }
        // Absolute names only get this far when the policy allows them; they
        // are still materialized beneath the root.
        let name = name.trim_start_matches('/').to_string();
        let target = self.resolve(&name)?;
        let relative = target
            .strip_prefix(self.root)
            .map(Path::to_path_buf)
            .or_raise(|| ErrorKind::InvalidPath(name.clone()))?;

        let header = entry.header();
        let entry_type = header.entry_type();
        let mode = header.mode().or_raise(|| ErrorKind::InvalidData)?;
        let mtime = header.mtime().or_raise(|| ErrorKind::InvalidData)?;
        let mtime = FileTime::from_unix_time(i64::try_from(mtime).unwrap_or(i64::MAX), 0);
        tracing::trace!(name = %name, kind = ?entry_type, "extracting entry");

        match entry_type {
            EntryType::Directory => self.directory(target, mode, mtime),
            EntryType::Symlink => self.symlink(entry, &relative, &target),
            kind if kind.is_file() => self.regular(entry, &name, &relative, &target, mode, mtime),
            kind => exn::bail!(ErrorKind::UnsupportedEntry(format!("{name} ({kind:?})"))),
        }
    }

    /// Joins `name` onto the root, refusing anything that resolves to the
    /// root itself or outside of it, and anything below a symlink already on
    /// disk.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let target = lexical_normalize(&self.root.join(name));
        if target == self.root || !target.starts_with(self.root) {
            exn::bail!(ErrorKind::InvalidPath(name.to_string()));
        }
        if target.parent().is_some_and(|parent| self.crosses_symlink(parent)) {
            exn::bail!(ErrorKind::InvalidPath(format!("{name} (below a symlink)")));
        }
        Ok(target)
    }

    /// Whether any existing component of `path` below the root is a symlink.
    fn crosses_symlink(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(self.root) else {
            return true;
        };
        let mut current = self.root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(metadata) if metadata.file_type().is_symlink() => return true,
                Ok(_) => {},
                // Nothing exists below a missing component.
                Err(_) => return false,
            }
        }
        false
    }

    /// Whether resolving `target` from `parent` (relative to the root) applies
    /// `..` to a symlink on disk, where the lexical and physical resolutions
    /// part ways.
    fn climbs_through_symlink(&self, parent: &Path, target: &str) -> bool {
        let target = Path::new(target);
        if target.is_absolute() {
            return false;
        }
        let mut current = self.root.join(parent);
        for component in target.components() {
            match component {
                Component::ParentDir => {
                    if fs::symlink_metadata(&current).is_ok_and(|metadata| metadata.file_type().is_symlink()) {
                        return true;
                    }
                    current.pop();
                },
                Component::Normal(segment) => current.push(segment),
                _ => {},
            }
        }
        false
    }

    fn directory(&mut self, target: PathBuf, mode: u32, mtime: FileTime) -> Result<()> {
        let io_error = || ErrorKind::Io(target.clone());
        match fs::symlink_metadata(&target) {
            Ok(metadata) if metadata.is_dir() => make_writable(&target, &metadata).or_raise(io_error)?,
            Ok(_) => {
                fs::remove_file(&target).or_raise(io_error)?;
                fs::create_dir_all(&target).or_raise(io_error)?;
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&target).or_raise(io_error)?;
            },
            Err(err) => return Err(err).or_raise(io_error),
        }
        self.directories.push((target, mode, mtime));
        Ok(())
    }

    fn regular<R: Read>(
        &mut self,
        entry: &mut Entry<'_, R>,
        name: &str,
        relative: &Path,
        target: &Path,
        mode: u32,
        mtime: FileTime,
    ) -> Result<()> {
        let io_error = || ErrorKind::Io(target.to_path_buf());
        let existing = fs::symlink_metadata(target).ok();
        if existing.as_ref().is_some_and(|metadata| metadata.is_file())
            && let Some(expected) = self.index.get(name)
            && ContentHash::from_file(target).is_ok_and(|actual| actual == *expected)
        {
            tracing::trace!(name = %name, "content unchanged, skipping");
            self.unpacked.skipped += 1;
            self.unpacked.manifest.push(relative);
            return Ok(());
        }

        match existing {
            Some(metadata) if metadata.is_dir() => fs::remove_dir_all(target).or_raise(io_error)?,
            Some(_) => fs::remove_file(target).or_raise(io_error)?,
            None => create_parent(target).or_raise(io_error)?,
        }
        let mut file = File::create(target).or_raise(io_error)?;
        io::copy(entry, &mut file).or_raise(io_error)?;
        drop(file);
        filetime::set_file_mtime(target, mtime).or_raise(io_error)?;
        set_mode(target, mode).or_raise(io_error)?;

        self.unpacked.written += 1;
        self.unpacked.manifest.push(relative);
        Ok(())
    }

    fn symlink<R: Read>(&mut self, entry: &Entry<'_, R>, relative: &Path, target: &Path) -> Result<()> {
        let name = relative.display();
        let link = entry
            .link_name_bytes()
            .ok_or_raise(|| ErrorKind::UnsupportedEntry(format!("{name} (symlink without target)")))?;
        let link = utf8(link.into_owned())?;
        if self.policy.check_link(self.root, relative, &link)? == LinkCheck::Outside {
            self.warn(format!("link {name} points outside the root: {link}"));
        } else if self.climbs_through_symlink(relative.parent().unwrap_or(Path::new("")), &link) {
            exn::bail!(ErrorKind::InvalidPath(format!("{name} -> {link} (through a symlink)")));
        }
        sync_symlink(&link, target).or_raise(|| ErrorKind::Io(target.to_path_buf()))?;
        self.unpacked.manifest.push(relative);
        Ok(())
    }

    fn finish(mut self) -> Unpacked {
        while let Some((path, mode, mtime)) = self.directories.pop() {
            // A later entry may have replaced the directory with a file or link.
            if !fs::symlink_metadata(&path).is_ok_and(|metadata| metadata.is_dir()) {
                continue;
            }
            if let Err(err) = set_mode(&path, mode) {
                self.warn(format!("failed to restore mode of {}: {err}", path.display()));
            }
            if let Err(err) = filetime::set_file_mtime(&path, mtime) {
                self.warn(format!("failed to restore mtime of {}: {err}", path.display()));
            }
        }
        self.unpacked
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.unpacked.warnings.push(message);
    }
}

/// Drops empty and `.` segments, keeping a leading `/`.
fn clean_entry_name(raw: &str) -> String {
    let joined = raw
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    match raw.starts_with('/') {
        true => format!("/{joined}"),
        false => joined,
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).or_raise(|| ErrorKind::InvalidPath("non UTF-8 entry name".to_string()))
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Gives the owner full access to an existing directory until [`finish`]
/// restores its archived mode.
///
/// [`finish`]: Extractor::finish
#[cfg(unix)]
fn make_writable(path: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    if mode & 0o700 == 0o700 {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))
}

#[cfg(not(unix))]
fn make_writable(path: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    let mut permissions = metadata.permissions();
    if !permissions.readonly() {
        return Ok(());
    }
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

/// Makes `location` a symlink to `original`, leaving a matching link alone.
fn sync_symlink(original: &str, location: &Path) -> io::Result<()> {
    match fs::symlink_metadata(location) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            if fs::read_link(location)? == Path::new(original) {
                return Ok(());
            }
            fs::remove_file(location)?;
        },
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(location)?,
        Ok(_) => fs::remove_file(location)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => create_parent(location)?,
        Err(err) => return Err(err),
    }
    create_symlink(original, location)
}

#[cfg(unix)]
fn create_symlink(original: &str, location: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, location)
}

#[cfg(windows)]
fn create_symlink(original: &str, location: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, location)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}
