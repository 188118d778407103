//! Archive creation.
//!
//! Streams a gzip-compressed tar of a directory tree. The first entry is always
//! the [hash index](crate::index), followed by the tree in sorted walk order.

use crate::error::{ErrorKind, Result};
use crate::index::{self, HashIndex, INDEX_ENTRY_NAME};
use crate::manifest::Manifest;
use crate::policy::{LinkCheck, PathPolicy};
use crate::tree::{self, TreeItem, TreeItemKind};
use exn::{OptionExt, ResultExt};
use filetime::FileTime;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, Metadata};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tar::{EntryType, Header};
use tracing::instrument;

/// Longest value the ustar `name` and `linkname` fields hold.
const USTAR_FIELD_LEN: usize = 100;
const PAX_HEADER_NAME: &[u8] = b"././@PaxHeader";

/// Result of a successful [`pack`].
#[derive(Debug, Default)]
pub struct Packed {
    /// Every regular file and symlink written to the archive.
    pub manifest: Manifest,
    pub warnings: Vec<String>,
}

/// Packs `root/source` into a new gzip-compressed tar at `destination`.
///
/// Entry names are relative to `root`. The source tree is only read. On
/// failure the partially written destination is removed.
#[instrument(skip_all, fields(destination = %destination.display(), source = %source.display()))]
pub fn pack(destination: &Path, root: &Path, source: &Path, policy: PathPolicy) -> Result<Packed> {
    let root = std::path::absolute(root).or_raise(|| ErrorKind::Io(root.to_path_buf()))?;
    let source_directory = root.join(source);
    if !source_directory.is_dir() {
        exn::bail!(ErrorKind::SourceNotFound(source_directory));
    }

    let tree = tree::walk(&root, source)?;
    let index = HashIndex::build(&root, &tree)?;
    tracing::debug!(entries = tree.len(), hashed = index.len(), "hashed source tree");

    let file = File::create(destination).or_raise(|| ErrorKind::Io(destination.to_path_buf()))?;
    let writer = ArchiveWriter {
        builder: tar::Builder::new(GzEncoder::new(BufWriter::new(file), Compression::default())),
        root: &root,
        policy,
        packed: Packed::default(),
    };
    let result = writer.write(&index, tree.iter(), destination);
    if result.is_err()
        && let Err(err) = fs::remove_file(destination)
    {
        tracing::warn!(path = %destination.display(), error = %err, "failed to remove incomplete archive");
    }
    let packed = result?;
    tracing::info!(
        files = packed.manifest.len(),
        warnings = packed.warnings.len(),
        "archive created"
    );
    Ok(packed)
}

struct ArchiveWriter<'a, W: Write> {
    builder: tar::Builder<W>,
    root: &'a Path,
    policy: PathPolicy,
    packed: Packed,
}

impl<'a, W: Write> ArchiveWriter<'a, GzEncoder<BufWriter<W>>> {
    fn write<'t>(
        mut self,
        index: &HashIndex,
        items: impl Iterator<Item = &'t TreeItem>,
        destination: &Path,
    ) -> Result<Packed> {
        self.append_index(index)?;
        for item in items {
            self.append_item(item)?;
        }

        let io_error = || ErrorKind::Io(destination.to_path_buf());
        let encoder = self.builder.into_inner().or_raise(io_error)?;
        let mut buffered = encoder.finish().or_raise(io_error)?;
        buffered.flush().or_raise(io_error)?;
        Ok(self.packed)
    }
}

impl<W: Write> ArchiveWriter<'_, W> {
    fn append_index(&mut self, index: &HashIndex) -> Result<()> {
        let json = index.to_json()?;
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(json.len() as u64);
        self.append(header, INDEX_ENTRY_NAME, None, json.as_slice())
    }

    fn append_item(&mut self, item: &TreeItem) -> Result<()> {
        if item.kind == TreeItemKind::Other {
            self.warn(format!("skipping unsupported file type: {}", item.path.display()));
            return Ok(());
        }
        let name = index::entry_name(&item.path)?;
        if self.policy.is_bad(&name) {
            exn::bail!(ErrorKind::InvalidPath(name));
        }
        tracing::trace!(name = %name, kind = ?item.kind, "appending entry");
        match item.kind {
            TreeItemKind::Directory => {
                let header = header_for(&item.metadata, EntryType::Directory, 0);
                self.append(header, &name, None, io::empty())
            },
            TreeItemKind::Regular => self.append_file(item, &name),
            TreeItemKind::Symlink => self.append_symlink(item, &name),
            TreeItemKind::Other => Ok(()),
        }
    }

    fn append_file(&mut self, item: &TreeItem, name: &str) -> Result<()> {
        let path = self.root.join(&item.path);
        let file = File::open(&path).or_raise(|| ErrorKind::Io(path.clone()))?;
        let metadata = file.metadata().or_raise(|| ErrorKind::Io(path.clone()))?;
        let header = header_for(&metadata, EntryType::Regular, metadata.len());
        self.append(header, name, None, file.take(metadata.len()))?;
        self.packed.manifest.push(&item.path);
        Ok(())
    }

    fn append_symlink(&mut self, item: &TreeItem, name: &str) -> Result<()> {
        let path = self.root.join(&item.path);
        let target = fs::read_link(&path).or_raise(|| ErrorKind::Io(path.clone()))?;
        let target = target
            .to_str()
            .ok_or_raise(|| ErrorKind::InvalidPath(format!("{name} -> {}", target.display())))?;
        if self.policy.check_link(self.root, &item.path, target)? == LinkCheck::Outside {
            self.warn(format!("link {name} points outside the root: {target}"));
        }
        if !path.exists() {
            self.warn(format!("skipping dangling link {name} -> {target}"));
            return Ok(());
        }
        let header = header_for(&item.metadata, EntryType::Symlink, 0);
        self.append(header, name, Some(target), io::empty())?;
        self.packed.manifest.push(&item.path);
        Ok(())
    }

    /// Writes `header` and `data`, preceded by a PAX extended header when the
    /// name or link target does not fit the ustar fields as-is.
    fn append(&mut self, mut header: Header, name: &str, link: Option<&str>, data: impl Read) -> Result<()> {
        let mut records = Vec::new();
        if needs_extension(name) {
            records.extend(pax_record("path", name));
        }
        if let Some(link) = link.filter(|link| needs_extension(link)) {
            records.extend(pax_record("linkpath", link));
        }
        if !records.is_empty() {
            let mut pax = Header::new_ustar();
            pax.set_entry_type(EntryType::XHeader);
            pax.set_mode(0o644);
            pax.set_size(records.len() as u64);
            write_field(&mut pax.as_old_mut().name, PAX_HEADER_NAME);
            pax.set_cksum();
            self.builder
                .append(&pax, records.as_slice())
                .or_raise(|| ErrorKind::Io(self.root.join(name)))?;
        }

        // Oversized values are truncated here; readers take the PAX record.
        write_field(&mut header.as_old_mut().name, name.as_bytes());
        if let Some(link) = link {
            write_field(&mut header.as_old_mut().linkname, link.as_bytes());
        }
        header.set_cksum();
        self.builder
            .append(&header, data)
            .or_raise(|| ErrorKind::Io(self.root.join(name)))
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.packed.warnings.push(message);
    }
}

fn header_for(metadata: &Metadata, entry_type: EntryType, size: u64) -> Header {
    let mut header = Header::new_ustar();
    header.set_entry_type(entry_type);
    header.set_mode(file_mode(metadata));
    header.set_mtime(FileTime::from_last_modification_time(metadata).unix_seconds().max(0) as u64);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(size);
    header
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

fn needs_extension(value: &str) -> bool {
    value.len() > USTAR_FIELD_LEN || !value.is_ascii()
}

/// Encodes one `"<length> <key>=<value>\n"` record, where the length counts
/// the whole record including its own digits.
fn pax_record(key: &str, value: &str) -> Vec<u8> {
    let body = key.len() + value.len() + 3;
    let mut length = body + 1;
    while body + length.to_string().len() != length {
        length = body + length.to_string().len();
    }
    format!("{length} {key}={value}\n").into_bytes()
}

fn write_field(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
    field[len..].fill(0);
}
