//! `.sealpkg` installer archives: gzip-compressed tar with `manifest.toml`
//! at the root.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sealpkg_protocol::{MANIFEST_FILE, PackageError, PackageResult};
use tar::{Archive, Builder, EntryType};
use tracing::{debug, warn};

/// Archive-relative entry path with `.` components removed.
///
/// Returns `None` for the root entry itself; absolute paths and `..` are
/// rejected.
fn entry_relative_path(raw: &Path) -> PackageResult<Option<PathBuf>> {
    let mut relative = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(PackageError::MalformedArchive(format!(
                    "entry contains path traversal: {}",
                    raw.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PackageError::MalformedArchive(format!(
                    "entry has an absolute path: {}",
                    raw.display()
                )));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(relative))
    }
}

fn open_archive(path: &Path) -> PackageResult<Archive<GzDecoder<File>>> {
    let file = File::open(path)?;
    Ok(Archive::new(GzDecoder::new(file)))
}

fn malformed(error: std::io::Error) -> PackageError {
    PackageError::MalformedArchive(error.to_string())
}

/// Raw bytes of the root `manifest.toml`.
pub fn read_manifest_bytes(archive_path: &Path) -> PackageResult<Vec<u8>> {
    let mut archive = open_archive(archive_path)?;
    for entry in archive.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        let raw = entry.path().map_err(malformed)?.into_owned();
        let Some(relative) = entry_relative_path(&raw)? else {
            continue;
        };
        if relative == Path::new(MANIFEST_FILE) && entry.header().entry_type().is_file() {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(malformed)?;
            return Ok(bytes);
        }
    }
    Err(PackageError::ManifestNotFound(format!(
        "{} has no {MANIFEST_FILE} at its root",
        archive_path.display()
    )))
}

/// Upper bounds on what a single archive may unpack to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Total uncompressed size of all regular files.
    pub max_bytes: u64,
    pub max_entries: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
            max_entries: 10_000,
        }
    }
}

/// Unpack every regular file and directory into `dest`, returning the
/// relative paths of the extracted files. Links and special entries are
/// skipped.
///
/// Sizes are checked against `limits` from each entry header before any
/// of its data is written, so a small compressed archive cannot expand
/// past the configured bounds.
pub fn extract_archive(
    archive_path: &Path,
    dest: &Path,
    limits: ExtractLimits,
) -> PackageResult<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut archive = open_archive(archive_path)?;
    let mut extracted = Vec::new();
    let mut entries = 0usize;
    let mut total_bytes = 0u64;

    for entry in archive.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        entries += 1;
        if entries > limits.max_entries {
            return Err(PackageError::MalformedArchive(format!(
                "archive has more than {} entries",
                limits.max_entries
            )));
        }
        let raw = entry.path().map_err(malformed)?.into_owned();
        let Some(relative) = entry_relative_path(&raw)? else {
            continue;
        };
        let target = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => fs::create_dir_all(&target)?,
            kind if kind.is_file() => {
                total_bytes = total_bytes.saturating_add(entry.header().size().map_err(malformed)?);
                if total_bytes > limits.max_bytes {
                    return Err(PackageError::MalformedArchive(format!(
                        "archive unpacks to more than {} bytes",
                        limits.max_bytes
                    )));
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(malformed)?;
                extracted.push(relative);
            }
            kind => {
                warn!(entry = %raw.display(), ?kind, "skipping unsupported archive entry");
            }
        }
    }

    debug!(
        archive = %archive_path.display(),
        files = extracted.len(),
        "archive extracted"
    );
    Ok(extracted)
}

fn collect_entries(
    dir: &Path,
    base: &Path,
    out: &mut Vec<(PathBuf, PathBuf, bool)>,
) -> PackageResult<()> {
    let mut children = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|child| child.file_name());

    for child in children {
        let file_type = child.file_type()?;
        let path = child.path();
        let relative = path
            .strip_prefix(base)
            .map_err(|error| PackageError::MalformedArchive(error.to_string()))?
            .to_path_buf();
        if file_type.is_dir() {
            out.push((path.clone(), relative, true));
            collect_entries(&path, base, out)?;
        } else if file_type.is_file() {
            out.push((path, relative, false));
        }
    }
    Ok(())
}

/// Build an installer archive from a package source directory. Returns the
/// number of files written.
pub fn pack_directory(source: &Path, dest: &Path) -> PackageResult<usize> {
    if !source.join(MANIFEST_FILE).is_file() {
        return Err(PackageError::ManifestNotFound(format!(
            "{} has no {MANIFEST_FILE}",
            source.display()
        )));
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut entries = Vec::new();
    collect_entries(source, source, &mut entries)?;

    let file = File::create(dest)?;
    let dest_canonical = dest.canonicalize().ok();
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let mut files = 0;
    for (path, relative, is_dir) in entries {
        if is_dir {
            builder.append_dir(&relative, &path)?;
            continue;
        }
        if dest_canonical.is_some() && path.canonicalize().ok() == dest_canonical {
            continue;
        }
        builder.append_path_with_name(&path, &relative)?;
        files += 1;
    }

    builder.into_inner()?.finish()?;
    debug!(source = %source.display(), dest = %dest.display(), files, "package archive written");
    Ok(files)
}
