//! Layer extraction into the staging directory.
//!
//! Layers are applied one at a time in manifest order, so later layers
//! override earlier ones. Whiteout entries (`.wh.<name>` and the opaque
//! marker `.wh..wh..opq`) delete what earlier layers put in place.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use minibox_common::error::{MiniboxError, Result};

use crate::download::DownloadedLayer;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Summary of one applied layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLayer {
    /// Size of the archive in bytes.
    pub size_bytes: u64,
    /// Number of entries unpacked.
    pub entries: usize,
    /// Number of whiteouts applied.
    pub whiteouts: usize,
}

/// Applies every downloaded layer in order, removing each archive after its
/// last use.
///
/// Nothing is rolled back on failure: layers applied before the failing one
/// stay in `target`.
///
/// # Errors
///
/// Returns the first extraction failure.
pub fn apply_layers(downloaded: &[DownloadedLayer], target: &Path) -> Result<Vec<ExtractedLayer>> {
    downloaded
        .iter()
        .enumerate()
        .map(|(index, d)| {
            tracing::debug!(index, digest = %d.layer.digest, "applying layer");
            let extracted = extract_layer(&d.archive, target).map_err(|e| MiniboxError::Layer {
                digest: d.layer.digest.to_string(),
                message: e.to_string(),
            })?;
            let reused = downloaded[index + 1..]
                .iter()
                .any(|later| later.archive == d.archive);
            if !reused {
                std::fs::remove_file(&d.archive).map_err(|e| MiniboxError::Layer {
                    digest: d.layer.digest.to_string(),
                    message: format!("remove archive: {e}"),
                })?;
            }
            Ok(extracted)
        })
        .collect()
}

/// Unpacks a tar archive into `target`.
///
/// Gzip-compressed archives are detected by their magic bytes. Whiteouts
/// only hide content from lower layers, so they are all applied before any
/// of the layer's own entries are unpacked.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or an entry cannot be
/// unpacked.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<ExtractedLayer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    let io_err = io_error(archive_path);
    std::fs::create_dir_all(target).map_err(io_error(target))?;
    let size_bytes = std::fs::metadata(archive_path).map_err(&io_err)?.len();

    let mut whiteouts = 0;
    for entry in open_archive(archive_path)?.entries().map_err(&io_err)? {
        let entry = entry.map_err(&io_err)?;
        let path = entry.path().map_err(&io_err)?;
        if let Some(whiteout) = whiteout_target(&path) {
            apply_whiteout(target, &whiteout)?;
            whiteouts += 1;
        }
    }

    let mut archive = open_archive(archive_path)?;
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut entries = 0;
    for entry in archive.entries().map_err(&io_err)? {
        let mut entry = entry.map_err(&io_err)?;
        let path = entry.path().map_err(&io_err)?.into_owned();
        if is_whiteout(&path) {
            continue;
        }
        let _ = entry.unpack_in(target).map_err(io_error(&target.join(&path)))?;
        entries += 1;
    }

    tracing::info!(size = size_bytes, entries, whiteouts, "layer extracted");
    Ok(ExtractedLayer {
        size_bytes,
        entries,
        whiteouts,
    })
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> MiniboxError {
    let path = path.to_path_buf();
    move |source| MiniboxError::Io {
        path: path.clone(),
        source,
    }
}

fn open_archive(path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let io_err = io_error(path);
    let mut file = File::open(path).map_err(&io_err)?;
    let reader: Box<dyn Read> = if is_gzip(&mut file).map_err(&io_err)? {
        Box::new(flate2::read::GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(tar::Archive::new(reader))
}

/// Sniffs the gzip magic and rewinds the file.
fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    let _ = file.seek(SeekFrom::Start(0))?;
    Ok(n == magic.len() && magic == GZIP_MAGIC)
}

/// What a whiteout entry removes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Whiteout {
    /// Remove a single path.
    Path(PathBuf),
    /// Remove everything inside a directory, keeping the directory.
    Opaque(PathBuf),
}

fn is_whiteout(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.starts_with(WHITEOUT_PREFIX))
}

fn whiteout_target(path: &Path) -> Option<Whiteout> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    if !name.starts_with(WHITEOUT_PREFIX) {
        return None;
    }
    let parent = sanitize(path.parent().unwrap_or_else(|| Path::new("")))?;
    if name == OPAQUE_WHITEOUT {
        return Some(Whiteout::Opaque(parent));
    }
    let hidden = &name[WHITEOUT_PREFIX.len()..];
    if hidden.is_empty() || hidden == "." || hidden == ".." {
        return None;
    }
    Some(Whiteout::Path(parent.join(hidden)))
}

/// Keeps only normal components so a whiteout cannot escape the target.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn apply_whiteout(target: &Path, whiteout: &Whiteout) -> Result<()> {
    match whiteout {
        Whiteout::Path(relative) => {
            let path = target.join(relative);
            let parent = path.parent().unwrap_or(target);
            if within(target, parent) {
                remove_path(&path)?;
            } else {
                tracing::warn!(path = %path.display(), "whiteout leaves the target, skipped");
            }
            Ok(())
        }
        Whiteout::Opaque(relative) => {
            let dir = target.join(relative);
            if !within(target, &dir) {
                tracing::warn!(path = %dir.display(), "opaque whiteout leaves the target, skipped");
                return Ok(());
            }
            let Ok(children) = std::fs::read_dir(&dir) else {
                return Ok(());
            };
            for child in children {
                let child = child.map_err(|e| MiniboxError::Io {
                    path: dir.clone(),
                    source: e,
                })?;
                remove_path(&child.path())?;
            }
            Ok(())
        }
    }
}

/// Whether `path`, with symlinks resolved, is `target` or below it. A path
/// that does not exist has nothing to remove and counts as outside.
fn within(target: &Path, path: &Path) -> bool {
    match (target.canonicalize(), path.canonicalize()) {
        (Ok(root), Ok(resolved)) => resolved.starts_with(root),
        _ => false,
    }
}

/// Removes `path` itself; a symlink is unlinked, never followed.
fn remove_path(path: &Path) -> Result<()> {
    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| MiniboxError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), "whiteout applied");
    Ok(())
}
