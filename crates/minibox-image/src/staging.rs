//! Per-run staging directory.
//!
//! The staging directory is created fresh under the configured temp root,
//! filled with extracted layers, and then becomes the child's root. It is
//! not removed on drop: after a successful bootstrap it is the running root.

use std::path::{Path, PathBuf};

use minibox_common::constants::{LAYER_ARCHIVE_EXTENSION, STAGING_DIR_PREFIX};
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::Digest;

/// Directory that becomes the isolated process's root.
#[derive(Debug)]
pub struct StagingDirectory {
    path: PathBuf,
}

impl StagingDirectory {
    /// Creates a new, uniquely named directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::Io` if the directory cannot be created.
    pub fn create(root: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_DIR_PREFIX)
            .tempdir_in(root)
            .map_err(|e| MiniboxError::Io {
                path: root.to_path_buf(),
                source: e,
            })?;
        let path = dir.keep();
        tracing::info!(path = %path.display(), "created staging directory");
        Ok(Self { path })
    }

    /// Path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::Io` if removal fails.
    pub fn remove(self) -> Result<()> {
        std::fs::remove_dir_all(&self.path).map_err(|e| MiniboxError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::info!(path = %self.path.display(), "removed staging directory");
        Ok(())
    }
}

/// Path of the temporary archive for a layer inside `staging`.
#[must_use]
pub fn archive_path(staging: &Path, digest: &Digest) -> PathBuf {
    staging.join(format!("{}.{LAYER_ARCHIVE_EXTENSION}", digest.file_stem()))
}
