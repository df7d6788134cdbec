//! Isolation bootstrap: turn a populated staging directory into the
//! process root.
//!
//! [`prepare_root`] only writes into the staging directory and can be
//! undone by deleting it. [`enter_root`] is the point of no return.

use std::path::{Path, PathBuf};

use minibox_common::error::Result;
use minibox_core::filesystem::devices::{NullDevice, prepare_dev_null};
use minibox_core::filesystem::executable::stage_executable;

/// Staging directory ready to become the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRoot {
    /// Staging directory.
    pub root: PathBuf,
    /// Path of the executable inside the new root.
    pub program: PathBuf,
    /// How `/dev/null` was provided.
    pub null_device: NullDevice,
}

/// Copies the host executable into `root` and provides `/dev/null`.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if either step fails.
pub fn prepare_root(root: &Path, executable: &Path) -> Result<PreparedRoot> {
    let _ = stage_executable(executable, root)?;
    let null_device = prepare_dev_null(root)?;
    Ok(PreparedRoot {
        root: root.to_path_buf(),
        program: executable.to_path_buf(),
        null_device,
    })
}

/// Restricts the process root to the prepared directory.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if `chroot(2)` fails.
pub fn enter_root(prepared: &PreparedRoot) -> Result<()> {
    minibox_core::filesystem::chroot::restrict_root(&prepared.root)
}
