//! Minimal device nodes inside the staging directory.

use std::path::Path;

use minibox_common::constants::DEV_NULL_PATH;
use minibox_common::error::{MiniboxError, Result};

use super::confine::resolve_dir_in_root;

/// How `/dev/null` was provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullDevice {
    /// The image already had an entry at `dev/null`.
    Existing,
    /// A character device (1, 3) was created.
    CharDevice,
    /// `mknod` was not permitted; an empty regular file stands in.
    Placeholder,
}

/// Ensures `dev/null` exists under `root`.
///
/// An entry already present from the image is left alone. Otherwise a real
/// null device is created, falling back to an empty file when `mknod(2)` is
/// not permitted.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if neither the device nor the
/// placeholder can be created.
pub fn prepare_dev_null(root: &Path) -> Result<NullDevice> {
    let relative = Path::new(DEV_NULL_PATH);
    let dev = resolve_dir_in_root(root, relative.parent().unwrap_or_else(|| Path::new("")))?;
    let path = dev.join(relative.file_name().unwrap_or(relative.as_os_str()));
    if std::fs::symlink_metadata(&path).is_ok() {
        tracing::debug!(path = %path.display(), "keeping existing /dev/null");
        return Ok(NullDevice::Existing);
    }

    match make_null_device(&path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "created null device");
            Ok(NullDevice::CharDevice)
        }
        Err(reason) => {
            tracing::warn!(path = %path.display(), %reason, "mknod failed, creating placeholder");
            let _ = std::fs::File::create(&path).map_err(|e| isolation(&path, &e))?;
            Ok(NullDevice::Placeholder)
        }
    }
}

#[cfg(target_os = "linux")]
fn make_null_device(path: &Path) -> std::result::Result<(), String> {
    use nix::sys::stat::{Mode, SFlag, makedev, mknod};

    let mode = Mode::from_bits_truncate(0o666);
    mknod(path, SFlag::S_IFCHR, mode, makedev(1, 3)).map_err(|e| e.to_string())
}

#[cfg(not(target_os = "linux"))]
fn make_null_device(_path: &Path) -> std::result::Result<(), String> {
    Err("device nodes are only created on Linux".into())
}

fn isolation(path: &Path, e: &std::io::Error) -> MiniboxError {
    MiniboxError::Isolation {
        message: format!("prepare {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_dev_null_creates_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kind = prepare_dev_null(dir.path()).expect("prepare");
        assert!(matches!(kind, NullDevice::CharDevice | NullDevice::Placeholder));
        assert!(std::fs::symlink_metadata(dir.path().join("dev/null")).is_ok());
    }

    #[test]
    fn prepare_dev_null_follows_dev_link_inside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("devices")).expect("mkdir");
        std::os::unix::fs::symlink("/devices", dir.path().join("dev")).expect("symlink");

        let kind = prepare_dev_null(dir.path()).expect("prepare");
        assert_ne!(kind, NullDevice::Existing);
        assert!(std::fs::symlink_metadata(dir.path().join("devices/null")).is_ok());
    }

    #[test]
    fn prepare_dev_null_keeps_existing_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("dev")).expect("mkdir");
        std::fs::write(dir.path().join("dev/null"), b"").expect("write");
        assert_eq!(prepare_dev_null(dir.path()).expect("prepare"), NullDevice::Existing);
    }
}
