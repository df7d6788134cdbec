//! Staging of the target executable.
//!
//! The command runs from the same absolute path inside the new root that it
//! has on the host, so it is copied to that path under the staging
//! directory before the root is restricted.

use std::io;
use std::path::{Component, Path, PathBuf};

use minibox_common::error::{MiniboxError, Result};

use super::confine::resolve_dir_in_root;

/// Resolves `command` to an absolute host path.
///
/// A command containing `/` is taken as a path, relative ones against the
/// current directory. Anything else is looked up on `PATH`.
///
/// # Errors
///
/// Returns `MiniboxError::Launch` if the command cannot be found.
pub fn resolve_command(command: &str) -> Result<PathBuf> {
    let not_found = |message: String| MiniboxError::Launch {
        program: command.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, message),
    };

    if command.is_empty() {
        return Err(not_found("empty command".into()));
    }

    let resolved = if command.contains('/') {
        let path = Path::new(command);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| not_found(format!("current directory: {e}")))?
                .join(path)
        }
    } else {
        which::which(command).map_err(|e| not_found(e.to_string()))?
    };

    if !resolved.is_file() {
        return Err(not_found(format!("{} is not a file", resolved.display())));
    }
    let resolved = normalize(&resolved);
    tracing::debug!(command, path = %resolved.display(), "resolved command");
    Ok(resolved)
}

/// Copies the host executable at `source` to the same path under `root`,
/// keeping its permission bits.
///
/// Directory symlinks shipped by the image along the way are followed
/// inside `root` only. An existing entry at the destination (for example a
/// symlink to busybox) is replaced rather than written through.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if the source is not absolute or any
/// filesystem step fails.
pub fn stage_executable(source: &Path, root: &Path) -> Result<PathBuf> {
    let relative = source
        .strip_prefix("/")
        .map_err(|_| MiniboxError::Isolation {
            message: format!("executable path {} is not absolute", source.display()),
        })?;
    let Some(file_name) = relative.file_name() else {
        return Err(MiniboxError::Isolation {
            message: format!("executable path {} has no file name", source.display()),
        });
    };
    let fail = |step: &str, path: &Path, e: io::Error| MiniboxError::Isolation {
        message: format!("{step} {}: {e}", path.display()),
    };

    let parent = resolve_dir_in_root(root, relative.parent().unwrap_or_else(|| Path::new("")))?;
    let dest = parent.join(file_name);
    if let Ok(existing) = std::fs::symlink_metadata(&dest) {
        if existing.is_dir() {
            return Err(MiniboxError::Isolation {
                message: format!("{} is a directory in the image", dest.display()),
            });
        }
        std::fs::remove_file(&dest).map_err(|e| fail("replace", &dest, e))?;
    }

    let permissions = std::fs::metadata(source)
        .map_err(|e| fail("stat", source, e))?
        .permissions();
    let _ = std::fs::copy(source, &dest).map_err(|e| fail("copy", source, e))?;
    std::fs::set_permissions(&dest, permissions).map_err(|e| fail("chmod", &dest, e))?;

    tracing::info!(source = %source.display(), dest = %dest.display(), "staged executable");
    Ok(dest)
}

/// Drops `.` and folds `..` lexically without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_executable(path: &Path, mode: u32) {
        std::fs::write(path, b"#!/bin/sh\necho staged\n").expect("write");
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).expect("chmod");
    }

    #[test]
    fn stage_executable_mirrors_path_and_mode() {
        let host = tempfile::tempdir().expect("tempdir");
        let root = tempfile::tempdir().expect("tempdir");
        let source = host.path().join("tool");
        write_executable(&source, 0o750);

        let dest = stage_executable(&source, root.path()).expect("stage");
        let relative = source.strip_prefix("/").expect("absolute");
        assert_eq!(dest, root.path().join(relative));
        let mode = std::fs::metadata(&dest).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn stage_executable_replaces_symlink_instead_of_following_it() {
        let host = tempfile::tempdir().expect("tempdir");
        let root = tempfile::tempdir().expect("tempdir");
        let source = host.path().join("sh");
        write_executable(&source, 0o755);

        let relative = source.strip_prefix("/").expect("absolute");
        let dest = root.path().join(relative);
        std::fs::create_dir_all(dest.parent().expect("parent")).expect("mkdir");
        let busybox = dest.with_file_name("busybox");
        std::fs::write(&busybox, b"busybox").expect("write");
        std::os::unix::fs::symlink(&busybox, &dest).expect("symlink");

        let _ = stage_executable(&source, root.path()).expect("stage");
        assert!(!std::fs::symlink_metadata(&dest).expect("stat").file_type().is_symlink());
        assert_eq!(std::fs::read(&busybox).expect("read"), b"busybox");
    }

    #[test]
    fn stage_executable_keeps_absolute_directory_link_inside_root() {
        let host = tempfile::tempdir().expect("tempdir");
        let root = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        let source = host.path().join("tool");
        write_executable(&source, 0o755);

        // The image links the executable's directory to an absolute path.
        let relative = host.path().strip_prefix("/").expect("absolute");
        let link = root.path().join(relative);
        std::fs::create_dir_all(link.parent().expect("parent")).expect("mkdir");
        std::os::unix::fs::symlink(outside.path(), &link).expect("symlink");

        let dest = stage_executable(&source, root.path()).expect("stage");
        assert!(dest.starts_with(root.path()), "dest: {}", dest.display());
        assert!(dest.is_file());
        assert!(!outside.path().join("tool").exists());
        // Inside the new root the program path leads to the same file.
        let inside = outside.path().strip_prefix("/").expect("absolute");
        assert_eq!(dest, root.path().join(inside).join("tool"));
    }

    #[test]
    fn stage_executable_rejects_relative_source() {
        let root = tempfile::tempdir().expect("tempdir");
        assert!(stage_executable(Path::new("bin/sh"), root.path()).is_err());
    }

    #[test]
    fn resolve_command_finds_sh_on_path() {
        let path = resolve_command("sh").expect("resolve");
        assert!(path.is_absolute());
        assert!(path.ends_with("sh"));
    }

    #[test]
    fn resolve_command_reports_missing_program() {
        let err = resolve_command("definitely-not-a-real-program-xyz").expect_err("missing");
        assert!(matches!(err, MiniboxError::Launch { .. }));
    }

    #[test]
    fn normalize_folds_dot_components() {
        assert_eq!(normalize(Path::new("/usr/./bin/../lib")), PathBuf::from("/usr/lib"));
    }
}
