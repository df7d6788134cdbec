//! Path resolution confined to the staging directory.
//!
//! Images routinely ship directory symlinks such as `bin -> usr/bin` or
//! `lib -> /usr/lib`. Before the root is restricted those links still point
//! at the host, so paths under the staging directory are resolved here one
//! component at a time, with every link target interpreted relative to the
//! staging root.

use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use minibox_common::error::{MiniboxError, Result};

/// Symlinks followed before resolution gives up.
const MAX_SYMLINK_HOPS: usize = 40;

enum Step {
    Parent,
    Name(OsString),
}

/// Resolves directory `relative` under `root`, creating missing components.
///
/// Symlinks are followed as if `root` were `/`: absolute targets restart at
/// `root` and `..` never climbs above it. The returned path contains no
/// symlinks below `root`.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if a component is not a directory, a
/// link cannot be read, resolution loops, or a directory cannot be created.
pub fn resolve_dir_in_root(root: &Path, relative: &Path) -> Result<PathBuf> {
    let fail = |path: &Path, message: String| MiniboxError::Isolation {
        message: format!("resolve {} under {}: {message}", path.display(), root.display()),
    };

    let mut pending = steps(relative);
    pending.reverse();
    let mut current = root.to_path_buf();
    let mut hops = 0;

    while let Some(step) = pending.pop() {
        let name = match step {
            Step::Parent => {
                if current != root {
                    let _ = current.pop();
                }
                continue;
            }
            Step::Name(name) => name,
        };
        let next = current.join(&name);
        match std::fs::symlink_metadata(&next) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                std::fs::create_dir(&next).map_err(|e| fail(&next, format!("mkdir: {e}")))?;
                current = next;
            }
            Err(e) => return Err(fail(&next, e.to_string())),
            Ok(metadata) if metadata.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(fail(&next, "too many levels of symbolic links".into()));
                }
                let target =
                    std::fs::read_link(&next).map_err(|e| fail(&next, format!("readlink: {e}")))?;
                if target.is_absolute() {
                    current = root.to_path_buf();
                }
                tracing::debug!(link = %next.display(), target = %target.display(), "following link inside root");
                let mut expanded = steps(&target);
                expanded.reverse();
                pending.extend(expanded);
            }
            Ok(metadata) if metadata.is_dir() => current = next,
            Ok(_) => return Err(fail(&next, "not a directory".into())),
        }
    }
    Ok(current)
}

fn steps(path: &Path) -> Vec<Step> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(Step::Name(name.to_os_string())),
            Component::ParentDir => Some(Step::Parent),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn missing_directories_are_created() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = resolve_dir_in_root(root.path(), Path::new("usr/local/bin")).expect("resolve");
        assert_eq!(dir, root.path().join("usr/local/bin"));
        assert!(dir.is_dir());
    }

    #[test]
    fn absolute_link_is_taken_relative_to_root() {
        let root = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        symlink(outside.path(), root.path().join("bin")).expect("symlink");

        let dir = resolve_dir_in_root(root.path(), Path::new("bin")).expect("resolve");
        let relative = outside.path().strip_prefix("/").expect("absolute");
        assert_eq!(dir, root.path().join(relative));
        assert!(dir.starts_with(root.path()));
    }

    #[test]
    fn relative_link_cannot_climb_above_root() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(root.path().join("usr")).expect("mkdir");
        symlink("../../../../usr", root.path().join("bin")).expect("symlink");

        let dir = resolve_dir_in_root(root.path(), Path::new("bin")).expect("resolve");
        assert_eq!(dir, root.path().join("usr"));
    }

    #[test]
    fn link_loop_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        symlink("/loop", root.path().join("loop")).expect("symlink");

        let err = resolve_dir_in_root(root.path(), Path::new("loop")).expect_err("loop");
        assert!(matches!(err, MiniboxError::Isolation { .. }));
    }

    #[test]
    fn file_component_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::write(root.path().join("etc"), b"").expect("write");
        assert!(resolve_dir_in_root(root.path(), Path::new("etc/ssl")).is_err());
    }
}
