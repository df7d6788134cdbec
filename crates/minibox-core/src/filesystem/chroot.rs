//! Root restriction via `chroot(2)`.
//!
//! Irreversible for the calling process. Requires `CAP_SYS_CHROOT`.

use std::path::Path;

use minibox_common::error::{MiniboxError, Result};

/// Restricts the process root to `new_root` and moves to `/` inside it.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if `chroot(2)` or the following
/// `chdir("/")` fails.
#[cfg(unix)]
pub fn restrict_root(new_root: &Path) -> Result<()> {
    nix::unistd::chroot(new_root).map_err(|e| MiniboxError::Isolation {
        message: format!("chroot to {} failed: {e}", new_root.display()),
    })?;
    nix::unistd::chdir("/").map_err(|e| MiniboxError::Isolation {
        message: format!("chdir to new root failed: {e}"),
    })?;
    tracing::info!(root = %new_root.display(), "root restricted");
    Ok(())
}

/// Stub for non-Unix platforms.
///
/// # Errors
///
/// Always returns an error; root restriction requires Unix.
#[cfg(not(unix))]
pub fn restrict_root(_new_root: &Path) -> Result<()> {
    Err(MiniboxError::Isolation {
        message: "chroot requires a Unix host".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restrict_root_on_missing_directory_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = restrict_root(&dir.path().join("missing")).expect_err("should fail");
        assert!(matches!(err, MiniboxError::Isolation { .. }));
    }
}
