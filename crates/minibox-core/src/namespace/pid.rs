//! PID namespace isolation.
//!
//! Gives the launched command its own process ID space, where it runs as
//! PID 1.

use minibox_common::error::{MiniboxError, Result};

/// Moves the calling process's future children into a new PID namespace.
///
/// The calling process itself stays in its original namespace. The next
/// child it forks becomes PID 1 of the new namespace. No new threads can be
/// created in the caller afterwards, so any helper threads must already be
/// running.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if `unshare(CLONE_NEWPID)` fails,
/// typically for lack of `CAP_SYS_ADMIN`.
#[cfg(target_os = "linux")]
pub fn create_pid_namespace() -> Result<()> {
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWPID).map_err(|e| MiniboxError::Isolation {
        message: format!("PID namespace creation failed: {e}"),
    })?;
    tracing::debug!("PID namespace created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; PID namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_pid_namespace() -> Result<()> {
    Err(MiniboxError::Isolation {
        message: "PID namespaces require Linux".into(),
    })
}
