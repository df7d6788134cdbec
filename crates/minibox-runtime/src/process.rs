//! Launching the target command.
//!
//! The child inherits stdin, stdout, and stderr. The parent blocks until it
//! exits and turns its status into the exit code to mirror.

use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use minibox_common::constants::SIGNAL_EXIT_OFFSET;
use minibox_common::error::{MiniboxError, Result};

/// Command to launch inside the restricted root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Absolute path of the executable as seen from the new root.
    pub program: PathBuf,
    /// Arguments after the program name.
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Creates a spec for `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Isolation applied when launching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Start the child in a fresh PID namespace.
    pub new_pid_namespace: bool,
    /// Ignore Ctrl+C in the parent while the child runs.
    pub forward_interrupts: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            new_pid_namespace: true,
            forward_interrupts: true,
        }
    }
}

/// Runs the command to completion.
///
/// # Errors
///
/// Returns `MiniboxError::Isolation` if the PID namespace cannot be
/// created, `MiniboxError::Launch` if the process cannot be spawned or
/// waited on, and `MiniboxError::ChildExit` if it exits unsuccessfully.
pub fn launch(spec: &ProcessSpec, options: LaunchOptions) -> Result<()> {
    // Threads cannot be spawned once the PID namespace is unshared, so the
    // interrupt handler thread has to exist first.
    if options.forward_interrupts {
        ignore_interrupts();
    }
    if options.new_pid_namespace {
        minibox_core::namespace::pid::create_pid_namespace()?;
    }

    let program = spec.program.display().to_string();
    let launch_error = |source: std::io::Error| MiniboxError::Launch {
        program: program.clone(),
        source,
    };

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(launch_error)?;
    tracing::info!(program = %program, pid = child.id(), "process started");

    let status = child.wait().map_err(launch_error)?;
    let code = exit_code(status);
    tracing::info!(program = %program, code, "process exited");

    if code == 0 {
        Ok(())
    } else {
        Err(MiniboxError::ChildExit { code })
    }
}

/// Maps a wait status to the exit code to mirror.
///
/// A child killed by a signal reports `128 + signal`.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SIGNAL_EXIT_OFFSET + signal;
        }
    }
    minibox_common::constants::PIPELINE_FAILURE_EXIT_CODE
}

/// Keeps the parent alive on Ctrl+C so the child's status is still
/// mirrored. The child shares the terminal and receives the signal itself.
fn ignore_interrupts() {
    if let Err(e) = ctrlc::set_handler(|| tracing::debug!("interrupt passed to child")) {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }
}
