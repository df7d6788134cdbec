//! `minibox run`: pull an image and run a command inside it.

use anyhow::Context;
use clap::Args;
use minibox_common::config::MiniboxConfig;
use minibox_common::types::ImageReference;
use minibox_runtime::engine::{Engine, RunRequest};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image reference, `name[:tag]` on Docker Hub.
    pub image: String,

    /// Command to run; a bare name is looked up on the host `PATH`.
    pub command: String,

    /// Arguments passed to the command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the reference is invalid, any pipeline stage fails,
/// or the command exits unsuccessfully.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let image: ImageReference = args
        .image
        .parse()
        .with_context(|| format!("invalid image reference {:?}", args.image))?;
    let engine = Engine::new(MiniboxConfig::default()).context("failed to initialize engine")?;

    tracing::info!(image = %image, command = %args.command, "run");
    let request = RunRequest {
        image,
        command: args.command,
        args: args.args,
    };
    engine.run(&request)?;
    Ok(())
}
