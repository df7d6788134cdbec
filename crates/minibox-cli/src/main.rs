//! # minibox: pull an image and run a command inside it
//!
//! Logs go to stderr so the child's stdout reaches the caller untouched.
//! The process exits with the child's exit code, or 1 if the pipeline fails.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod commands;

use std::process::ExitCode;

use clap::Parser;
use minibox_common::constants::PIPELINE_FAILURE_EXIT_CODE;
use minibox_common::error::MiniboxError;

use crate::commands::Cli;

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match commands::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit_with(&err),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

#[allow(clippy::print_stderr)]
fn exit_with(err: &anyhow::Error) -> ExitCode {
    if let Some(MiniboxError::ChildExit { code }) = err.downcast_ref::<MiniboxError>() {
        return exit_code(*code);
    }
    eprintln!("Error: {err:#}");
    exit_code(PIPELINE_FAILURE_EXIT_CODE)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}
