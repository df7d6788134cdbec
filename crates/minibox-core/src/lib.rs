//! # minibox-core
//!
//! Low-level Linux isolation primitives for the minibox runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: a fresh PID namespace for the launched command.
//! - **Filesystem**: `chroot(2)` into the staging directory, a minimal
//!   `/dev/null`, and staging of the target executable.
//!
//! Everything here goes through `nix`; there is no `unsafe` code.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod namespace;
