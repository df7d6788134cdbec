//! Pull-and-run orchestration for the minibox runtime.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod engine;
pub mod process;
