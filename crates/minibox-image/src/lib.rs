//! # minibox-image
//!
//! Image acquisition for the minibox runtime.
//!
//! Handles:
//! - **Transport**: one generic GET-and-decode primitive over a pluggable
//!   [`Transport`](transport::Transport).
//! - **Auth**: anonymous bearer-token exchange.
//! - **Manifests**: tag to platform-specific layer list, including
//!   multi-platform manifest lists.
//! - **Download**: concurrent blob fetches with first-error cancellation.
//! - **Layers**: ordered extraction into the staging directory.
//! - **Staging**: the per-run directory that becomes the container root.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod auth;
pub mod download;
pub mod layer;
pub mod manifest;
pub mod pull;
pub mod session;
pub mod staging;
pub mod transport;
