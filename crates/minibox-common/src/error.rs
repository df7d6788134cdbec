//! Unified error type for the minibox workspace.
//!
//! Every stage of the pull-and-run pipeline reports failures through
//! [`MiniboxError`]. Nothing in the pipeline recovers locally; an error is
//! returned upward unchanged in kind and aborts the run.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum MiniboxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The image reference could not be parsed.
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference {
        /// Reference as given by the caller.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A digest returned by the registry is malformed.
    #[error("invalid digest {digest:?}")]
    InvalidDigest {
        /// Digest string as received.
        digest: String,
    },

    /// The request could not be built, sent, or its body decoded.
    #[error("transport error for {url}: {message}")]
    Transport {
        /// URL of the failed request.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// The token exchange failed.
    #[error("authorization for repository {repository} failed: {source}")]
    Auth {
        /// Repository the token was requested for.
        repository: String,
        /// Underlying failure.
        source: Box<MiniboxError>,
    },

    /// The registry answered with a non-success status.
    #[error("registry returned HTTP {status} for {url}")]
    Registry {
        /// URL of the failed request.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// No manifest list entry matches the target platform.
    #[error("no manifest found for {os}/{arch}")]
    UnsupportedPlatform {
        /// Operating system that was looked up.
        os: String,
        /// Architecture that was looked up.
        arch: String,
    },

    /// A resolved manifest lists no layers.
    #[error("no layers found in manifest for {reference}")]
    EmptyManifest {
        /// Image reference or digest whose manifest was empty.
        reference: String,
    },

    /// A layer archive could not be written, unpacked, or removed.
    #[error("layer {digest}: {message}")]
    Layer {
        /// Digest of the failing layer.
        digest: String,
        /// Description of the failure.
        message: String,
    },

    /// Preparing or entering the restricted root failed.
    #[error("isolation failed: {message}")]
    Isolation {
        /// Description of the failed operation.
        message: String,
    },

    /// The target command could not be started.
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Program that was executed.
        program: String,
        /// Underlying spawn or wait error.
        source: std::io::Error,
    },

    /// The child ran but exited unsuccessfully. Its code is mirrored.
    #[error("command exited with status {code}")]
    ChildExit {
        /// Exit code to mirror.
        code: i32,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl MiniboxError {
    /// Returns the process exit code this error should produce.
    ///
    /// A nonzero child exit is mirrored; everything else is a pipeline
    /// failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ChildExit { code } => *code,
            _ => crate::constants::PIPELINE_FAILURE_EXIT_CODE,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MiniboxError>;
