//! Domain primitive types used across the minibox workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MiniboxError, Result};

/// A parsed `name[:tag]` reference to an official image.
///
/// Only the single hardcoded registry is supported, so the reference never
/// carries a host. A leading `library/` is accepted and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    name: String,
    tag: String,
}

impl ImageReference {
    /// Parses `name` or `name:tag`. The tag defaults to `latest`.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::InvalidReference` for empty names or tags,
    /// digest references, references to other registries or namespaces, and
    /// characters outside the allowed sets.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| MiniboxError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if trimmed.contains('@') {
            return Err(invalid("digest references are not supported"));
        }

        let last_slash = trimmed.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match trimmed[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&trimmed[..split], &trimmed[split + 1..])
            }
            None => (trimmed, crate::constants::DEFAULT_TAG),
        };

        let name = name
            .strip_prefix(crate::constants::LIBRARY_NAMESPACE)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(name);

        if name.contains('/') {
            return Err(invalid("only official library images are supported"));
        }
        if !is_valid_name(name) {
            return Err(invalid("repository name must match [a-z0-9][a-z0-9._-]*"));
        }
        if !is_valid_tag(tag) {
            return Err(invalid("tag must match [A-Za-z0-9_][A-Za-z0-9_.-]{0,127}"));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Repository name without the `library/` namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag to resolve.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Repository path as used in registry URLs (`library/<name>`).
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}", crate::constants::LIBRARY_NAMESPACE, self.name)
    }
}

impl FromStr for ImageReference {
    type Err = MiniboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    tag.len() <= 128
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Content digest in `<algorithm>:<encoded>` form.
///
/// Digests arrive from the registry and end up in file names, so they are
/// validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    value: String,
    split: usize,
}

impl Digest {
    /// Parses a digest string.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::InvalidDigest` if the string is not
    /// `<algorithm>:<encoded>` with an alphanumeric algorithm and an
    /// encoded part drawn from `[A-Za-z0-9=_-]`.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let Some(split) = value.find(':') else {
            return Err(MiniboxError::InvalidDigest { digest: value });
        };
        let (algorithm, encoded) = (&value[..split], &value[split + 1..]);
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'));
        let encoded_ok = !encoded.is_empty()
            && encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'));
        if !algorithm_ok || !encoded_ok {
            return Err(MiniboxError::InvalidDigest { digest: value });
        }
        Ok(Self { value, split })
    }

    /// Full digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Hash algorithm, e.g. `sha256`.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.value[..self.split]
    }

    /// Encoded hash value.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.value[self.split + 1..]
    }

    /// File-name-safe form, `<algorithm>_<encoded>`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.algorithm(), self.encoded())
    }
}

impl TryFrom<String> for Digest {
    type Error = MiniboxError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.value
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Operating system and architecture pair, named as the registry names them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    #[serde(default)]
    pub os: String,
    /// CPU architecture, e.g. `amd64`.
    #[serde(default)]
    pub architecture: String,
    /// Architecture variant, e.g. `v8`. Not used for matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Creates a platform from OS and architecture names.
    #[must_use]
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Returns the platform this binary is running on.
    #[must_use]
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, registry_arch(std::env::consts::ARCH))
    }

    /// Exact string match on OS and architecture.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.os == other.os && self.architecture == other.architecture
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Maps a Rust target architecture name to the registry's naming.
#[must_use]
pub fn registry_arch(rust_arch: &str) -> &str {
    match rust_arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Stage of a single pull-and-run invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    /// No token yet.
    Unauthenticated,
    /// Bearer token obtained.
    Authenticated,
    /// Layer list resolved for the target platform.
    ManifestResolved,
    /// Layer blobs are being fetched.
    LayersDownloading,
    /// All layers extracted into the staging directory.
    LayersReady,
    /// Process root restricted to the staging directory.
    RootRestricted,
    /// Target command is running.
    ProcessRunning,
    /// Command finished.
    Done,
    /// A stage failed. Terminal.
    Failed,
}

impl RunPhase {
    /// Returns whether moving from `self` to `next` is allowed.
    ///
    /// Phases only move forward one step at a time; any non-terminal phase
    /// may move to `Failed`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unauthenticated, Self::Authenticated)
                | (Self::Authenticated, Self::ManifestResolved)
                | (Self::ManifestResolved, Self::LayersDownloading)
                | (Self::LayersDownloading, Self::LayersReady)
                | (Self::LayersReady, Self::RootRestricted)
                | (Self::RootRestricted, Self::ProcessRunning)
                | (Self::ProcessRunning, Self::Done)
        ) || (!self.is_terminal() && matches!(next, Self::Failed))
    }

    /// `Done` and `Failed` are terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::ManifestResolved => "manifest-resolved",
            Self::LayersDownloading => "layers-downloading",
            Self::LayersReady => "layers-ready",
            Self::RootRestricted => "root-restricted",
            Self::ProcessRunning => "process-running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_without_tag_defaults_to_latest() {
        let r = ImageReference::parse("busybox").expect("parse");
        assert_eq!(r.name(), "busybox");
        assert_eq!(r.tag(), "latest");
    }

    #[test]
    fn reference_with_tag_keeps_tag() {
        let r = ImageReference::parse("alpine:3.20").expect("parse");
        assert_eq!(r.name(), "alpine");
        assert_eq!(r.tag(), "3.20");
        assert_eq!(r.to_string(), "alpine:3.20");
    }

    #[test]
    fn reference_strips_library_namespace() {
        let r: ImageReference = "library/ubuntu:22.04".parse().expect("parse");
        assert_eq!(r.name(), "ubuntu");
        assert_eq!(r.repository(), "library/ubuntu");
    }

    #[test]
    fn reference_rejects_other_registries_and_namespaces() {
        assert!(ImageReference::parse("ghcr.io/owner/app:1").is_err());
        assert!(ImageReference::parse("localhost:5000/app").is_err());
        assert!(ImageReference::parse("someuser/app").is_err());
    }

    #[test]
    fn reference_rejects_malformed_input() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("alpine:").is_err());
        assert!(ImageReference::parse(":latest").is_err());
        assert!(ImageReference::parse("Alpine").is_err());
        assert!(ImageReference::parse("alpine@sha256:abcd").is_err());
    }

    #[test]
    fn digest_parses_parts() {
        let d = Digest::parse("sha256:0a1b2c").expect("parse");
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.encoded(), "0a1b2c");
        assert_eq!(d.file_stem(), "sha256_0a1b2c");
    }

    #[test]
    fn digest_rejects_path_components() {
        assert!(Digest::parse("sha256:../../etc/passwd").is_err());
        assert!(Digest::parse("no-separator").is_err());
        assert!(Digest::parse("sha256:").is_err());
    }

    #[test]
    fn digest_deserializes_from_json_string() {
        let d: Digest = serde_json::from_str("\"sha256:ff00\"").expect("decode");
        assert_eq!(d.as_str(), "sha256:ff00");
        assert!(serde_json::from_str::<Digest>("\"bogus\"").is_err());
    }

    #[test]
    fn registry_arch_maps_rust_names() {
        assert_eq!(registry_arch("x86_64"), "amd64");
        assert_eq!(registry_arch("aarch64"), "arm64");
        assert_eq!(registry_arch("s390x"), "s390x");
    }

    #[test]
    fn platform_matching_ignores_variant() {
        let mut listed = Platform::new("linux", "arm64");
        listed.variant = Some("v8".into());
        assert!(listed.matches(&Platform::new("linux", "arm64")));
        assert!(!listed.matches(&Platform::new("linux", "amd64")));
    }

    #[test]
    fn run_phase_moves_forward_only() {
        assert!(RunPhase::Unauthenticated.can_advance_to(RunPhase::Authenticated));
        assert!(!RunPhase::Unauthenticated.can_advance_to(RunPhase::ManifestResolved));
        assert!(!RunPhase::LayersReady.can_advance_to(RunPhase::LayersDownloading));
        assert!(RunPhase::LayersDownloading.can_advance_to(RunPhase::Failed));
        assert!(!RunPhase::Done.can_advance_to(RunPhase::Failed));
    }
}
