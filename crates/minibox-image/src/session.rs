//! Immutable per-run pull session.
//!
//! A [`PullSession`] can only be built from an [`AuthToken`], so no manifest
//! or blob request can be formed before authorization has happened.

use std::path::{Path, PathBuf};

use minibox_common::types::{Digest, ImageReference};

use crate::auth::AuthToken;
use crate::transport::Request;

/// Everything the manifest, download, and extraction stages read.
#[derive(Debug, Clone)]
pub struct PullSession {
    reference: ImageReference,
    token: AuthToken,
    registry_url: String,
    staging: PathBuf,
}

impl PullSession {
    /// Creates a session for one authorized pull.
    #[must_use]
    pub fn new(
        reference: ImageReference,
        token: AuthToken,
        registry_url: impl Into<String>,
        staging: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reference,
            token,
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            staging: staging.into(),
        }
    }

    /// Image being pulled.
    #[must_use]
    pub const fn reference(&self) -> &ImageReference {
        &self.reference
    }

    /// Directory layers are extracted into.
    #[must_use]
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Manifest URL for a tag or digest.
    #[must_use]
    pub fn manifest_url(&self, tag_or_digest: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{tag_or_digest}",
            self.registry_url,
            self.reference.repository()
        )
    }

    /// Blob URL for a layer digest.
    #[must_use]
    pub fn blob_url(&self, digest: &Digest) -> String {
        format!(
            "{}/v2/{}/blobs/{digest}",
            self.registry_url,
            self.reference.repository()
        )
    }

    /// GET request for `url` carrying the bearer token.
    #[must_use]
    pub fn authorized(&self, url: String) -> Request {
        Request::get(url).header("Authorization", self.token.bearer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> PullSession {
        PullSession::new(
            ImageReference::parse("alpine:3.20").expect("reference"),
            AuthToken::new("tok"),
            "https://registry.test/",
            "/tmp/staging",
        )
    }

    #[test]
    fn manifest_url_includes_repository_and_tag() {
        assert_eq!(
            session().manifest_url("3.20"),
            "https://registry.test/v2/library/alpine/manifests/3.20"
        );
    }

    #[test]
    fn blob_url_includes_digest() {
        let digest = Digest::parse("sha256:abc").expect("digest");
        assert_eq!(
            session().blob_url(&digest),
            "https://registry.test/v2/library/alpine/blobs/sha256:abc"
        );
    }

    #[test]
    fn authorized_request_carries_bearer() {
        let request = session().authorized("https://registry.test/x".into());
        assert_eq!(request.header_value("Authorization"), Some("Bearer tok"));
    }
}
