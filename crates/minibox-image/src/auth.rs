//! Anonymous bearer-token exchange with the registry's token service.

use std::fmt;

use minibox_common::constants::REGISTRY_SERVICE;
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::ImageReference;
use serde::Deserialize;

use crate::transport::{Request, Transport, fetch_json};

/// Bearer token valid for one pull.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: Option<String>,
}

/// Builds the token endpoint URL for a pull-scoped token.
#[must_use]
pub fn token_url(auth_url: &str, reference: &ImageReference) -> String {
    format!(
        "{}/token?service={REGISTRY_SERVICE}&scope=repository:{}:pull",
        auth_url.trim_end_matches('/'),
        reference.repository()
    )
}

/// Exchanges the repository name for an anonymous pull token.
///
/// # Errors
///
/// Any transport failure, and an empty token, are reported as
/// `MiniboxError::Auth`.
pub fn authorize(
    transport: &dyn Transport,
    auth_url: &str,
    reference: &ImageReference,
) -> Result<AuthToken> {
    let wrap = |source: MiniboxError| MiniboxError::Auth {
        repository: reference.name().to_string(),
        source: Box::new(source),
    };

    let url = token_url(auth_url, reference);
    let response: TokenResponse = fetch_json(transport, &Request::get(url.clone())).map_err(wrap)?;

    let token = if response.token.is_empty() {
        response.access_token.unwrap_or_default()
    } else {
        response.token
    };
    if token.is_empty() {
        return Err(wrap(MiniboxError::Transport {
            url,
            message: "token response carried no token".into(),
        }));
    }

    tracing::info!(repository = %reference.repository(), "authorized");
    Ok(AuthToken(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    const AUTH: &str = "https://auth.test";

    fn alpine() -> ImageReference {
        ImageReference::parse("alpine").expect("reference")
    }

    #[test]
    fn token_url_uses_library_scope() {
        assert_eq!(
            token_url("https://auth.test/", &alpine()),
            "https://auth.test/token?service=registry.docker.io&scope=repository:library/alpine:pull"
        );
    }

    #[test]
    fn authorize_returns_token() {
        let transport =
            MemoryTransport::new().with_body(token_url(AUTH, &alpine()), r#"{"token":"abc"}"#);
        let token = authorize(&transport, AUTH, &alpine()).expect("authorize");
        assert_eq!(token.as_str(), "abc");
        assert_eq!(token.bearer(), "Bearer abc");
    }

    #[test]
    fn authorize_falls_back_to_access_token() {
        let transport = MemoryTransport::new()
            .with_body(token_url(AUTH, &alpine()), r#"{"access_token":"xyz"}"#);
        let token = authorize(&transport, AUTH, &alpine()).expect("authorize");
        assert_eq!(token.as_str(), "xyz");
    }

    #[test]
    fn authorize_wraps_status_failure() {
        let transport = MemoryTransport::new().with_status(token_url(AUTH, &alpine()), 500);
        let err = authorize(&transport, AUTH, &alpine()).expect_err("should fail");
        match err {
            MiniboxError::Auth { repository, source } => {
                assert_eq!(repository, "alpine");
                assert!(matches!(*source, MiniboxError::Registry { status: 500, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn authorize_rejects_empty_token() {
        let transport = MemoryTransport::new().with_body(token_url(AUTH, &alpine()), "{}");
        let err = authorize(&transport, AUTH, &alpine()).expect_err("should fail");
        assert!(matches!(err, MiniboxError::Auth { .. }));
    }

    #[test]
    fn token_debug_is_redacted() {
        assert!(!format!("{:?}", AuthToken::new("secret")).contains("secret"));
    }
}
