//! Configuration model for a single pull-and-run invocation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the pull pipeline.
///
/// The binary always uses [`MiniboxConfig::default`]; the fields exist so
/// that tests and embedders can point the pipeline somewhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniboxConfig {
    /// Base URL of the token service.
    pub auth_url: String,
    /// Base URL of the registry serving manifests and blobs.
    pub registry_url: String,
    /// Directory under which the per-run staging directory is created.
    pub staging_root: PathBuf,
    /// Per-request timeout. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Remove the staging directory when the pull fails.
    pub cleanup_on_failure: bool,
}

impl Default for MiniboxConfig {
    fn default() -> Self {
        Self {
            auth_url: crate::constants::DEFAULT_AUTH_URL.to_string(),
            registry_url: crate::constants::DEFAULT_REGISTRY_URL.to_string(),
            staging_root: std::env::temp_dir(),
            request_timeout: None,
            cleanup_on_failure: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_public_registry() {
        let config = MiniboxConfig::default();
        assert_eq!(config.auth_url, "https://auth.docker.io");
        assert_eq!(config.registry_url, "https://registry.hub.docker.com");
        assert!(config.request_timeout.is_none());
        assert!(config.cleanup_on_failure);
    }

    #[test]
    fn config_survives_json_roundtrip() {
        let config = MiniboxConfig {
            request_timeout: Some(Duration::from_secs(5)),
            ..MiniboxConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let back: MiniboxConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }
}
