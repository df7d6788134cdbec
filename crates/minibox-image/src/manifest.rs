//! Manifest resolution: tag to platform-specific layer list.
//!
//! The registry answers a manifest request with either a manifest list
//! (one entry per platform) or a single image manifest. Both decode into
//! [`ManifestResponse`]; which fields are populated tells them apart.

use minibox_common::constants::{MANIFEST_LIST_MEDIA_TYPE, MANIFEST_V2_MEDIA_TYPE};
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{Digest, Platform};
use serde::{Deserialize, Serialize};

use crate::session::PullSession;
use crate::transport::{Transport, fetch_json};

/// One platform entry of a manifest list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDescriptor {
    /// Platform this manifest is built for.
    #[serde(default)]
    pub platform: Platform,
    /// Digest of the platform manifest.
    pub digest: Digest,
    /// Media type of the platform manifest.
    #[serde(default)]
    pub media_type: String,
}

/// One filesystem layer blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    /// Media type of the blob.
    #[serde(default)]
    pub media_type: String,
    /// Blob size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Content digest.
    pub digest: Digest,
}

/// Shared decode shape for manifest lists and image manifests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResponse {
    /// Schema version, when present.
    #[serde(default)]
    pub schema_version: Option<u32>,
    /// Media type of the document, when present.
    #[serde(default)]
    pub media_type: Option<String>,
    /// Platform entries. Non-empty for a manifest list.
    #[serde(default)]
    pub manifests: Vec<ManifestDescriptor>,
    /// Layers. Non-empty for an image manifest.
    #[serde(default)]
    pub layers: Vec<LayerDescriptor>,
}

/// Picks the list entry for `target`.
///
/// Entries match on exact OS and architecture. If more than one matches,
/// the first wins and a warning is logged.
///
/// # Errors
///
/// Returns `MiniboxError::UnsupportedPlatform` if no entry matches.
pub fn select_manifest<'a>(
    manifests: &'a [ManifestDescriptor],
    target: &Platform,
) -> Result<&'a ManifestDescriptor> {
    let mut matching = manifests.iter().filter(|m| m.platform.matches(target));
    let Some(selected) = matching.next() else {
        return Err(MiniboxError::UnsupportedPlatform {
            os: target.os.clone(),
            arch: target.architecture.clone(),
        });
    };
    let extra = matching.count();
    if extra > 0 {
        tracing::warn!(
            platform = %target,
            candidates = extra + 1,
            digest = %selected.digest,
            "multiple manifests match platform, using the first"
        );
    }
    Ok(selected)
}

/// Resolves the session's tag to the layer list for `target`.
///
/// # Errors
///
/// Returns `MiniboxError::Registry` on a bad status,
/// `MiniboxError::UnsupportedPlatform` if a manifest list has no entry for
/// `target`, and `MiniboxError::EmptyManifest` if the final manifest has no
/// layers.
pub fn resolve_layers(
    transport: &dyn Transport,
    session: &PullSession,
    target: &Platform,
) -> Result<Vec<LayerDescriptor>> {
    let reference = session.reference();
    let request = session
        .authorized(session.manifest_url(reference.tag()))
        .header("Accept", MANIFEST_V2_MEDIA_TYPE);
    let response: ManifestResponse = fetch_json(transport, &request)?;

    if response.manifests.is_empty() {
        tracing::debug!(reference = %reference, "direct image manifest");
        return non_empty(response.layers, &reference.to_string());
    }

    tracing::debug!(
        reference = %reference,
        media_type = response.media_type.as_deref().unwrap_or(MANIFEST_LIST_MEDIA_TYPE),
        entries = response.manifests.len(),
        "manifest list"
    );
    let selected = select_manifest(&response.manifests, target)?;
    let accept = if selected.media_type.is_empty() {
        MANIFEST_V2_MEDIA_TYPE
    } else {
        selected.media_type.as_str()
    };
    let request = session
        .authorized(session.manifest_url(selected.digest.as_str()))
        .header("Accept", accept);
    let platform_manifest: ManifestResponse = fetch_json(transport, &request)?;

    tracing::info!(
        reference = %reference,
        platform = %target,
        digest = %selected.digest,
        layers = platform_manifest.layers.len(),
        "resolved platform manifest"
    );
    non_empty(platform_manifest.layers, selected.digest.as_str())
}

fn non_empty(layers: Vec<LayerDescriptor>, reference: &str) -> Result<Vec<LayerDescriptor>> {
    if layers.is_empty() {
        return Err(MiniboxError::EmptyManifest {
            reference: reference.to_string(),
        });
    }
    Ok(layers)
}
