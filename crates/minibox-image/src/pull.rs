//! High-level pull orchestrator.
//!
//! Runs the stages in order: authorize, resolve, download, extract. Each
//! stage is also exposed on its own so the runtime engine can track the
//! run's phase between them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use minibox_common::config::MiniboxConfig;
use minibox_common::error::Result;
use minibox_common::types::{ImageReference, Platform};

use crate::download::{DownloadedLayer, download_layers};
use crate::layer::{ExtractedLayer, apply_layers};
use crate::manifest::{LayerDescriptor, resolve_layers};
use crate::session::PullSession;
use crate::transport::{HttpTransport, Transport};

/// Result of a completed pull.
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Image that was pulled.
    pub reference: ImageReference,
    /// Layers in the order they were applied.
    pub layers: Vec<LayerDescriptor>,
    /// Per-layer extraction summaries, in the same order.
    pub extracted: Vec<ExtractedLayer>,
    /// Directory the layers were extracted into.
    pub root: PathBuf,
}

/// Pulls images from the configured registry.
pub struct ImagePuller {
    transport: Arc<dyn Transport>,
    auth_url: String,
    registry_url: String,
}

impl ImagePuller {
    /// Creates a puller that talks HTTP to the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &MiniboxConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a puller over an arbitrary transport.
    #[must_use]
    pub fn with_transport(config: &MiniboxConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            auth_url: config.auth_url.clone(),
            registry_url: config.registry_url.clone(),
        }
    }

    /// Obtains a token and opens a session extracting into `staging`.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::Auth` if the token exchange fails.
    pub fn authenticate(&self, reference: &ImageReference, staging: &Path) -> Result<PullSession> {
        let token = crate::auth::authorize(self.transport.as_ref(), &self.auth_url, reference)?;
        Ok(PullSession::new(
            reference.clone(),
            token,
            self.registry_url.clone(),
            staging,
        ))
    }

    /// Resolves the session's image to the layer list for `platform`.
    ///
    /// # Errors
    ///
    /// See [`resolve_layers`].
    pub fn resolve(&self, session: &PullSession, platform: &Platform) -> Result<Vec<LayerDescriptor>> {
        resolve_layers(self.transport.as_ref(), session, platform)
    }

    /// Downloads all layers concurrently into the staging directory.
    ///
    /// # Errors
    ///
    /// See [`download_layers`].
    pub fn download(
        &self,
        session: &PullSession,
        layers: &[LayerDescriptor],
    ) -> Result<Vec<DownloadedLayer>> {
        download_layers(self.transport.as_ref(), session, layers)
    }

    /// Applies downloaded layers in order and removes their archives.
    ///
    /// # Errors
    ///
    /// See [`apply_layers`].
    pub fn extract(
        &self,
        session: &PullSession,
        downloaded: &[DownloadedLayer],
    ) -> Result<Vec<ExtractedLayer>> {
        apply_layers(downloaded, session.staging())
    }

    /// Runs the whole pipeline into `staging`.
    ///
    /// Nothing is rolled back on failure; whatever was extracted before the
    /// failing stage stays in `staging`.
    ///
    /// # Errors
    ///
    /// Returns the first error from any stage.
    pub fn pull_into(
        &self,
        reference: &ImageReference,
        staging: &Path,
        platform: &Platform,
    ) -> Result<PulledImage> {
        let session = self.authenticate(reference, staging)?;
        let layers = self.resolve(&session, platform)?;
        let downloaded = self.download(&session, &layers)?;
        let extracted = self.extract(&session, &downloaded)?;
        tracing::info!(reference = %reference, layers = layers.len(), "image pulled");
        Ok(PulledImage {
            reference: reference.clone(),
            layers,
            extracted,
            root: staging.to_path_buf(),
        })
    }
}

impl std::fmt::Debug for ImagePuller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePuller")
            .field("auth_url", &self.auth_url)
            .field("registry_url", &self.registry_url)
            .finish_non_exhaustive()
    }
}
