//! Run engine that drives one pull-and-run invocation.
//!
//! The engine walks a [`RunPhase`] state machine from `Unauthenticated` to
//! `Done` or `Failed`. No stage is retried. If anything fails before the
//! root is restricted, the staging directory is removed (unless configured
//! otherwise); after that it is the running root and stays in place.

use std::sync::Arc;

use minibox_common::config::MiniboxConfig;
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{ImageReference, Platform, RunPhase};
use minibox_image::pull::{ImagePuller, PulledImage};
use minibox_image::staging::StagingDirectory;
use minibox_image::transport::Transport;

use crate::bootstrap::{enter_root, prepare_root};
use crate::process::{LaunchOptions, ProcessSpec, launch};

/// What to pull and what to run in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Image to pull.
    pub image: ImageReference,
    /// Command as given by the caller; a bare name is looked up on `PATH`.
    pub command: String,
    /// Arguments for the command.
    pub args: Vec<String>,
}

/// Records the phase of a run and rejects out-of-order transitions.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    history: Vec<RunPhase>,
}

impl PhaseTracker {
    /// Starts in `Unauthenticated`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: vec![RunPhase::Unauthenticated],
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(RunPhase::Unauthenticated)
    }

    /// Every phase visited, in order.
    #[must_use]
    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::Config` if the transition is not allowed.
    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        let current = self.phase();
        if !current.can_advance_to(next) {
            return Err(MiniboxError::Config {
                message: format!("invalid run phase transition {current} -> {next}"),
            });
        }
        tracing::info!(from = %current, to = %next, "run phase");
        self.history.push(next);
        Ok(())
    }

    /// Moves to `Failed` unless the run already finished.
    pub fn fail(&mut self) {
        if !self.phase().is_terminal() {
            self.history.push(RunPhase::Failed);
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives pull, bootstrap, and launch.
#[derive(Debug)]
pub struct Engine {
    config: MiniboxConfig,
    puller: ImagePuller,
    platform: Platform,
    launch: LaunchOptions,
}

impl Engine {
    /// Creates an engine that pulls over HTTP for the running platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: MiniboxConfig) -> Result<Self> {
        let puller = ImagePuller::new(&config)?;
        Ok(Self::with_puller(config, puller))
    }

    /// Creates an engine over an arbitrary transport.
    #[must_use]
    pub fn with_transport(config: MiniboxConfig, transport: Arc<dyn Transport>) -> Self {
        let puller = ImagePuller::with_transport(&config, transport);
        Self::with_puller(config, puller)
    }

    fn with_puller(config: MiniboxConfig, puller: ImagePuller) -> Self {
        Self {
            config,
            puller,
            platform: Platform::current(),
            launch: LaunchOptions::default(),
        }
    }

    /// Overrides the platform used to pick from manifest lists.
    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Overrides the launch isolation options.
    #[must_use]
    pub const fn launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch = options;
        self
    }

    /// Pulls the image, runs the command in it, and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's error. A command that exits
    /// nonzero is reported as `MiniboxError::ChildExit`.
    pub fn run(&self, request: &RunRequest) -> Result<()> {
        let mut tracker = PhaseTracker::new();
        let result = self.run_tracked(request, &mut tracker);
        if let Err(e) = &result {
            if !matches!(e, MiniboxError::ChildExit { .. }) {
                tracker.fail();
                tracing::error!(phase = %tracker.phase(), error = %e, "run failed");
            }
        }
        result
    }

    fn run_tracked(&self, request: &RunRequest, tracker: &mut PhaseTracker) -> Result<()> {
        let executable =
            minibox_core::filesystem::executable::resolve_command(&request.command)?;
        let (staging, _pulled) = self.pull(&request.image, tracker)?;

        let prepared = match prepare_root(staging.path(), &executable)
            .and_then(|prepared| enter_root(&prepared).map(|()| prepared))
        {
            Ok(prepared) => prepared,
            Err(e) => {
                self.discard(staging);
                return Err(e);
            }
        };
        tracker.advance(RunPhase::RootRestricted)?;

        tracker.advance(RunPhase::ProcessRunning)?;
        let result = launch(
            &ProcessSpec::new(prepared.program, request.args.clone()),
            self.launch,
        );
        match result {
            Ok(()) | Err(MiniboxError::ChildExit { .. }) => {
                tracker.advance(RunPhase::Done)?;
                result
            }
            Err(e) => Err(e),
        }
    }

    /// Pulls `reference` into a fresh staging directory.
    ///
    /// On failure the staging directory is removed if the configuration asks
    /// for it; the extraction stage itself never rolls back.
    ///
    /// # Errors
    ///
    /// Returns the first error from any pull stage.
    pub fn pull(
        &self,
        reference: &ImageReference,
        tracker: &mut PhaseTracker,
    ) -> Result<(StagingDirectory, PulledImage)> {
        let staging = StagingDirectory::create(&self.config.staging_root)?;
        match self.pull_stages(reference, &staging, tracker) {
            Ok(pulled) => Ok((staging, pulled)),
            Err(e) => {
                self.discard(staging);
                Err(e)
            }
        }
    }

    fn pull_stages(
        &self,
        reference: &ImageReference,
        staging: &StagingDirectory,
        tracker: &mut PhaseTracker,
    ) -> Result<PulledImage> {
        let session = self.puller.authenticate(reference, staging.path())?;
        tracker.advance(RunPhase::Authenticated)?;

        let layers = self.puller.resolve(&session, &self.platform)?;
        tracker.advance(RunPhase::ManifestResolved)?;

        tracker.advance(RunPhase::LayersDownloading)?;
        let downloaded = self.puller.download(&session, &layers)?;
        let extracted = self.puller.extract(&session, &downloaded)?;
        tracker.advance(RunPhase::LayersReady)?;

        tracing::info!(reference = %reference, layers = layers.len(), "image ready");
        Ok(PulledImage {
            reference: reference.clone(),
            layers,
            extracted,
            root: staging.path().to_path_buf(),
        })
    }

    fn discard(&self, staging: StagingDirectory) {
        if !self.config.cleanup_on_failure {
            tracing::info!(path = %staging.path().display(), "leaving partial staging directory");
            return;
        }
        let path = staging.path().to_path_buf();
        if let Err(e) = staging.remove() {
            tracing::warn!(path = %path.display(), error = %e, "staging cleanup failed");
        }
    }
}
