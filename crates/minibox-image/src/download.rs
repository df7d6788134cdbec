//! Concurrent layer download.
//!
//! One worker per distinct layer digest writes its blob to a digest-named
//! archive file in the staging directory. Workers share a [`CancelToken`]: the first worker
//! to fail raises it, and workers that have not yet issued their request
//! return without touching the network. Requests already in flight run to
//! completion.
//!
//! Extraction is not done here. Results come back indexed by layer
//! position so the caller can apply them in manifest order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use minibox_common::error::{MiniboxError, Result};

use crate::manifest::LayerDescriptor;
use crate::session::PullSession;
use crate::staging::archive_path;
use crate::transport::Transport;

/// Shared first-error cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether the signal has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one download worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Blob written to this archive path.
    Fetched(PathBuf),
    /// Cancelled before the request was issued.
    Skipped,
}

/// A downloaded layer archive waiting to be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedLayer {
    /// Layer this archive belongs to.
    pub layer: LayerDescriptor,
    /// Archive file inside the staging directory.
    pub archive: PathBuf,
}

/// Fetches every layer concurrently.
///
/// Each distinct digest is fetched once; a layer listed more than once
/// shares its archive with the earlier entry. The returned vector is in the
/// same order as `layers`.
///
/// # Errors
///
/// Returns the error of the first worker to fail.
pub fn download_layers(
    transport: &dyn Transport,
    session: &PullSession,
    layers: &[LayerDescriptor],
) -> Result<Vec<DownloadedLayer>> {
    let cancel = CancelToken::new();
    let first_error: Mutex<Option<MiniboxError>> = Mutex::new(None);
    let record = |err: MiniboxError| {
        cancel.cancel();
        let mut slot = match first_error.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::debug!(error = %err, "additional layer failure");
        }
    };

    let mut distinct: Vec<&LayerDescriptor> = Vec::with_capacity(layers.len());
    for layer in layers {
        if !distinct.iter().any(|seen| seen.digest == layer.digest) {
            distinct.push(layer);
        }
    }

    tracing::info!(count = layers.len(), distinct = distinct.len(), "downloading layers");
    let outcomes: Vec<Option<DownloadOutcome>> = std::thread::scope(|scope| {
        let record = &record;
        let cancel = &cancel;
        let handles: Vec<_> = distinct
            .iter()
            .map(|&layer| {
                scope.spawn(move || match download_layer(transport, session, layer, cancel) {
                    Ok(outcome) => Some(outcome),
                    Err(err) => {
                        record(err);
                        None
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(&distinct)
            .map(|(handle, layer)| {
                handle.join().unwrap_or_else(|_| {
                    record(MiniboxError::Layer {
                        digest: layer.digest.to_string(),
                        message: "download worker panicked".into(),
                    });
                    None
                })
            })
            .collect()
    });

    let first_error = match first_error.into_inner() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(err) = first_error {
        return Err(err);
    }

    let fetched: Vec<(&LayerDescriptor, PathBuf)> = distinct
        .into_iter()
        .zip(outcomes)
        .map(|(layer, outcome)| match outcome {
            Some(DownloadOutcome::Fetched(archive)) => Ok((layer, archive)),
            _ => Err(MiniboxError::Layer {
                digest: layer.digest.to_string(),
                message: "download skipped".into(),
            }),
        })
        .collect::<Result<_>>()?;

    layers
        .iter()
        .map(|layer| {
            let archive = fetched
                .iter()
                .find(|(seen, _)| seen.digest == layer.digest)
                .map(|(_, archive)| archive.clone())
                .ok_or_else(|| MiniboxError::Layer {
                    digest: layer.digest.to_string(),
                    message: "download skipped".into(),
                })?;
            Ok(DownloadedLayer {
                layer: layer.clone(),
                archive,
            })
        })
        .collect()
}

/// Downloads one layer unless `cancel` has already been raised.
///
/// A failure raises `cancel` before returning.
///
/// # Errors
///
/// Returns transport errors from the blob request and
/// `MiniboxError::Layer` if the archive file cannot be written.
pub fn download_layer(
    transport: &dyn Transport,
    session: &PullSession,
    layer: &LayerDescriptor,
    cancel: &CancelToken,
) -> Result<DownloadOutcome> {
    if cancel.is_cancelled() {
        tracing::debug!(digest = %layer.digest, "skipping layer, pull cancelled");
        return Ok(DownloadOutcome::Skipped);
    }
    let result = fetch_to_archive(transport, session, layer);
    if result.is_err() {
        cancel.cancel();
    }
    result.map(DownloadOutcome::Fetched)
}

fn fetch_to_archive(
    transport: &dyn Transport,
    session: &PullSession,
    layer: &LayerDescriptor,
) -> Result<PathBuf> {
    let layer_error = |message: String| MiniboxError::Layer {
        digest: layer.digest.to_string(),
        message,
    };

    tracing::debug!(digest = %layer.digest, size = layer.size, "fetching layer");
    let request = session.authorized(session.blob_url(&layer.digest));
    let mut body = transport.get(&request)?;

    let path = archive_path(session.staging(), &layer.digest);
    let file = File::create(&path).map_err(|e| layer_error(format!("create archive: {e}")))?;
    let mut writer = BufWriter::new(file);
    let written = std::io::copy(&mut body, &mut writer)
        .map_err(|e| layer_error(format!("write archive: {e}")))?;
    writer
        .flush()
        .map_err(|e| layer_error(format!("flush archive: {e}")))?;

    tracing::debug!(digest = %layer.digest, bytes = written, "layer fetched");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthToken;
    use crate::transport::{Body, MemoryTransport, Request};
    use minibox_common::types::{Digest, ImageReference};
    use std::time::Duration;

    fn layer(hex: &str) -> LayerDescriptor {
        LayerDescriptor {
            media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".into(),
            size: 4,
            digest: Digest::parse(format!("sha256:{hex}")).expect("digest"),
        }
    }

    fn session(staging: &std::path::Path) -> PullSession {
        PullSession::new(
            ImageReference::parse("alpine").expect("reference"),
            AuthToken::new("tok"),
            "https://registry.test",
            staging,
        )
    }

    #[test]
    fn download_layers_returns_archives_in_manifest_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = session(dir.path());
        let layers = vec![layer("aa"), layer("bb"), layer("cc")];
        let transport = layers.iter().fold(MemoryTransport::new(), |t, l| {
            t.with_body(s.blob_url(&l.digest), l.digest.encoded().as_bytes().to_vec())
        });

        let downloaded = download_layers(&transport, &s, &layers).expect("download");
        assert_eq!(downloaded.len(), 3);
        for (d, l) in downloaded.iter().zip(&layers) {
            assert_eq!(d.layer, *l);
            let content = std::fs::read_to_string(&d.archive).expect("read");
            assert_eq!(content, l.digest.encoded());
        }
    }

    #[test]
    fn download_layers_surfaces_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = session(dir.path());
        let layers = vec![layer("aa"), layer("bb")];
        let transport = MemoryTransport::new()
            .with_body(s.blob_url(&layers[0].digest), b"data".to_vec())
            .with_status(s.blob_url(&layers[1].digest), 500);

        let err = download_layers(&transport, &s, &layers).expect_err("should fail");
        assert!(matches!(err, MiniboxError::Registry { status: 500, .. }));
    }

    #[test]
    fn repeated_digest_is_fetched_once_and_shared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = session(dir.path());
        let layers = vec![layer("aa"), layer("bb"), layer("aa")];
        let transport = MemoryTransport::new()
            .with_body(s.blob_url(&layers[0].digest), b"a".to_vec())
            .with_body(s.blob_url(&layers[1].digest), b"b".to_vec());

        let downloaded = download_layers(&transport, &s, &layers).expect("download");
        assert_eq!(downloaded.len(), 3);
        assert_eq!(downloaded[0].archive, downloaded[2].archive);
        assert_eq!(transport.requests().len(), 2);
    }

    /// Fails every blob request, sleeping first for the slow digest.
    struct StaggeredFailures {
        slow: String,
        delay: Duration,
    }

    impl Transport for StaggeredFailures {
        fn get(&self, request: &Request) -> Result<Body> {
            let status = if request.url.ends_with(&self.slow) {
                std::thread::sleep(self.delay);
                500
            } else {
                404
            };
            Err(MiniboxError::Registry {
                url: request.url.clone(),
                status,
            })
        }
    }

    #[test]
    fn earliest_failure_wins_regardless_of_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = session(dir.path());
        let layers = vec![layer("aa"), layer("bb")];
        let transport = StaggeredFailures {
            slow: "sha256:aa".into(),
            delay: Duration::from_millis(300),
        };

        let err = download_layers(&transport, &s, &layers).expect_err("should fail");
        assert!(matches!(err, MiniboxError::Registry { status: 404, .. }), "{err}");
    }

    #[test]
    fn cancelled_worker_skips_network_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = session(dir.path());
        let transport = MemoryTransport::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = download_layer(&transport, &s, &layer("aa"), &cancel).expect("skip");
        assert_eq!(outcome, DownloadOutcome::Skipped);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn failing_worker_raises_cancel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = session(dir.path());
        let transport = MemoryTransport::new();
        let cancel = CancelToken::new();

        assert!(download_layer(&transport, &s, &layer("aa"), &cancel).is_err());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn blob_request_carries_bearer_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = session(dir.path());
        let l = layer("aa");
        let transport = MemoryTransport::new().with_body(s.blob_url(&l.digest), b"x".to_vec());

        let _ = download_layers(&transport, &s, std::slice::from_ref(&l)).expect("download");
        let requests = transport.requests();
        assert_eq!(requests[0].header_value("Authorization"), Some("Bearer tok"));
    }
}
