//! The download worker: one request in, ordered progress and exactly one
//! terminal event out.

use std::ops::ControlFlow;

use tokio::sync::mpsc::{Sender, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::downloader::MediaBackend;
use crate::error::JobError;
use crate::model::{DownloadEvent, DownloadRequest, JobOutcome, ProgressSignal};
use crate::progress::ProgressNormalizer;

/// Capacity of the per-job event channel.
pub const EVENT_CAPACITY: usize = 64;

pub async fn run_download<B>(
    backend: &B,
    request: DownloadRequest,
    cancel: CancellationToken,
    events: Sender<DownloadEvent>,
) where
    B: MediaBackend + ?Sized,
{
    tracing::info!("download started: {} as {}", request.url, request.format);
    let mut normalizer = ProgressNormalizer::new();
    let _ = events.send(DownloadEvent::Progress(normalizer.reset())).await;

    let result = if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        let mut on_progress = |signal: ProgressSignal| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            if let ProgressSignal::Downloading { downloaded, total } = signal {
                if let Some(pct) = normalizer.observe(downloaded, total) {
                    publish_progress(&events, pct);
                }
            }
            ControlFlow::Continue(())
        };
        backend.download(&request, &mut on_progress).await
    };

    let outcome = match result {
        Ok(path) => {
            tracing::debug!("in-flight progress ended at {}%", normalizer.last_emitted());
            if let Some(done) = normalizer.finish() {
                let _ = events.send(DownloadEvent::Progress(done)).await;
            }
            let mut message = format!("Downloaded: {} as {}", request.url, request.format);
            match path.as_deref().and_then(|p| p.file_name()) {
                Some(file) => {
                    tracing::info!("download finished: {}", request.destination.join(file).display());
                    message.push_str(&format!(" -> {}", file.to_string_lossy()));
                }
                None => tracing::info!("download finished, output file not reported"),
            }
            JobOutcome::Succeeded(message)
        }
        Err(JobError::Cancelled) => {
            let _ = events.send(DownloadEvent::Progress(normalizer.abort())).await;
            tracing::info!("download cancelled: {}", request.url);
            JobOutcome::Cancelled(format!("Cancelled: {}", request.url))
        }
        Err(err) => {
            let _ = events.send(DownloadEvent::Progress(normalizer.abort())).await;
            tracing::warn!("download failed for {}: {err}", request.url);
            JobOutcome::Failed(format!("Error: {err}"))
        }
    };

    if events.send(DownloadEvent::Finished(outcome)).await.is_err() {
        tracing::debug!("controller went away before the download finished");
    }
}

// Progress updates are lossy under back-pressure; a later value supersedes.
fn publish_progress(events: &Sender<DownloadEvent>, pct: u8) {
    match events.try_send(DownloadEvent::Progress(pct)) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(_)) => tracing::trace!("progress channel full, dropped {pct}%"),
    }
}
