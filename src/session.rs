//! Per-window state: the save folder, the one active download, the latest
//! preview request, and the history log. Lives on the UI thread; workers only
//! talk back through channels.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::downloader::MediaBackend;
use crate::error::{StartError, ValidationError};
use crate::job::{EVENT_CAPACITY, run_download};
use crate::model::{
    DownloadEvent, DownloadRequest, FormatSelector, History, JobOutcome, JobStatus, PreviewResult,
};
use crate::preview::{run_preview, validate_url};
use crate::thumbnail::ThumbnailCache;

/// Quiet period after the last URL edit before a preview is fetched.
pub const PREVIEW_DEBOUNCE: Duration = Duration::from_millis(500);

/// Something the UI should react to, produced by [`SessionController::poll`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PreviewReady(PreviewResult),
    PreviewFailed(String),
    Progress(u8),
    DownloadFinished(JobOutcome),
}

struct ActiveDownload {
    request: DownloadRequest,
    cancel: CancellationToken,
    events: mpsc::Receiver<DownloadEvent>,
}

enum PreviewState {
    Idle,
    Pending { url: String, due: Instant },
    Running {
        url: String,
        result: oneshot::Receiver<Result<PreviewResult, String>>,
    },
}

pub struct SessionController<B> {
    runtime: Handle,
    backend: Arc<B>,
    cache: Arc<ThumbnailCache>,
    save_directory: Option<PathBuf>,
    download: Option<ActiveDownload>,
    download_status: Option<JobStatus>,
    progress: u8,
    preview: PreviewState,
    history: History,
}

impl<B> SessionController<B>
where
    B: MediaBackend + 'static,
{
    pub fn new(runtime: Handle, backend: Arc<B>, cache: ThumbnailCache) -> Self {
        Self {
            runtime,
            backend,
            cache: Arc::new(cache),
            save_directory: None,
            download: None,
            download_status: None,
            progress: 0,
            preview: PreviewState::Idle,
            history: History::default(),
        }
    }

    pub fn save_directory(&self) -> Option<&Path> {
        self.save_directory.as_deref()
    }

    /// Remembers the destination folder for this and later downloads.
    pub fn select_directory(&mut self, path: PathBuf) -> Result<(), ValidationError> {
        // writable means a file can actually be created there
        let usable = path.is_dir() && tempfile::tempfile_in(&path).is_ok();
        if !usable {
            return Err(ValidationError::DestinationUnusable(path));
        }
        tracing::info!("save directory set to {}", path.display());
        self.save_directory = Some(path);
        Ok(())
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn download_status(&self) -> Option<JobStatus> {
        self.download_status
    }

    pub fn is_downloading(&self) -> bool {
        self.download.is_some()
    }

    /// URL and format of the running download, if any.
    pub fn active_request(&self) -> Option<&DownloadRequest> {
        self.download.as_ref().map(|d| &d.request)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn preview_pending(&self) -> bool {
        !matches!(self.preview, PreviewState::Idle)
    }

    /// Starts a download, refusing while another one is still running.
    pub fn start_download(&mut self, url: &str, format: FormatSelector) -> Result<(), StartError> {
        if let Some(active) = &self.download {
            tracing::warn!(
                "refusing to start {url}: {} is still downloading",
                active.request.url
            );
            return Err(StartError::AlreadyRunning);
        }
        let url = validate_url(url)?;
        let destination = self
            .save_directory
            .clone()
            .ok_or(ValidationError::NoDestination)?;

        let request = DownloadRequest {
            url,
            destination,
            format,
        };
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let backend = Arc::clone(&self.backend);
        let worker_request = request.clone();
        let worker_cancel = cancel.clone();
        self.runtime.spawn(async move {
            run_download(&*backend, worker_request, worker_cancel, tx).await;
        });

        self.download = Some(ActiveDownload {
            request,
            cancel,
            events: rx,
        });
        self.download_status = Some(JobStatus::Pending);
        self.progress = 0;
        Ok(())
    }

    /// Asks the running download to stop at its next progress report.
    pub fn cancel_download(&mut self) -> bool {
        match &self.download {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Records a URL edit; the preview is fetched once edits settle.
    pub fn url_edited(&mut self, text: &str, now: Instant) {
        let url = text.trim();
        self.preview = if url.is_empty() {
            PreviewState::Idle
        } else {
            PreviewState::Pending {
                url: url.to_owned(),
                due: now + PREVIEW_DEBOUNCE,
            }
        };
    }

    /// Dispatches a due preview and drains worker channels.
    pub fn poll(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.poll_preview(now, &mut events);
        self.poll_download(&mut events);
        events
    }

    fn poll_preview(&mut self, now: Instant, events: &mut Vec<SessionEvent>) {
        let state = std::mem::replace(&mut self.preview, PreviewState::Idle);
        self.preview = match state {
            PreviewState::Pending { url, due } if due <= now => match validate_url(&url) {
                Ok(url) => self.spawn_preview(url),
                Err(err) => {
                    events.push(SessionEvent::PreviewFailed(err.to_string()));
                    PreviewState::Idle
                }
            },
            PreviewState::Running { url, mut result } => match result.try_recv() {
                Ok(Ok(preview)) => {
                    events.push(SessionEvent::PreviewReady(preview));
                    PreviewState::Idle
                }
                Ok(Err(message)) => {
                    tracing::info!("preview failed for {url}: {message}");
                    events.push(SessionEvent::PreviewFailed(message));
                    PreviewState::Idle
                }
                Err(oneshot::error::TryRecvError::Empty) => PreviewState::Running { url, result },
                Err(oneshot::error::TryRecvError::Closed) => {
                    events.push(SessionEvent::PreviewFailed(
                        "preview worker stopped unexpectedly".into(),
                    ));
                    PreviewState::Idle
                }
            },
            other => other,
        };
    }

    fn spawn_preview(&self, url: String) -> PreviewState {
        let (tx, rx) = oneshot::channel();
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let worker_url = url.clone();
        self.runtime.spawn(async move {
            let result = run_preview(&*backend, &cache, &worker_url)
                .await
                .map_err(|e| e.to_string());
            if tx.send(result).is_err() {
                tracing::debug!("preview for {worker_url} superseded");
            }
        });
        PreviewState::Running { url, result: rx }
    }

    fn poll_download(&mut self, events: &mut Vec<SessionEvent>) {
        let Some(active) = self.download.as_mut() else {
            return;
        };
        let outcome = loop {
            match active.events.try_recv() {
                Ok(DownloadEvent::Progress(pct)) => {
                    // the worker's first report means it is running
                    self.download_status = Some(JobStatus::Running);
                    self.progress = pct;
                    events.push(SessionEvent::Progress(pct));
                }
                Ok(DownloadEvent::Finished(outcome)) => break Some(outcome),
                Err(mpsc::error::TryRecvError::Empty) => break None,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    break Some(JobOutcome::Failed(
                        "Error: download worker stopped unexpectedly".into(),
                    ));
                }
            }
        };

        if let Some(outcome) = outcome {
            if !matches!(outcome, JobOutcome::Succeeded(_)) {
                self.progress = 0;
            }
            self.download_status = Some(outcome.status());
            self.history.push(outcome.message());
            self.download = None;
            events.push(SessionEvent::DownloadFinished(outcome));
        }
    }

    /// Adds a free-form line, e.g. from the update checker.
    pub fn note(&mut self, message: impl Into<String>) {
        self.history.push(message);
    }
}
