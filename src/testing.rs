//! Scripted stand-in for yt-dlp used by the job and session tests.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::downloader::{MediaBackend, MediaInfo};
use crate::error::JobError;
use crate::model::{DownloadRequest, ProgressSignal};

#[derive(Default)]
pub struct FakeBackend {
    info: Option<MediaInfo>,
    resolve_error: Option<String>,
    thumbnail: Vec<u8>,
    total: f64,
    samples: Vec<f64>,
    download_error: Option<String>,
    cancel_at: Option<(usize, CancellationToken)>,
    /// Waits until this token is cancelled before reporting samples.
    gate: Option<CancellationToken>,
    sample_delay: Option<Duration>,
    /// Succeeds without naming the output file.
    no_output_file: bool,
    resolve_calls: Arc<AtomicUsize>,
    download_calls: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn with_info(mut self, info: MediaInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn with_resolve_error(mut self, message: &str) -> Self {
        self.resolve_error = Some(message.to_owned());
        self
    }

    pub fn with_thumbnail(mut self, bytes: Vec<u8>) -> Self {
        self.thumbnail = bytes;
        self
    }

    pub fn with_samples(mut self, total: f64, downloaded: &[f64]) -> Self {
        self.total = total;
        self.samples = downloaded.to_vec();
        self
    }

    pub fn with_download_error(mut self, message: &str) -> Self {
        self.download_error = Some(message.to_owned());
        self
    }

    /// Cancels `token` right before the sample at index `n` is reported.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((n, token));
        self
    }

    pub fn gated(mut self, gate: CancellationToken) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = Some(delay);
        self
    }

    pub fn without_output_file(mut self) -> Self {
        self.no_output_file = true;
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.download_calls)
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn resolve(&self, _url: &str) -> Result<MediaInfo, JobError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.resolve_error {
            return Err(JobError::Resolution(message.clone()));
        }
        Ok(self.info.clone().unwrap_or_default())
    }

    async fn fetch_thumbnail(&self, _url: &str) -> Result<Vec<u8>, JobError> {
        if self.thumbnail.is_empty() {
            return Err(JobError::Network("thumbnail response was empty".into()));
        }
        Ok(self.thumbnail.clone())
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        on_progress: &mut (dyn FnMut(ProgressSignal) -> ControlFlow<()> + Send),
    ) -> Result<Option<PathBuf>, JobError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.cancelled().await;
        }
        for (i, &downloaded) in self.samples.iter().enumerate() {
            if let Some((n, token)) = &self.cancel_at {
                if *n == i {
                    token.cancel();
                }
            }
            if let Some(delay) = self.sample_delay {
                tokio::time::sleep(delay).await;
            }
            let signal = ProgressSignal::Downloading {
                downloaded: Some(downloaded),
                total: Some(self.total),
            };
            if on_progress(signal).is_break() {
                return Err(JobError::Cancelled);
            }
        }
        if on_progress(ProgressSignal::Finished).is_break() {
            return Err(JobError::Cancelled);
        }
        if let Some(message) = &self.download_error {
            return Err(JobError::ToolFailed {
                tool: "yt-dlp".into(),
                code: Some(1),
                stderr: message.clone(),
            });
        }
        if self.no_output_file {
            return Ok(None);
        }
        Ok(Some(
            request
                .destination
                .join(format!("Fake Video.{}", request.format.extension())),
        ))
    }
}
