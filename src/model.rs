use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};

/// Maximum number of history lines kept for display.
pub const HISTORY_LIMIT: usize = 200;

/// Output container/codec choice offered in the format dropdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatSelector {
    Mp4FullHd,
    Mp4Uhd,
    Mp3,
    M4a,
}

impl FormatSelector {
    pub const ALL: [FormatSelector; 4] = [
        FormatSelector::Mp4FullHd,
        FormatSelector::Mp4Uhd,
        FormatSelector::Mp3,
        FormatSelector::M4a,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormatSelector::Mp4FullHd => "MP4 (1080p)",
            FormatSelector::Mp4Uhd => "MP4 (4K)",
            FormatSelector::Mp3 => "MP3",
            FormatSelector::M4a => "M4A",
        }
    }

    /// Extension of the file left in the destination folder.
    pub fn extension(self) -> &'static str {
        match self {
            FormatSelector::Mp4FullHd | FormatSelector::Mp4Uhd => "mp4",
            FormatSelector::Mp3 => "mp3",
            FormatSelector::M4a => "m4a",
        }
    }
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Cancelled,
    Succeeded,
    Failed,
}

/// Everything a download worker needs to know about one job.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub format: FormatSelector,
}

/// Raw progress callback payload coming out of the media backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressSignal {
    /// `None` means the library reported a non-numeric value.
    Downloading {
        downloaded: Option<f64>,
        total: Option<f64>,
    },
    /// One stream (video or audio) finished fetching.
    Finished,
}

/// Terminal result of a download job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(String),
    Failed(String),
    Cancelled(String),
}

impl JobOutcome {
    pub fn message(&self) -> &str {
        match self {
            JobOutcome::Succeeded(m) | JobOutcome::Failed(m) | JobOutcome::Cancelled(m) => m,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Succeeded(_) => JobStatus::Succeeded,
            JobOutcome::Failed(_) => JobStatus::Failed,
            JobOutcome::Cancelled(_) => JobStatus::Cancelled,
        }
    }
}

/// Messages sent from a download worker to the controller, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Progress(u8),
    Finished(JobOutcome),
}

/// Decoded RGBA thumbnail, ready to upload as a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Successful preview: title is unknown when served from the cache.
#[derive(Debug, Clone)]
pub struct PreviewResult {
    pub title: Option<String>,
    pub image: PreviewImage,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"), self.message)
    }
}

/// Append-only log of finished jobs, capped at a fixed size.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }
}

impl History {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            timestamp: Local::now(),
            message: message.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
