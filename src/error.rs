use std::path::PathBuf;
use thiserror::Error;

/// Input problems caught before any background work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a video URL.")]
    EmptyUrl,

    #[error("Unsupported URL (expected http:// or https://): {0}")]
    UnsupportedScheme(String),

    #[error("Please choose a destination folder.")]
    NoDestination,

    #[error("Destination folder is missing or not writable: {}", .0.display())]
    DestinationUnusable(PathBuf),
}

/// Why a download could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("A download is already in progress.")]
    AlreadyRunning,
}

/// Failures raised inside a preview or download worker.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Resolution(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("no thumbnail available for this URL")]
    NoThumbnail,

    #[error("thumbnail could not be decoded: {0}")]
    InvalidImage(String),

    #[error("external tool is missing: {tool}")]
    ToolMissing { tool: String },

    #[error("{tool} failed (code={code:?}): {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("download cancelled by user")]
    Cancelled,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for JobError {
    fn from(err: reqwest::Error) -> Self {
        JobError::Network(err.to_string())
    }
}

/// Failures of the release feed check or installer download.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("release feed returned status {0}")]
    Status(u16),

    #[error("invalid version: {0}")]
    Version(#[from] semver::Error),

    #[error("release has no {0} installer asset")]
    NoInstaller(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
