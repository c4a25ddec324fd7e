//! Release feed check and installer download. Runs on blocking threads.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use semver::Version;
use serde::Deserialize;

use crate::config::UpdateSource;
use crate::error::UpdateError;

const RELEASES_API: &str = "https://api.github.com/repos";
const FEED_TIMEOUT: Duration = Duration::from_secs(20);

#[cfg(target_os = "windows")]
pub const INSTALLER_EXTENSION: &str = ".exe";
#[cfg(target_os = "macos")]
pub const INSTALLER_EXTENSION: &str = ".dmg";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const INSTALLER_EXTENSION: &str = ".AppImage";

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    /// First asset whose name ends with the platform installer extension.
    pub fn installer(&self) -> Option<&ReleaseAsset> {
        let ext = INSTALLER_EXTENSION.to_ascii_lowercase();
        self.assets
            .iter()
            .find(|a| a.name.to_ascii_lowercase().ends_with(&ext))
    }
}

fn client(timeout: Option<Duration>) -> Result<Client, UpdateError> {
    Ok(Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}

/// Returns the latest release when it is newer than `current`.
pub fn check_latest(source: &UpdateSource, current: &str) -> Result<Option<Release>, UpdateError> {
    let url = format!("{RELEASES_API}/{}/releases/latest", source.repo);
    let mut request = client(Some(FEED_TIMEOUT))?
        .get(&url)
        .header(ACCEPT, "application/vnd.github+json");
    if !source.token.is_empty() {
        request = request.header(AUTHORIZATION, format!("token {}", source.token));
    }

    let response = request.send()?;
    if !response.status().is_success() {
        return Err(UpdateError::Status(response.status().as_u16()));
    }
    let release: Release = response.json()?;
    if is_newer(&release.tag_name, current)? {
        tracing::info!("update available: {} (running {current})", release.tag_name);
        Ok(Some(release))
    } else {
        tracing::debug!("up to date: feed has {}, running {current}", release.tag_name);
        Ok(None)
    }
}

/// Semantic-version comparison; a leading `v` on the tag is ignored.
pub fn is_newer(tag: &str, current: &str) -> Result<bool, UpdateError> {
    Ok(parse_version(tag)? > parse_version(current)?)
}

fn parse_version(text: &str) -> Result<Version, semver::Error> {
    Version::parse(text.trim().trim_start_matches(['v', 'V']))
}

/// Streams the installer asset into `dir` and returns its path.
pub fn download_installer(release: &Release, dir: &Path) -> Result<PathBuf, UpdateError> {
    let asset = release
        .installer()
        .ok_or(UpdateError::NoInstaller(INSTALLER_EXTENSION))?;
    let file_name = Path::new(&asset.name)
        .file_name()
        .ok_or(UpdateError::NoInstaller(INSTALLER_EXTENSION))?;
    let target = dir.join(file_name);

    let mut response = client(None)?
        .get(&asset.browser_download_url)
        .send()?
        .error_for_status()?;
    let mut file = File::create(&target)?;
    let written = response.copy_to(&mut file)?;
    tracing::info!("installer saved to {} ({written} bytes)", target.display());
    Ok(target)
}
