//! Thumbnail download, decoding and the on-disk preview cache.
//!
//! Entries are keyed by a 64-bit FNV-1a hash of the video URL. The cache is
//! append-only: an entry is never refreshed, so a thumbnail changed at the
//! source keeps showing the old image until the file is deleted by hand.
//! Two URLs that collide share one file and the later `put` wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::JobError;
use crate::model::PreviewImage;

/// Timeout for thumbnail HTTP requests.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic, non-cryptographic URL hash.
pub fn url_key(url: &str) -> u64 {
    url.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    root: PathBuf,
    key_fn: fn(&str) -> u64,
}

impl ThumbnailCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            key_fn: url_key,
        }
    }

    /// `~/.tubegrab/thumbnails`, or the temp dir when there is no home.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".tubegrab")
            .join("thumbnails")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{:016x}.thumb", (self.key_fn)(url)))
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(url);
        match fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!("thumbnail cache miss for {url}: {err}");
                None
            }
        }
    }

    pub fn put(&self, url: &str, bytes: &[u8]) {
        if let Err(err) = fs::create_dir_all(&self.root) {
            tracing::debug!("cannot create thumbnail cache {}: {err}", self.root.display());
            return;
        }
        let path = self.entry_path(url);
        if let Err(err) = fs::write(&path, bytes) {
            tracing::debug!("cannot write thumbnail {}: {err}", path.display());
        }
    }
}

/// Decodes thumbnail bytes into RGBA pixels, rejecting empty images.
pub fn decode_thumbnail(bytes: &[u8]) -> Result<PreviewImage, JobError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| JobError::InvalidImage(e.to_string()))?
        .to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(JobError::InvalidImage("image has no pixels".into()));
    }
    Ok(PreviewImage {
        width: img.width(),
        height: img.height(),
        rgba: img.into_raw(),
    })
}

/// Plain HTTP GET of a thumbnail URL.
pub async fn fetch_thumbnail(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, JobError> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(JobError::Network(format!(
            "thumbnail request returned {}",
            resp.status()
        )));
    }
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Err(JobError::Network("thumbnail response was empty".into()));
    }
    Ok(bytes.to_vec())
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .expect("encode png");
    out.into_inner()
}
