use crate::downloader::MediaBackend;
use crate::error::{JobError, ValidationError};
use crate::model::PreviewResult;
use crate::thumbnail::{ThumbnailCache, decode_thumbnail};

const ACCEPTED_SCHEMES: [&str; 2] = ["http://", "https://"];

/// Trims the URL and checks it is non-empty and http(s).
pub fn validate_url(input: &str) -> Result<String, ValidationError> {
    let url = input.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    let lower = url.to_ascii_lowercase();
    if !ACCEPTED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return Err(ValidationError::UnsupportedScheme(url.to_owned()));
    }
    Ok(url.to_owned())
}

/// Resolves the thumbnail and title for an already validated URL.
///
/// The cache is consulted first; a hit skips metadata resolution entirely,
/// so the title is unknown in that case.
pub async fn run_preview<B>(
    backend: &B,
    cache: &ThumbnailCache,
    url: &str,
) -> Result<PreviewResult, JobError>
where
    B: MediaBackend + ?Sized,
{
    if let Some(bytes) = cache.get(url) {
        match decode_thumbnail(&bytes) {
            Ok(image) => {
                tracing::debug!("thumbnail cache hit for {url}");
                return Ok(PreviewResult {
                    title: None,
                    image,
                    from_cache: true,
                });
            }
            Err(err) => tracing::debug!("ignoring unreadable cached thumbnail for {url}: {err}"),
        }
    }

    let info = backend.resolve(url).await?;
    let thumbnail_url = info
        .thumbnail
        .filter(|t| !t.trim().is_empty())
        .ok_or(JobError::NoThumbnail)?;

    let bytes = backend.fetch_thumbnail(&thumbnail_url).await?;
    let image = decode_thumbnail(&bytes)?;
    cache.put(url, &bytes);

    Ok(PreviewResult {
        title: info.title,
        image,
        from_cache: false,
    })
}
