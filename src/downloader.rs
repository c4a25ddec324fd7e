//! Boundary to the external `yt-dlp` executable (and, through it, `ffmpeg`).

use std::{
    fs::File,
    io::Write,
    ops::ControlFlow,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use rust_embed::RustEmbed;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
};

use crate::config::ToolPaths;
use crate::error::JobError;
use crate::model::{DownloadRequest, FormatSelector, ProgressSignal};
use crate::progress::{PROGRESS_PREFIX, parse_progress_from_line};
use crate::thumbnail::{self, HTTP_TIMEOUT};

/// Upper bound for a metadata-only resolution.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

const FILE_PREFIX: &str = "FILE|";

/// Optional bundled binaries; `assets/` may be empty.
#[derive(RustEmbed)]
#[folder = "assets/"]
pub struct Asset;

/// Metadata returned by a resolve call. Only the fields we display.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// What the jobs need from a video download library.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Metadata only, nothing is downloaded.
    async fn resolve(&self, url: &str) -> Result<MediaInfo, JobError>;

    async fn fetch_thumbnail(&self, url: &str) -> Result<Vec<u8>, JobError>;

    /// Downloads and post-processes the media, returning the final file when
    /// the library reported it.
    /// Returning `Break` from `on_progress` aborts with `JobError::Cancelled`.
    async fn download(
        &self,
        request: &DownloadRequest,
        on_progress: &mut (dyn FnMut(ProgressSignal) -> ControlFlow<()> + Send),
    ) -> Result<Option<PathBuf>, JobError>;
}

/// yt-dlp driven through its command line.
pub struct YtDlp {
    tools: ToolPaths,
    http: reqwest::Client,
}

impl YtDlp {
    pub fn new(tools: ToolPaths) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { tools, http }
    }

    /// Configured path, then a bundled copy, then whatever is on `PATH`.
    fn executable(&self) -> Result<PathBuf, JobError> {
        if let Some(path) = &self.tools.yt_dlp {
            return Ok(path.clone());
        }
        let bin = if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" };
        match Asset::get(bin) {
            Some(data) => {
                let tmp = std::env::temp_dir().join(bin);
                if !tmp.exists() {
                    let mut f = File::create(&tmp)?;
                    f.write_all(&data.data)?;
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))?;
                    }
                }
                Ok(tmp)
            }
            None => Ok(PathBuf::from(bin)),
        }
    }

    fn command(&self) -> Result<Command, JobError> {
        let mut cmd = Command::new(self.executable()?);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    fn ffmpeg_args(&self) -> Result<Vec<String>, JobError> {
        match &self.tools.ffmpeg {
            Some(path) if !path.exists() => Err(JobError::ToolMissing {
                tool: format!("ffmpeg ({})", path.display()),
            }),
            Some(path) => Ok(vec![
                "--ffmpeg-location".to_owned(),
                path.display().to_string(),
            ]),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaBackend for YtDlp {
    async fn resolve(&self, url: &str) -> Result<MediaInfo, JobError> {
        let mut cmd = self.command()?;
        cmd.args(["-J", "--skip-download", "--no-playlist", "--no-warnings", "--", url]);
        let child = cmd.spawn().map_err(spawn_error)?;
        let output = tokio::time::timeout(RESOLVE_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| JobError::Timeout("metadata resolution"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Resolution(last_error_line(&stderr)));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn fetch_thumbnail(&self, url: &str) -> Result<Vec<u8>, JobError> {
        thumbnail::fetch_thumbnail(&self.http, url).await
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        on_progress: &mut (dyn FnMut(ProgressSignal) -> ControlFlow<()> + Send),
    ) -> Result<Option<PathBuf>, JobError> {
        let mut args = self.ffmpeg_args()?;
        args.extend(download_args(request));

        let mut child = self.command()?.args(&args).spawn().map_err(spawn_error)?;
        let stdout = child.stdout.take().ok_or_else(|| JobError::ToolFailed {
            tool: "yt-dlp".into(),
            code: None,
            stderr: "stdout not captured".into(),
        })?;
        let stderr_task = child.stderr.take().map(collect_errors);

        let mut output_file = None;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = next_lossy_line(&mut reader, &mut buf).await? {
            if let Some(path) = line.strip_prefix(FILE_PREFIX) {
                output_file = Some(PathBuf::from(path.trim()));
                continue;
            }
            if !line.starts_with(PROGRESS_PREFIX) {
                tracing::trace!("yt-dlp> {line}");
                continue;
            }
            match parse_progress_from_line(&line) {
                Some(signal) => {
                    if on_progress(signal).is_break() {
                        tracing::info!("cancelling download of {}", request.url);
                        let _ = child.kill().await;
                        return Err(JobError::Cancelled);
                    }
                }
                None => tracing::trace!("unparsed progress line: {line}"),
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(JobError::ToolFailed {
                tool: "yt-dlp".into(),
                code: status.code(),
                stderr: last_error_line(&stderr),
            });
        }

        if output_file.is_none() {
            tracing::debug!("yt-dlp did not report the output file for {}", request.url);
        }
        Ok(output_file)
    }
}

/// Full argument list for one download request.
pub fn download_args(request: &DownloadRequest) -> Vec<String> {
    let mut args: Vec<String> = selector_args(request.format)
        .iter()
        .map(|s| (*s).to_owned())
        .collect();

    args.extend(
        [
            "--no-playlist",
            "--encoding",
            "utf-8",
            "--newline",
            "--progress",
            "--progress-template",
            "download:PROGRESS|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes,progress.total_bytes_estimate)s",
            "-O",
            "after_move:FILE|%(filepath)s",
            "-o",
            "%(title)s.%(ext)s",
        ]
        .map(String::from),
    );
    args.push("-P".to_owned());
    args.push(path_arg(&request.destination));
    args.push("--".to_owned());
    args.push(request.url.clone());
    args
}

/// Format selection and post-processing flags for each selector.
pub fn selector_args(format: FormatSelector) -> &'static [&'static str] {
    match format {
        FormatSelector::Mp4FullHd => &[
            "-f",
            "bv*[height<=1080][vcodec!^=av01]+ba/b[height<=1080]",
            "-S",
            "res:1080,vcodec:h264,acodec:aac",
            "--merge-output-format",
            "mp4",
            "--remux-video",
            "mp4",
        ],
        FormatSelector::Mp4Uhd => &[
            "-f",
            "bv*[height<=2160][vcodec!^=av01]+ba/b[height<=2160]",
            "-S",
            "res:2160,vcodec:h264,acodec:aac",
            "--merge-output-format",
            "mp4",
            "--remux-video",
            "mp4",
        ],
        FormatSelector::Mp3 => &[
            "-f",
            "ba/b",
            "-x",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "0",
        ],
        FormatSelector::M4a => &["-f", "ba/b", "-x", "--audio-format", "m4a"],
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn spawn_error(err: std::io::Error) -> JobError {
    if err.kind() == std::io::ErrorKind::NotFound {
        JobError::ToolMissing {
            tool: "yt-dlp".into(),
        }
    } else {
        JobError::Io(err)
    }
}

/// Drains stderr so the child never blocks on a full pipe.
fn collect_errors<R>(stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = String::new();
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        while let Ok(Some(line)) = next_lossy_line(&mut reader, &mut buf).await {
            tracing::debug!("yt-dlp stderr> {line}");
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

/// Reads one line, replacing bytes that are not UTF-8. `None` at end of stream.
async fn next_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

/// The most useful line of yt-dlp's stderr for a user-facing message.
fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().to_owned())
        .unwrap_or_else(|| "yt-dlp exited with an error".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(format: FormatSelector) -> DownloadRequest {
        DownloadRequest {
            url: "https://example.com/video".into(),
            destination: PathBuf::from("/tmp/out"),
            format,
        }
    }

    #[test]
    fn mp3_extracts_audio_at_best_quality() {
        let args = download_args(&request(FormatSelector::Mp3));
        let joined = args.join(" ");
        assert!(joined.contains("-x --audio-format mp3 --audio-quality 0"));
        assert!(joined.contains("-f ba/b"));
    }

    #[test]
    fn video_formats_cap_height_and_merge_to_mp4() {
        let hd = download_args(&request(FormatSelector::Mp4FullHd)).join(" ");
        assert!(hd.contains("height<=1080"));
        assert!(hd.contains("--merge-output-format mp4"));
        let uhd = download_args(&request(FormatSelector::Mp4Uhd)).join(" ");
        assert!(uhd.contains("height<=2160"));
        assert!(uhd.contains("vcodec!^=av01"));
        assert!(uhd.contains("-S res:2160,vcodec:h264,acodec:aac"));
    }

    #[test]
    fn url_comes_last_after_separator() {
        let args = download_args(&request(FormatSelector::M4a));
        let n = args.len();
        assert_eq!(args[n - 2], "--");
        assert_eq!(args[n - 1], "https://example.com/video");
        assert!(args.windows(2).any(|w| w[0] == "-P" && w[1] == "/tmp/out"));
    }

    #[test]
    fn metadata_without_thumbnail_parses() {
        let info: MediaInfo = serde_json::from_str(r#"{"title":"Clip","id":"x"}"#).unwrap();
        assert_eq!(info.title.as_deref(), Some("Clip"));
        assert!(info.thumbnail.is_none());
    }

    #[test]
    fn picks_error_line_from_stderr() {
        let stderr = "WARNING: something\nERROR: [generic] Unsupported URL: x\n";
        assert_eq!(last_error_line(stderr), "ERROR: [generic] Unsupported URL: x");
        assert_eq!(last_error_line("boom\n"), "boom");
        assert_eq!(last_error_line(""), "yt-dlp exited with an error");
    }

    #[tokio::test]
    async fn configured_ffmpeg_that_is_missing_fails_the_job() {
        let backend = YtDlp::new(ToolPaths {
            yt_dlp: None,
            ffmpeg: Some(PathBuf::from("/definitely/not/here/ffmpeg")),
        });
        let mut noop = |_: ProgressSignal| ControlFlow::Continue(());
        let err = backend
            .download(&request(FormatSelector::Mp3), &mut noop)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn lines_with_invalid_utf8_are_decoded_lossily() {
        let mut input: &[u8] = b"PROGRESS|finished|1|1\r\nFILE|/out/\xcf\xf0.mp3\nlast";
        let mut buf = Vec::new();
        assert_eq!(
            next_lossy_line(&mut input, &mut buf).await.unwrap().as_deref(),
            Some("PROGRESS|finished|1|1")
        );
        assert_eq!(
            next_lossy_line(&mut input, &mut buf).await.unwrap().as_deref(),
            Some("FILE|/out/\u{fffd}\u{fffd}.mp3")
        );
        assert_eq!(
            next_lossy_line(&mut input, &mut buf).await.unwrap().as_deref(),
            Some("last")
        );
        assert_eq!(next_lossy_line(&mut input, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_executable_is_reported_as_tool_missing() {
        let backend = YtDlp::new(ToolPaths {
            yt_dlp: Some(PathBuf::from("/definitely/not/here/yt-dlp")),
            ffmpeg: None,
        });
        let mut noop = |_: ProgressSignal| ControlFlow::Continue(());
        let err = backend
            .download(&request(FormatSelector::Mp3), &mut noop)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ToolMissing { ref tool } if tool == "yt-dlp"));
        assert!(matches!(
            backend.resolve("https://example.com/video").await,
            Err(JobError::ToolMissing { .. })
        ));
    }

    /// Stand-in `yt-dlp` executable running `body` as a shell script.
    #[cfg(unix)]
    fn scripted(dir: &Path, body: &str) -> YtDlp {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        YtDlp::new(ToolPaths {
            yt_dlp: Some(path),
            ffmpeg: None,
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn download_routes_progress_and_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = scripted(
            dir.path(),
            "echo '[youtube] abc: Downloading webpage'\n\
             echo 'PROGRESS|downloading|512|1024'\n\
             echo 'PROGRESS|downloading|1024|NA'\n\
             echo 'PROGRESS|finished|1024|1024'\n\
             echo 'FILE|/tmp/out/Clip.mp3'\n\
             exit 0",
        );
        let mut seen = Vec::new();
        let mut record = |signal: ProgressSignal| {
            seen.push(signal);
            ControlFlow::Continue(())
        };
        let file = backend
            .download(&request(FormatSelector::Mp3), &mut record)
            .await
            .unwrap();

        assert_eq!(file, Some(PathBuf::from("/tmp/out/Clip.mp3")));
        assert_eq!(
            seen,
            vec![
                ProgressSignal::Downloading {
                    downloaded: Some(512.0),
                    total: Some(1024.0)
                },
                ProgressSignal::Downloading {
                    downloaded: Some(1024.0),
                    total: None
                },
                ProgressSignal::Finished,
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_file_line_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let backend = scripted(
            dir.path(),
            "echo 'PROGRESS|downloading|1|2'\n\
             printf 'FILE|/tmp/out/\\317\\360.mp3\\n'\n\
             printf 'WARNING: \\317\\360\\n' >&2\n\
             exit 0",
        );
        let mut noop = |_: ProgressSignal| ControlFlow::Continue(());
        let file = backend
            .download(&request(FormatSelector::Mp3), &mut noop)
            .await
            .unwrap()
            .unwrap();
        assert!(file.starts_with("/tmp/out"));
        assert!(file.to_string_lossy().ends_with("\u{fffd}\u{fffd}.mp3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_the_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let backend = scripted(
            dir.path(),
            "echo 'WARNING: falling back to generic' >&2\n\
             echo 'ERROR: [youtube] abc: Video unavailable' >&2\n\
             echo 'deleting partial files' >&2\n\
             exit 1",
        );
        let mut noop = |_: ProgressSignal| ControlFlow::Continue(());
        let err = backend
            .download(&request(FormatSelector::Mp4FullHd), &mut noop)
            .await
            .unwrap_err();
        match err {
            JobError::ToolFailed { tool, code, stderr } => {
                assert_eq!(tool, "yt-dlp");
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "ERROR: [youtube] abc: Video unavailable");
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn break_from_callback_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let backend = scripted(
            dir.path(),
            &format!(
                "echo $$ > '{}'\n\
                 while :; do\n  echo 'PROGRESS|downloading|1|100'\n  sleep 0.05\ndone",
                pid_file.display()
            ),
        );
        let mut calls = 0;
        let mut stop_second = |_: ProgressSignal| {
            calls += 1;
            if calls >= 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            backend.download(&request(FormatSelector::M4a), &mut stop_second),
        )
        .await
        .expect("download did not stop after Break");
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert_eq!(calls, 2);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .unwrap()
            .success();
        assert!(!alive, "yt-dlp process {} still running", pid.trim());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_parses_metadata_and_surfaces_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ok = scripted(
            dir.path(),
            r#"echo '{"title":"Clip","thumbnail":"https://i.example/x.jpg"}'"#,
        );
        let info = ok.resolve("https://example.com/video").await.unwrap();
        assert_eq!(info.title.as_deref(), Some("Clip"));
        assert_eq!(info.thumbnail.as_deref(), Some("https://i.example/x.jpg"));

        let failing_dir = tempfile::tempdir().unwrap();
        let failing = scripted(
            failing_dir.path(),
            "echo 'ERROR: Unsupported URL: https://example.com/video' >&2\nexit 1",
        );
        assert!(matches!(
            failing.resolve("https://example.com/video").await,
            Err(JobError::Resolution(m)) if m == "ERROR: Unsupported URL: https://example.com/video"
        ));
    }
}
