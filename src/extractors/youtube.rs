use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{parse_video_url, DownloadedMedia, Downloader};
use crate::utils::sanitize_filename;
use crate::{Result, TranscriberError};

const PROGRESS_PREFIX: &str = "[progress]";
const PATH_PREFIX: &str = "path:";
const TITLE_PREFIX: &str = "title:";

/// YouTube downloader using yt-dlp
pub struct YtDlpDownloader {
    yt_dlp_path: String,
}

impl YtDlpDownloader {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[derive(Debug, Default)]
struct DownloadReport {
    path: Option<PathBuf>,
    title: Option<String>,
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(
        &self,
        locator: &str,
        target_dir: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<DownloadedMedia> {
        let video = parse_video_url(locator)
            .ok_or_else(|| TranscriberError::InvalidSource(format!("Invalid YouTube URL: {}", locator)))?;

        tracing::info!("Downloading {} via yt-dlp", video.video_id);
        let template = target_dir.join(format!("{}.%(ext)s", video.video_id));

        let mut child = Command::new(&self.yt_dlp_path)
            .args([
                "--format", "bestaudio[ext=m4a]/bestaudio/best",
                "--no-playlist",
                "--newline",
                "--progress",
                "--quiet",
                "--no-warnings",
                "--no-simulate",
                "--progress-template", "download:[progress] %(progress._percent_str)s",
                "--print", "after_move:path:%(filepath)s",
                "--print", "after_move:title:%(title)s",
                "--output",
            ])
            .arg(&template)
            .arg(&video.url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscriberError::ExternalToolFailure(format!(
                    "{} is not installed or not in PATH",
                    self.yt_dlp_path
                )),
                _ => TranscriberError::ExternalToolFailure(format!("Failed to run yt-dlp: {}", e)),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscriberError::ExternalToolFailure("yt-dlp stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscriberError::ExternalToolFailure("yt-dlp stderr unavailable".into()))?;

        let read_stdout = async {
            let mut report = DownloadReport::default();
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            while let Some(line) = next_lossy_line(&mut reader, &mut buf).await {
                apply_line(&line, &mut report, on_progress);
            }
            report
        };

        let read_stderr = async {
            let mut collected = Vec::new();
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Some(line) = next_lossy_line(&mut reader, &mut buf).await {
                match parse_progress(&line) {
                    Some(percent) => on_progress(percent),
                    None => collected.push(line),
                }
            }
            collected
        };

        let (report, errors) = tokio::join!(read_stdout, read_stderr);
        let status = child.wait().await?;

        if !status.success() {
            return Err(TranscriberError::ExternalToolFailure(format!(
                "yt-dlp failed: {}",
                errors.join("\n").trim()
            )));
        }

        let path = match report.path.filter(|path| path.exists()) {
            Some(path) => path,
            None => find_download(target_dir, &video.video_id)?.ok_or_else(|| {
                TranscriberError::ExternalToolFailure(format!(
                    "Downloaded file not found for video: {}",
                    video.video_id
                ))
            })?,
        };

        on_progress(100);
        let title = report.title.unwrap_or_else(|| video.video_id.clone());

        Ok(DownloadedMedia {
            path,
            title: sanitize_filename(&title),
        })
    }
}

/// Next line with invalid UTF-8 replaced, `None` at EOF.
///
/// Titles and error messages are not guaranteed to be valid UTF-8 and must
/// not end the read early.
async fn next_lossy_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> Option<String> {
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf);
            Some(line.trim_end_matches(['\n', '\r']).to_string())
        }
        Err(e) => {
            tracing::warn!("Stopped reading yt-dlp output: {}", e);
            None
        }
    }
}

fn apply_line(line: &str, report: &mut DownloadReport, on_progress: &(dyn Fn(u8) + Send + Sync)) {
    if let Some(percent) = parse_progress(line) {
        on_progress(percent);
    } else if let Some(path) = line.strip_prefix(PATH_PREFIX) {
        report.path = Some(PathBuf::from(path.trim()));
    } else if let Some(title) = line.strip_prefix(TITLE_PREFIX) {
        report.title = Some(title.trim().to_string()).filter(|t| !t.is_empty());
    }
}

/// `[progress]  42.3%` -> 42
fn parse_progress(line: &str) -> Option<u8> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let percent: f64 = rest.trim().trim_end_matches('%').trim().parse().ok()?;
    if !percent.is_finite() {
        return None;
    }
    Some(percent.clamp(0.0, 100.0) as u8)
}

/// Locate `<video_id>.<ext>` in the target directory, ignoring partial downloads
fn find_download(dir: &Path, video_id: &str) -> Result<Option<PathBuf>> {
    for entry in fs_err::read_dir(dir)? {
        let path = entry?.path();
        let matches_id = path.file_stem().and_then(|s| s.to_str()) == Some(video_id);
        let partial = path.extension().and_then(|e| e.to_str()) == Some("part");
        if matches_id && !partial && path.is_file() {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
