use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub mod ffmpeg;
pub mod youtube;

pub use ffmpeg::FfmpegAudio;
pub use youtube::YtDlpDownloader;

use crate::Result;

/// Video container extensions accepted as input
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm"];

/// Audio extensions accepted as input
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "flac", "ogg", "aac", "opus"];

/// Recognized video-host URL shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlShape {
    /// `youtube.com/watch?v=<id>`
    Watch,
    /// `youtu.be/<id>`
    Short,
    /// `youtube.com/embed/<id>`
    Embed,
    /// `youtube.com/shorts/<id>`
    Shorts,
}

/// A parsed video URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoUrl {
    pub shape: UrlShape,
    pub video_id: String,
    /// The input, normalized to an absolute https URL
    pub url: String,
}

/// Parse `input` as a video-host URL.
///
/// The scheme is optional. Every shape captures the id from one fixed place,
/// so there is no dependency on which pattern happened to match first.
pub fn parse_video_url(input: &str) -> Option<VideoUrl> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let absolute = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };

    let parsed = Url::parse(&absolute).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_lowercase();
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());

    let (shape, video_id) = match host.as_str() {
        "youtu.be" | "www.youtu.be" => (UrlShape::Short, segments.next()?.to_string()),
        "youtube.com" | "www.youtube.com" | "m.youtube.com" => match segments.next()? {
            "watch" => {
                let id = parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned())?;
                (UrlShape::Watch, id)
            }
            "embed" => (UrlShape::Embed, segments.next()?.to_string()),
            "shorts" => (UrlShape::Shorts, segments.next()?.to_string()),
            _ => return None,
        },
        _ => return None,
    };

    if !is_video_id(&video_id) {
        return None;
    }

    Some(VideoUrl {
        shape,
        video_id,
        url: parsed.to_string(),
    })
}

fn is_video_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// What the direct surface was asked to transcribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    LocalFile(PathBuf),
    RemoteUrl(VideoUrl),
}

impl Source {
    /// Treat the input as a video URL if it looks like one, otherwise as a path
    pub fn detect(input: &str) -> Self {
        match parse_video_url(input) {
            Some(url) => Source::RemoteUrl(url),
            None => Source::LocalFile(PathBuf::from(input)),
        }
    }
}

/// Check whether a path has one of the supported media extensions
pub fn is_supported_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str()) || AUDIO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Media fetched from a remote locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub title: String,
}

/// Resolves a remote locator to a local media file
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download into `target_dir`, reporting 0-100 through `on_progress`
    async fn download(
        &self,
        locator: &str,
        target_dir: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<DownloadedMedia>;
}

/// Audio normalization backend
#[async_trait]
pub trait AudioProcessor: Send + Sync {
    /// Convert `input` into mono 16kHz PCM inside `output_dir`
    async fn extract(&self, input: &Path, output_dir: &Path) -> Result<PathBuf>;

    /// Media duration in seconds, 0.0 if it cannot be determined
    async fn duration(&self, path: &Path) -> f64;
}
