use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{is_supported_media, AudioProcessor};
use crate::{Result, TranscriberError};

/// Audio normalization through ffmpeg/ffprobe
pub struct FfmpegAudio {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegAudio {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Check if ffmpeg is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for FfmpegAudio {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

/// `<stem>.16k.wav` next to the other run artifacts
fn normalized_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    output_dir.join(format!("{}.16k.wav", stem))
}

#[async_trait]
impl AudioProcessor for FfmpegAudio {
    async fn extract(&self, input: &Path, output_dir: &Path) -> Result<PathBuf> {
        if !input.exists() {
            return Err(TranscriberError::SourceNotFound(input.display().to_string()));
        }

        if !is_supported_media(input) {
            let ext = input
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(TranscriberError::UnsupportedFormat(format!(".{}", ext)));
        }

        let output_path = normalized_path(input, output_dir);
        tracing::debug!("Extracting audio: {} -> {}", input.display(), output_path.display());

        let output = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(input)
            .args([
                "-vn",
                "-acodec", "pcm_s16le",
                "-ar", "16000",
                "-ac", "1",
                "-y",
            ])
            .arg(&output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscriberError::ExternalToolFailure(format!(
                    "{} is not installed or not in PATH",
                    self.ffmpeg_path
                )),
                _ => TranscriberError::ExternalToolFailure(format!("Failed to run ffmpeg: {}", e)),
            })?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriberError::ExternalToolFailure(format!(
                "ffmpeg failed: {}",
                error.trim()
            )));
        }

        Ok(output_path)
    }

    async fn duration(&self, path: &Path) -> f64 {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v", "error",
                "-show_entries", "format=duration",
                "-of", "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                parse_duration(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::debug!("ffprobe exited with {} for {}", output.status, path.display());
                0.0
            }
            Err(e) => {
                tracing::debug!("ffprobe could not run: {}", e);
                0.0
            }
        }
    }
}

/// Parse ffprobe's bare duration output, 0.0 for anything unusable
fn parse_duration(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("123.456\n"), 123.456);
        assert_eq!(parse_duration("N/A"), 0.0);
        assert_eq!(parse_duration(""), 0.0);
        assert_eq!(parse_duration("-3"), 0.0);
    }

    #[test]
    fn test_normalized_path() {
        assert_eq!(
            normalized_path(Path::new("/videos/talk.mp4"), Path::new("/tmp/run")),
            PathBuf::from("/tmp/run/talk.16k.wav")
        );
    }

    #[tokio::test]
    async fn test_extract_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FfmpegAudio::default()
            .extract(&dir.path().join("missing.mp4"), dir.path())
            .await;
        assert!(matches!(result, Err(TranscriberError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_extract_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        fs_err::write(&input, "not media").unwrap();

        let result = FfmpegAudio::default().extract(&input, dir.path()).await;
        assert!(matches!(result, Err(TranscriberError::UnsupportedFormat(ext)) if ext == ".txt"));
    }

    #[tokio::test]
    async fn test_duration_of_missing_tool_is_zero() {
        let audio = FfmpegAudio::new("ffmpeg", "definitely-not-ffprobe-binary");
        assert_eq!(audio.duration(Path::new("/nonexistent.wav")).await, 0.0);
    }
}
