use std::path::Path;

use crate::config::Config;

/// Longest file name produced by [`sanitize_filename`], in characters
pub const MAX_FILENAME_CHARS: usize = 200;

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitize filename for safe filesystem usage.
///
/// Drops characters that are invalid on common filesystems and caps the
/// result at [`MAX_FILENAME_CHARS`] characters.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c))
        .take(MAX_FILENAME_CHARS)
        .collect()
}

/// File stem to use for outputs derived from `path`
pub fn output_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match sanitize_filename(&stem) {
        s if s.trim().is_empty() => "transcript".to_string(),
        s => s,
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Check if the current environment has required tools
pub async fn check_dependencies(config: &Config) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(&config.tools.ffmpeg, "-version").await {
        missing.push(format!("{} - required for audio extraction", config.tools.ffmpeg));
    }

    if !check_command_available(&config.whisper.binary, "--help").await {
        missing.push(format!("{} - required for transcription", config.whisper.binary));
    }

    if !check_command_available(&config.tools.yt_dlp, "--version").await {
        missing.push(format!("{} - required for YouTube downloads", config.tools.yt_dlp));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, probe_arg: &str) -> bool {
    use std::process::Stdio;
    use tokio::process::Command;

    Command::new(command)
        .arg(probe_arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
