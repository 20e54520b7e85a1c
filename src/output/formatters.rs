//! Segment-to-document renderers: markdown, SRT subtitles and plain text.

use crate::transcribe::Segment;

/// Sentence endings that close a markdown paragraph.
const PARAGRAPH_ENDINGS: [&str; 5] = [".", "!", "?", "...", "。"];

/// Format seconds as `MM:SS`, or `HH:MM:SS` from one hour on. Truncates.
pub fn format_time_short(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Format seconds as an SRT timestamp `HH:MM:SS,mmm`. Milliseconds are truncated.
pub fn format_time_subtitle(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    let millis = ((seconds.fract() * 1000.0) as u64).min(999);

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render segments as markdown.
///
/// With timestamps every segment gets its own `**[MM:SS]**` line. Without them
/// consecutive segments are joined into paragraphs that close on sentence
/// endings. An empty segment list renders as an empty string, title included.
pub fn to_markdown(segments: &[Segment], include_timestamps: bool, title: Option<&str>) -> String {
    if segments.is_empty() {
        return String::new();
    }

    let mut lines: Vec<String> = Vec::new();

    if let Some(title) = title {
        lines.push(format!("# {}", title));
        lines.push(String::new());
    }

    if include_timestamps {
        for segment in segments {
            lines.push(format!("**[{}]** {}", format_time_short(segment.start), segment.text));
            lines.push(String::new());
        }
    } else {
        let mut paragraph: Vec<&str> = Vec::new();

        for segment in segments {
            paragraph.push(&segment.text);

            let trimmed = segment.text.trim_end();
            if PARAGRAPH_ENDINGS.iter().any(|ending| trimmed.ends_with(ending)) {
                lines.push(paragraph.join(" "));
                lines.push(String::new());
                paragraph.clear();
            }
        }

        if !paragraph.is_empty() {
            lines.push(paragraph.join(" "));
            lines.push(String::new());
        }
    }

    lines.join("\n").trim().to_string()
}

/// Render segments as SRT cues.
pub fn to_subtitles(segments: &[Segment]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(segments.len() * 4);

    for (index, segment) in segments.iter().enumerate() {
        lines.push((index + 1).to_string());
        lines.push(format!(
            "{} --> {}",
            format_time_subtitle(segment.start),
            format_time_subtitle(segment.end)
        ));
        lines.push(segment.text.clone());
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Join segment texts with single spaces.
pub fn to_plain_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| segment.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
