use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::transcribe::Segment;
use crate::{Result, TranscriberError};

pub mod formatters;

pub use formatters::*;

/// Which documents a job writes when it finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Markdown,
    Subtitles,
    Both,
}

impl OutputKind {
    /// Artifacts to render, primary first
    pub fn artifacts(&self) -> &'static [ArtifactKind] {
        match self {
            OutputKind::Markdown => &[ArtifactKind::Markdown],
            OutputKind::Subtitles => &[ArtifactKind::Subtitles],
            OutputKind::Both => &[ArtifactKind::Markdown, ArtifactKind::Subtitles],
        }
    }
}

impl FromStr for OutputKind {
    type Err = TranscriberError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "md" | "markdown" => Ok(OutputKind::Markdown),
            "srt" | "subtitles" => Ok(OutputKind::Subtitles),
            "both" => Ok(OutputKind::Both),
            other => Err(TranscriberError::Validation(format!("Unknown output kind: {}", other))),
        }
    }
}

/// A single rendered document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Markdown,
    Subtitles,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Markdown => "md",
            ArtifactKind::Subtitles => "srt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Markdown => "text/markdown; charset=utf-8",
            ArtifactKind::Subtitles => "application/x-subrip; charset=utf-8",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = TranscriberError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "md" | "markdown" => Ok(ArtifactKind::Markdown),
            "srt" | "subtitles" => Ok(ArtifactKind::Subtitles),
            other => Err(TranscriberError::Validation(format!("Unknown artifact format: {}", other))),
        }
    }
}

/// Everything a renderer needs to produce one artifact
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions<'a> {
    pub include_timestamps: bool,
    pub title: Option<&'a str>,
    /// Text returned by the enhancement pass; replaces the markdown body
    pub enhanced_text: Option<&'a str>,
}

/// Render one artifact from a segment list
pub fn render(kind: ArtifactKind, segments: &[Segment], options: RenderOptions<'_>) -> String {
    match kind {
        ArtifactKind::Markdown => match options.enhanced_text {
            Some(text) if !segments.is_empty() => {
                // one block, stamped with where speech starts
                let start = segments[0].start;
                let body = [Segment::new(start, start, text)];
                to_markdown(&body, options.include_timestamps, options.title)
            }
            _ => to_markdown(segments, options.include_timestamps, options.title),
        },
        ArtifactKind::Subtitles => to_subtitles(segments),
    }
}

/// Render and write every artifact of `kind` as `<dir>/<stem>.<ext>`.
///
/// Returns the written paths, primary artifact first.
pub async fn save_outputs(
    kind: OutputKind,
    segments: &[Segment],
    output_dir: &Path,
    stem: &str,
    options: RenderOptions<'_>,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(output_dir).await?;

    let mut written = Vec::with_capacity(kind.artifacts().len());
    for artifact in kind.artifacts() {
        let path = output_dir.join(format!("{}.{}", stem, artifact.extension()));
        let content = render(*artifact, segments, options);

        tracing::debug!("Writing {:?} output to {}", artifact, path.display());
        tokio::fs::write(&path, content).await?;
        written.push(path);
    }

    Ok(written)
}
