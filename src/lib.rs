//! Video Transcriber - transcribe local videos and YouTube links with Whisper
//!
//! The library drives a transcription job through download, audio extraction,
//! speech recognition and rendering, either inline for the CLI or as background
//! jobs behind the HTTP server, and reports progress on a single 0-100 scale.

pub mod cli;
pub mod config;
pub mod enhance;
pub mod extractors;
pub mod jobs;
pub mod output;
pub mod progress;
pub mod server;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use extractors::{parse_video_url, Source, VideoUrl};
pub use jobs::{Job, JobId, JobRegistry, JobSettings, JobStatus};
pub use output::{ArtifactKind, OutputKind};
pub use progress::{ProgressChannel, ProgressSnapshot, Stage, StageBand};
pub use transcribe::{JobOrchestrator, Segment, TranscriptionOutcome, TranscriptionPipeline};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, TranscriberError>;

/// Error types specific to the transcriber
#[derive(thiserror::Error, Debug)]
pub enum TranscriberError {
    #[error("File not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("External tool failed: {0}")]
    ExternalToolFailure(String),

    #[error("Transcription failed: {0}")]
    TranscriptionBackendFailure(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Text enhancement failed: {0}")]
    Enhancement(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
