//! Transcription jobs: identity, settings, lifecycle state and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::output::OutputKind;
use crate::progress::{ProgressSnapshot, Stage};
use crate::transcribe::Segment;
use crate::{Result, TranscriberError};

pub mod registry;

pub use registry::JobRegistry;

/// Whisper model used when a request does not name one
pub const DEFAULT_MODEL: &str = "medium";

/// Opaque job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spoken language: detected by the engine or fixed by the caller
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Auto,
    Code(String),
}

impl Language {
    /// The explicit code, `None` for auto-detection
    pub fn code(&self) -> Option<&str> {
        match self {
            Language::Auto => None,
            Language::Code(code) => Some(code),
        }
    }
}

impl From<&str> for Language {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            Language::Auto
        } else {
            Language::Code(value.to_lowercase())
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code().unwrap_or("auto"))
    }
}

impl Serialize for Language {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code().unwrap_or("auto"))
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Language::from(value.as_str()))
    }
}

/// Per-job settings, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub language: Language,
    pub model: String,
    pub include_timestamps: bool,
    pub output_kind: OutputKind,
    pub use_text_enhancement: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            language: Language::Auto,
            model: DEFAULT_MODEL.to_string(),
            include_timestamps: false,
            output_kind: OutputKind::Markdown,
            use_text_enhancement: false,
        }
    }
}

/// Where a job's media comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSource {
    LocalFile {
        path: PathBuf,
        /// Uploaded into the data directory; removed once the job ends
        #[serde(default)]
        transient: bool,
    },
    RemoteUrl {
        url: String,
    },
}

impl JobSource {
    /// Build a source from a submission's optional file and URL fields.
    ///
    /// A file wins over a URL. Neither is a validation error.
    pub fn from_submission(file_path: Option<PathBuf>, url: Option<String>) -> Result<Self> {
        let url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        let file_path = file_path.filter(|p| !p.as_os_str().is_empty());

        match (file_path, url) {
            (Some(path), _) => Ok(JobSource::LocalFile { path, transient: false }),
            (None, Some(url)) => Ok(JobSource::RemoteUrl { url }),
            (None, None) => Err(TranscriberError::Validation(
                "Either a file or a url is required".to_string(),
            )),
        }
    }

    /// Name shown for the job until a better title is known
    pub fn default_display_name(&self) -> String {
        match self {
            JobSource::LocalFile { path, .. } => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            JobSource::RemoteUrl { url } => url.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobSource::LocalFile { .. } => "file",
            JobSource::RemoteUrl { .. } => "youtube",
        }
    }
}

/// Output of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Final text, enhanced when the enhancement pass succeeded
    pub text: String,
    pub segments: Vec<Segment>,
    pub detected_language: String,
    #[serde(default)]
    pub enhanced: bool,
}

/// One transcription job.
///
/// Status, progress, result and error only change through the transition
/// methods, which keep `result` and `error` exclusive and terminal states final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    created_at: DateTime<Utc>,
    source: JobSource,
    display_name: String,
    settings: JobSettings,
    status: JobStatus,
    progress: u8,
    duration_seconds: u64,
    result: Option<JobResult>,
    error: Option<String>,
}

impl Job {
    pub fn new(source: JobSource, display_name: Option<String>, settings: JobSettings) -> Self {
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| source.default_display_name());

        Self {
            id: JobId::new(),
            created_at: Utc::now(),
            source,
            display_name,
            settings,
            status: JobStatus::Pending,
            progress: 0,
            duration_seconds: 0,
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn source(&self) -> &JobSource {
        &self.source
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending -> Processing
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)
    }

    /// Raise progress. Ignored once terminal or when not an increase.
    pub fn advance(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.is_terminal() || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    /// Record the media duration. Only the first known value is kept.
    pub fn set_duration(&mut self, seconds: f64) {
        if self.duration_seconds == 0 && seconds.is_finite() && seconds > 0.0 {
            self.duration_seconds = seconds as u64;
        }
    }

    /// Replace the display name, e.g. with a downloaded video's title
    pub fn rename(&mut self, display_name: impl Into<String>) {
        let display_name = display_name.into();
        if !self.is_terminal() && !display_name.trim().is_empty() {
            self.display_name = display_name;
        }
    }

    /// Processing -> Completed, progress pinned at 100
    pub fn complete(&mut self, result: JobResult) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.result = Some(result);
        Ok(())
    }

    /// Pending/Processing -> Failed, progress left where it was
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Failed)
        );

        if !allowed {
            return Err(TranscriberError::InvalidTransition { from: self.status, to });
        }

        tracing::debug!("Job {} {} -> {}", self.id, self.status, to);
        self.status = to;
        Ok(())
    }

    pub fn snapshot(&self, stage: Option<Stage>) -> ProgressSnapshot {
        ProgressSnapshot {
            progress: self.progress,
            status: self.status,
            stage: stage.filter(|_| !self.is_terminal()),
            error: self.error.clone(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            source_name: self.display_name.clone(),
            source_type: self.source.kind().to_string(),
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Listing row for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub source_name: String,
    pub source_type: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: u64,
}
