use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::Config;
use crate::enhance::{self, TextEnhancer};
use crate::extractors::{AudioProcessor, Downloader, FfmpegAudio, Source, YtDlpDownloader};
use crate::jobs::{JobSettings, JobSource};
use crate::output::{self, RenderOptions};
use crate::progress::{PipelineKind, ProgressTracker, Stage};
use crate::utils::{output_stem, sanitize_filename};
use crate::{Result, TranscriberError};

pub mod engine;
pub mod orchestrator;

pub use engine::{SpeechEngine, SpeechOutput, SpeechRequest, WhisperCliEngine};
pub use orchestrator::{Artifact, JobOrchestrator};

/// Individual transcript segment with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds
    pub start: f64,

    /// End time in seconds
    pub end: f64,

    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// What one pipeline run produced, before anything is written
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub segments: Vec<Segment>,
    /// Plain text of the segments, or the enhanced text when enhancement ran
    pub text: String,
    pub enhanced: bool,
    pub language: String,
    pub duration_seconds: f64,
    /// File name for local sources, video title for downloads
    pub title: String,
}

impl Transcript {
    pub fn render_options(&self, include_timestamps: bool) -> RenderOptions<'_> {
        RenderOptions {
            include_timestamps,
            title: Some(&self.title),
            enhanced_text: self.enhanced.then_some(self.text.as_str()),
        }
    }
}

/// Result of the direct (non-job) surface
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOutcome {
    /// Primary output file
    pub output_path: PathBuf,
    /// Every written file, primary first
    pub outputs: Vec<PathBuf>,
    pub text: String,
    pub language: String,
    pub duration_seconds: f64,
    pub segments: Vec<Segment>,
}

/// Side information a run discovers before it finishes
pub trait RunObserver: Send + Sync {
    fn duration_known(&self, _seconds: f64) {}

    fn title_known(&self, _title: &str) {}
}

struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Main transcription pipeline.
///
/// Every run works inside its own scratch directory under `temp_root`, which
/// is removed when the run ends no matter how it ends.
pub struct TranscriptionPipeline {
    downloader: Arc<dyn Downloader>,
    audio: Arc<dyn AudioProcessor>,
    engine: Arc<dyn SpeechEngine>,
    enhancer: Arc<dyn TextEnhancer>,
    temp_root: PathBuf,
}

impl TranscriptionPipeline {
    /// Create a pipeline wired to the external tools named in the config
    pub fn new(config: &Config) -> Self {
        Self {
            downloader: Arc::new(YtDlpDownloader::new(config.tools.yt_dlp.clone())),
            audio: Arc::new(FfmpegAudio::new(config.tools.ffmpeg.clone(), config.tools.ffprobe.clone())),
            engine: Arc::new(WhisperCliEngine::new(
                config.whisper.binary.clone(),
                config.models_dir(),
                config.whisper.threads,
            )),
            enhancer: enhance::from_config(&config.enhancement),
            temp_root: config.temp_dir(),
        }
    }

    pub fn with_collaborators(
        downloader: Arc<dyn Downloader>,
        audio: Arc<dyn AudioProcessor>,
        engine: Arc<dyn SpeechEngine>,
        enhancer: Arc<dyn TextEnhancer>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            audio,
            engine,
            enhancer,
            temp_root: temp_root.into(),
        }
    }

    pub fn enhancement_available(&self) -> bool {
        self.enhancer.is_available()
    }

    /// Transcribe a file or video URL and write the requested outputs.
    ///
    /// `output_dir` defaults to the input's directory for local files and
    /// the working directory for URLs. A missing local file is reported
    /// before any work starts.
    pub async fn transcribe_source(
        &self,
        source: &Source,
        settings: &JobSettings,
        output_dir: Option<&Path>,
        on_progress: impl Fn(u8) + Send + Sync + 'static,
    ) -> Result<TranscriptionOutcome> {
        let (job_source, kind) = match source {
            Source::LocalFile(path) => {
                if !path.is_file() {
                    return Err(TranscriberError::SourceNotFound(path.display().to_string()));
                }
                let path = path.canonicalize()?;
                (JobSource::LocalFile { path, transient: false }, PipelineKind::LocalFile)
            }
            Source::RemoteUrl(video) => (JobSource::RemoteUrl { url: video.url.clone() }, PipelineKind::RemoteUrl),
        };

        let tracker = Arc::new(ProgressTracker::new(kind, move |update| on_progress(update.progress)));
        let transcript = self.run(&job_source, settings, tracker.clone(), &SilentObserver).await?;

        let (output_dir, stem) = match &job_source {
            JobSource::LocalFile { path, .. } => {
                let dir = match output_dir {
                    Some(dir) => dir.to_path_buf(),
                    None => path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
                };
                (dir, output_stem(path))
            }
            JobSource::RemoteUrl { .. } => {
                let dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
                let stem = match sanitize_filename(&transcript.title) {
                    s if s.trim().is_empty() => "transcript".to_string(),
                    s => s,
                };
                (dir, stem)
            }
        };

        let outputs = output::save_outputs(
            settings.output_kind,
            &transcript.segments,
            &output_dir,
            &stem,
            transcript.render_options(settings.include_timestamps),
        )
        .await?;
        tracker.update(Stage::Finalize, 100);

        let output_path = outputs
            .first()
            .cloned()
            .ok_or_else(|| TranscriberError::Validation("No output kind selected".to_string()))?;

        tracing::info!("Wrote {} output file(s), primary {}", outputs.len(), output_path.display());

        Ok(TranscriptionOutcome {
            output_path,
            outputs,
            text: transcript.text,
            language: transcript.language,
            duration_seconds: transcript.duration_seconds,
            segments: transcript.segments,
        })
    }

    /// Run download, extraction, recognition and enhancement for one source.
    ///
    /// Progress goes through `tracker`; the finalize stage is left open for
    /// the caller, who decides what "finished" means.
    pub async fn run(
        &self,
        source: &JobSource,
        settings: &JobSettings,
        tracker: Arc<ProgressTracker>,
        observer: &dyn RunObserver,
    ) -> Result<Transcript> {
        tokio::fs::create_dir_all(&self.temp_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.temp_root)?;

        let result = self.run_in(&scratch, source, settings, tracker, observer).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!("Failed to remove scratch directory {}: {}", scratch_path.display(), e);
        } else {
            tracing::debug!("Removed scratch directory {}", scratch_path.display());
        }

        result
    }

    async fn run_in(
        &self,
        scratch: &TempDir,
        source: &JobSource,
        settings: &JobSettings,
        tracker: Arc<ProgressTracker>,
        observer: &dyn RunObserver,
    ) -> Result<Transcript> {
        let (media_path, title) = match source {
            JobSource::LocalFile { path, .. } => {
                if !path.is_file() {
                    return Err(TranscriberError::SourceNotFound(path.display().to_string()));
                }
                let title = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                (path.clone(), title)
            }
            JobSource::RemoteUrl { url } => {
                tracing::info!("Downloading {}", url);
                tracker.update(Stage::Download, 0);
                let progress = tracker.clone();
                let media = self
                    .downloader
                    .download(url, scratch.path(), &move |p| progress.update(Stage::Download, p))
                    .await?;
                tracker.update(Stage::Download, 100);
                observer.title_known(&media.title);
                (media.path, media.title)
            }
        };

        tracing::info!("Extracting audio from {}", media_path.display());
        tracker.update(Stage::Extract, 0);
        let audio_path = self.audio.extract(&media_path, scratch.path()).await?;
        tracker.update(Stage::Extract, 100);

        let duration = self.audio.duration(&audio_path).await;
        observer.duration_known(duration);

        let speech = self.recognize(audio_path, settings, duration, tracker.clone()).await?;
        tracker.update(Stage::Transcribe, 100);

        let plain_text = output::to_plain_text(&speech.segments);
        let mut transcript = Transcript {
            segments: speech.segments,
            text: plain_text,
            enhanced: false,
            language: speech.language,
            duration_seconds: duration,
            title,
        };

        tracker.update(Stage::Finalize, 0);
        if settings.use_text_enhancement && !transcript.segments.is_empty() {
            self.enhance(&mut transcript).await;
        }

        Ok(transcript)
    }

    async fn recognize(
        &self,
        audio_path: PathBuf,
        settings: &JobSettings,
        duration: f64,
        tracker: Arc<ProgressTracker>,
    ) -> Result<SpeechOutput> {
        let request = SpeechRequest {
            audio_path,
            language: settings.language.code().map(str::to_string),
            model: settings.model.clone(),
        };

        tracing::info!(
            "Transcribing with {} (model {}, language {})",
            self.engine.name(),
            request.model,
            settings.language
        );
        tracker.update(Stage::Transcribe, 0);

        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            engine.transcribe(&request, &mut |segment| {
                tracker.update(Stage::Transcribe, segment_progress(segment.end, duration));
            })
        })
        .await
        .map_err(|e| TranscriberError::TranscriptionBackendFailure(format!("Transcription worker failed: {}", e)))?
    }

    /// Best-effort: on any failure the original text stays
    async fn enhance(&self, transcript: &mut Transcript) {
        if !self.enhancer.is_available() {
            tracing::warn!("Text enhancement requested but {} is not available", self.enhancer.name());
            return;
        }

        match self.enhancer.enhance(&transcript.text, &transcript.language).await {
            Ok(text) => {
                tracing::info!("Enhanced transcript with {}", self.enhancer.name());
                transcript.text = text;
                transcript.enhanced = true;
            }
            Err(e) => tracing::warn!("Text enhancement failed, keeping original text: {}", e),
        }
    }
}

/// Local 0-100 progress of recognition from a segment's end time
fn segment_progress(end: f64, duration: f64) -> u8 {
    if duration <= 0.0 || !end.is_finite() {
        return 0;
    }
    ((end / duration) * 100.0).clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::{DisabledEnhancer, MockTextEnhancer};
    use crate::extractors::DownloadedMedia;
    use crate::output::OutputKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeAudio;

    #[async_trait]
    impl AudioProcessor for FakeAudio {
        async fn extract(&self, input: &Path, output_dir: &Path) -> Result<PathBuf> {
            let out = output_dir.join("audio.16k.wav");
            tokio::fs::copy(input, &out).await?;
            Ok(out)
        }

        async fn duration(&self, _path: &Path) -> f64 {
            10.0
        }
    }

    struct FakeDownloader;

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(
            &self,
            _locator: &str,
            target_dir: &Path,
            on_progress: &(dyn Fn(u8) + Send + Sync),
        ) -> Result<DownloadedMedia> {
            on_progress(50);
            let path = target_dir.join("abc.m4a");
            tokio::fs::write(&path, b"audio").await?;
            Ok(DownloadedMedia { path, title: "Remote Talk".to_string() })
        }
    }

    struct FakeEngine;

    impl SpeechEngine for FakeEngine {
        fn transcribe(&self, _request: &SpeechRequest, on_segment: &mut dyn FnMut(&Segment)) -> Result<SpeechOutput> {
            let segments = vec![Segment::new(0.0, 5.0, "Hello there."), Segment::new(5.0, 10.0, "General Kenobi.")];
            segments.iter().for_each(|s| on_segment(s));
            Ok(SpeechOutput { segments, language: "en".to_string() })
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn pipeline(temp_root: &Path, enhancer: Arc<dyn TextEnhancer>) -> TranscriptionPipeline {
        TranscriptionPipeline::with_collaborators(
            Arc::new(FakeDownloader),
            Arc::new(FakeAudio),
            Arc::new(FakeEngine),
            enhancer,
            temp_root,
        )
    }

    #[test]
    fn test_segment_progress() {
        assert_eq!(segment_progress(5.0, 10.0), 50);
        assert_eq!(segment_progress(12.0, 10.0), 100);
        assert_eq!(segment_progress(5.0, 0.0), 0);
    }

    #[tokio::test]
    async fn test_local_file_writes_outputs_next_to_input() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = dir.path().join("temp");
        let input = dir.path().join("talk.mp4");
        fs_err::write(&input, b"video").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let settings = JobSettings { output_kind: OutputKind::Both, ..JobSettings::default() };

        let outcome = pipeline(&temp_root, Arc::new(DisabledEnhancer))
            .transcribe_source(&Source::LocalFile(input.clone()), &settings, None, move |p| {
                sink.lock().unwrap().push(p)
            })
            .await
            .unwrap();

        let dir_path = dir.path().canonicalize().unwrap();
        assert_eq!(outcome.output_path, dir_path.join("talk.md"));
        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(outcome.text, "Hello there. General Kenobi.");
        assert_eq!(outcome.language, "en");

        let markdown = fs_err::read_to_string(&outcome.output_path).unwrap();
        assert!(markdown.starts_with("# talk.mp4\n\nHello there."));

        let progress = seen.lock().unwrap().clone();
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));

        assert_eq!(fs_err::read_dir(&temp_root).unwrap().count(), 0, "scratch directory left behind");
    }

    #[tokio::test]
    async fn test_missing_local_file_fails_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let result = pipeline(&dir.path().join("temp"), Arc::new(DisabledEnhancer))
            .transcribe_source(
                &Source::LocalFile(dir.path().join("missing.mp4")),
                &JobSettings::default(),
                None,
                |_| {},
            )
            .await;

        assert!(matches!(result, Err(TranscriberError::SourceNotFound(_))));
        assert!(!dir.path().join("temp").exists());
    }

    #[tokio::test]
    async fn test_remote_source_uses_video_title() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let source = Source::detect("https://youtu.be/abc");

        let outcome = pipeline(&dir.path().join("temp"), Arc::new(DisabledEnhancer))
            .transcribe_source(&source, &JobSettings::default(), Some(&out), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.output_path, out.join("Remote Talk.md"));
        assert!(fs_err::read_to_string(&outcome.output_path).unwrap().starts_with("# Remote Talk\n\n"));
    }

    #[tokio::test]
    async fn test_enhancement_failure_keeps_original_text() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("talk.wav");
        fs_err::write(&input, b"audio").unwrap();

        let mut enhancer = MockTextEnhancer::new();
        enhancer.expect_is_available().return_const(true);
        enhancer.expect_name().return_const("mock");
        enhancer
            .expect_enhance()
            .times(1)
            .returning(|_, _| Err(TranscriberError::Enhancement("rate limited".to_string())));

        let settings = JobSettings { use_text_enhancement: true, ..JobSettings::default() };
        let outcome = pipeline(&dir.path().join("temp"), Arc::new(enhancer))
            .transcribe_source(&Source::LocalFile(input), &settings, None, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.text, "Hello there. General Kenobi.");
    }

    #[tokio::test]
    async fn test_enhanced_text_replaces_markdown_body() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("talk.wav");
        fs_err::write(&input, b"audio").unwrap();

        let mut enhancer = MockTextEnhancer::new();
        enhancer.expect_is_available().return_const(true);
        enhancer.expect_name().return_const("mock");
        enhancer
            .expect_enhance()
            .times(1)
            .returning(|text: &str, language: &str| {
                assert_eq!(text, "Hello there. General Kenobi.");
                assert_eq!(language, "en");
                Ok("Hello there!\n\nGeneral Kenobi!".to_string())
            });

        let settings = JobSettings { use_text_enhancement: true, ..JobSettings::default() };
        let outcome = pipeline(&dir.path().join("temp"), Arc::new(enhancer))
            .transcribe_source(&Source::LocalFile(input), &settings, None, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.text, "Hello there!\n\nGeneral Kenobi!");
        let markdown = fs_err::read_to_string(&outcome.output_path).unwrap();
        assert_eq!(markdown, "# talk.wav\n\nHello there!\n\nGeneral Kenobi!");
    }
}
