//! Stand-ins for the external tools, shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use video_transcriber::enhance::DisabledEnhancer;
use video_transcriber::extractors::{AudioProcessor, DownloadedMedia, Downloader};
use video_transcriber::jobs::JobId;
use video_transcriber::progress::ProgressSnapshot;
use video_transcriber::transcribe::{SpeechEngine, SpeechOutput, SpeechRequest};
use video_transcriber::{
    JobOrchestrator, JobRegistry, ProgressChannel, Segment, TranscriberError, TranscriptionPipeline,
};

pub struct FakeDownloader;

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(
        &self,
        _locator: &str,
        target_dir: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> video_transcriber::Result<DownloadedMedia> {
        for p in [25, 50, 75] {
            on_progress(p);
        }
        let path = target_dir.join("dQw4w9WgXcQ.m4a");
        tokio::fs::write(&path, b"audio").await?;
        Ok(DownloadedMedia { path, title: "Remote Talk".to_string() })
    }
}

/// Leaves a partial file behind and fails halfway through
pub struct FailingDownloader;

#[async_trait]
impl Downloader for FailingDownloader {
    async fn download(
        &self,
        _locator: &str,
        target_dir: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> video_transcriber::Result<DownloadedMedia> {
        on_progress(40);
        tokio::fs::write(target_dir.join("dQw4w9WgXcQ.m4a.part"), b"aud").await?;
        Err(TranscriberError::ExternalToolFailure("yt-dlp failed: HTTP Error 403".to_string()))
    }
}

pub struct FailingAudio;

#[async_trait]
impl AudioProcessor for FailingAudio {
    async fn extract(&self, _input: &Path, output_dir: &Path) -> video_transcriber::Result<PathBuf> {
        tokio::fs::write(output_dir.join("audio.16k.wav"), b"half").await?;
        Err(TranscriberError::ExternalToolFailure("ffmpeg failed: Invalid data found".to_string()))
    }

    async fn duration(&self, _path: &Path) -> f64 {
        0.0
    }
}

pub struct FakeAudio;

#[async_trait]
impl AudioProcessor for FakeAudio {
    async fn extract(&self, input: &Path, output_dir: &Path) -> video_transcriber::Result<PathBuf> {
        let out = output_dir.join("audio.16k.wav");
        tokio::fs::copy(input, &out).await?;
        Ok(out)
    }

    async fn duration(&self, _path: &Path) -> f64 {
        8.0
    }
}

/// Speech engine returning fixed segments, or failing when `fail` is set
pub struct FakeEngine {
    pub fail: bool,
}

impl SpeechEngine for FakeEngine {
    fn transcribe(
        &self,
        _request: &SpeechRequest,
        on_segment: &mut dyn FnMut(&Segment),
    ) -> video_transcriber::Result<SpeechOutput> {
        if self.fail {
            return Err(TranscriberError::TranscriptionBackendFailure("model crashed".to_string()));
        }

        let segments = vec![
            Segment::new(0.0, 2.5, "Hello, this is a test."),
            Segment::new(2.5, 5.0, "This is the second segment."),
            Segment::new(5.0, 8.0, "And this is the third one!"),
        ];
        for segment in &segments {
            on_segment(segment);
        }
        Ok(SpeechOutput { segments, language: "en".to_string() })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub fn pipeline(temp_root: &Path, failing_engine: bool) -> TranscriptionPipeline {
    TranscriptionPipeline::with_collaborators(
        Arc::new(FakeDownloader),
        Arc::new(FakeAudio),
        Arc::new(FakeEngine { fail: failing_engine }),
        Arc::new(DisabledEnhancer),
        temp_root,
    )
}

pub fn orchestrator(temp_root: &Path, failing_engine: bool, max_concurrent_jobs: usize) -> Arc<JobOrchestrator> {
    orchestrator_with(pipeline(temp_root, failing_engine), max_concurrent_jobs)
}

pub fn orchestrator_with(pipeline: TranscriptionPipeline, max_concurrent_jobs: usize) -> Arc<JobOrchestrator> {
    Arc::new(JobOrchestrator::new(
        Arc::new(pipeline),
        Arc::new(JobRegistry::in_memory()),
        Arc::new(ProgressChannel::new(std::time::Duration::from_millis(20))),
        max_concurrent_jobs,
    ))
}

/// Collect every snapshot until the job reaches a terminal status
pub async fn follow(orchestrator: &JobOrchestrator, id: &JobId) -> Vec<ProgressSnapshot> {
    let mut subscription = orchestrator.subscribe(id).expect("job exists");
    let mut snapshots = Vec::new();

    let collect = async {
        while let Some(snapshot) = subscription.next().await {
            snapshots.push(snapshot);
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(10), collect)
        .await
        .expect("job did not finish in time");

    snapshots
}
