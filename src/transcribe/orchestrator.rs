//! Background job execution for the server.
//!
//! A submission creates a pending job and returns at once; the run happens on
//! a spawned task that turns every error into a failed job.

use std::sync::Arc;
use tokio::sync::Semaphore;

use super::{RunObserver, TranscriptionPipeline};
use crate::jobs::{Job, JobId, JobRegistry, JobResult, JobSettings, JobSource, JobSummary};
use crate::output::{self, ArtifactKind, RenderOptions};
use crate::progress::{PipelineKind, ProgressChannel, ProgressSubscription, ProgressTracker, Stage};
use crate::utils::sanitize_filename;
use crate::{Result, TranscriberError};

/// A rendered document ready to be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
}

pub struct JobOrchestrator {
    pipeline: Arc<TranscriptionPipeline>,
    registry: Arc<JobRegistry>,
    channel: Arc<ProgressChannel>,
    permits: Arc<Semaphore>,
}

impl JobOrchestrator {
    pub fn new(
        pipeline: Arc<TranscriptionPipeline>,
        registry: Arc<JobRegistry>,
        channel: Arc<ProgressChannel>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            pipeline,
            registry,
            channel,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Create a pending job and start it in the background
    pub fn submit(self: &Arc<Self>, source: JobSource, display_name: Option<String>, settings: JobSettings) -> Job {
        let job = self.registry.create(source, display_name, settings);
        self.channel.open(job.id(), job.snapshot(None));

        let orchestrator = Arc::clone(self);
        let submitted = job.clone();
        tokio::spawn(async move {
            orchestrator.run(submitted).await;
        });

        job
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.registry.get(id)
    }

    pub fn list(&self, limit: usize) -> Vec<JobSummary> {
        self.registry.list(limit)
    }

    /// Follow a job's progress. `None` for unknown or deleted ids.
    pub fn subscribe(&self, id: &JobId) -> Option<ProgressSubscription> {
        let job = self.registry.get(id)?;

        let subscription = match self.channel.subscribe(id) {
            Some(subscription) => subscription,
            None => {
                // reloaded from disk, nothing ever published in this process
                self.channel.open(id, job.snapshot(None));
                self.channel.subscribe(id)?
            }
        };

        // a delete may have run since the lookup; its slot removal must win
        if self.registry.get(id).is_none() {
            self.channel.remove(id);
            return None;
        }

        Some(subscription)
    }

    /// Remove a job record. A job still running finishes in the background
    /// but its updates are dropped.
    pub fn delete(&self, id: &JobId) -> bool {
        // registry first: a subscriber that still sees the job opened its slot
        // before this removal
        let removed = self.registry.delete(id);
        self.channel.remove(id);
        if removed {
            tracing::info!("Deleted job {}", id);
        }
        removed
    }

    /// Render one artifact of a completed job
    pub fn render_artifact(&self, id: &JobId, kind: ArtifactKind) -> Result<Artifact> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| TranscriberError::NotFound(format!("Transcription {} not found", id)))?;

        let result = job.result().ok_or_else(|| {
            TranscriberError::PreconditionFailed(format!("Transcription {} is {}, not completed", id, job.status()))
        })?;

        let options = RenderOptions {
            include_timestamps: job.settings().include_timestamps,
            title: Some(job.display_name()),
            enhanced_text: result.enhanced.then_some(result.text.as_str()),
        };

        let stem = match sanitize_filename(job.display_name()) {
            s if s.trim().is_empty() => "transcript".to_string(),
            s => s,
        };

        Ok(Artifact {
            filename: format!("{}.{}", stem, kind.extension()),
            content_type: kind.content_type(),
            body: output::render(kind, &result.segments, options),
        })
    }

    async fn run(&self, job: Job) {
        let id = job.id().clone();

        let outcome = match self.permits.acquire().await {
            Ok(_permit) if self.registry.get(&id).is_some() => Some(self.execute(&job).await),
            Ok(_) => {
                tracing::debug!("Job {} was deleted before it started", id);
                None
            }
            Err(e) => Some(Err(TranscriberError::PreconditionFailed(format!("Job slots unavailable: {}", e)))),
        };

        // the upload is gone before anyone can observe the terminal status
        if let JobSource::LocalFile { path, transient: true } = job.source() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!("Removed upload {}", path.display()),
                Err(e) => tracing::warn!("Failed to remove upload {}: {}", path.display(), e),
            }
        }

        let Some(outcome) = outcome else {
            return;
        };

        let snapshot = self.registry.update(&id, |record| {
            let transition = match outcome {
                Ok(result) => record.complete(result),
                Err(e) => {
                    tracing::error!("Job {} failed: {}", id, e);
                    record.fail(e.to_string())
                }
            };
            if let Err(e) = transition {
                tracing::warn!("Job {} could not be finalized: {}", id, e);
            }
            record.snapshot(None)
        });

        match snapshot {
            Some(snapshot) => {
                tracing::info!("Job {} finished as {}", id, snapshot.status);
                self.channel.publish(&id, snapshot);
            }
            None => tracing::debug!("Job {} was deleted while running", id),
        }
    }

    async fn execute(&self, job: &Job) -> Result<JobResult> {
        let id = job.id().clone();

        let started = self.registry.update(&id, |record| record.start().map(|_| record.snapshot(None)));
        match started {
            Some(Ok(snapshot)) => {
                self.channel.publish(&id, snapshot);
            }
            Some(Err(e)) => return Err(e),
            None => return Err(TranscriberError::NotFound(format!("Transcription {} not found", id))),
        }

        let kind = match job.source() {
            JobSource::LocalFile { .. } => PipelineKind::LocalFile,
            JobSource::RemoteUrl { .. } => PipelineKind::RemoteUrl,
        };

        let registry = self.registry.clone();
        let channel = self.channel.clone();
        let sink_id = id.clone();
        let tracker = Arc::new(ProgressTracker::new(kind, move |update| {
            let snapshot = registry.update(&sink_id, |record| {
                record.advance(update.progress);
                record.snapshot(Some(update.stage))
            });
            if let Some(snapshot) = snapshot {
                channel.publish(&sink_id, snapshot);
            }
        }));

        let observer = JobObserver {
            registry: self.registry.clone(),
            id: id.clone(),
        };

        if let JobSource::RemoteUrl { url } = job.source() {
            crate::extractors::parse_video_url(url)
                .ok_or_else(|| TranscriberError::InvalidSource(format!("Unsupported URL: {}", url)))?;
        }

        let transcript = self
            .pipeline
            .run(job.source(), job.settings(), tracker.clone(), &observer)
            .await?;
        tracker.update(Stage::Finalize, 100);

        Ok(JobResult {
            text: transcript.text,
            segments: transcript.segments,
            detected_language: transcript.language,
            enhanced: transcript.enhanced,
        })
    }
}

/// Writes run discoveries straight into the job record
struct JobObserver {
    registry: Arc<JobRegistry>,
    id: JobId,
}

impl RunObserver for JobObserver {
    fn duration_known(&self, seconds: f64) {
        self.registry.update(&self.id, |job| job.set_duration(seconds));
    }

    fn title_known(&self, title: &str) {
        self.registry.update(&self.id, |job| job.rename(title));
    }
}
