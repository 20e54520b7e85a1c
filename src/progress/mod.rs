//! Progress aggregation across pipeline stages.
//!
//! Every stage reports a local 0-100 value. The stage's band maps it onto the
//! job-wide 0-100 scale, and [`ProgressTracker`] makes sure the published
//! sequence never goes backwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};

pub mod channel;

pub use channel::{ProgressChannel, ProgressSnapshot, ProgressSubscription};

/// One phase of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "downloading")]
    Download,
    #[serde(rename = "extracting")]
    Extract,
    #[serde(rename = "transcribing")]
    Transcribe,
    #[serde(rename = "finalizing")]
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "downloading",
            Stage::Extract => "extracting",
            Stage::Transcribe => "transcribing",
            Stage::Finalize => "finalizing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(offset, weight)` slice of the global scale owned by a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBand {
    pub offset: u8,
    pub weight: u8,
}

impl StageBand {
    pub const fn new(offset: u8, weight: u8) -> Self {
        Self { offset, weight }
    }

    /// `offset + floor(local * weight / 100)`, clamped to 0..=100
    pub fn scale(&self, local: u8) -> u8 {
        let local = u32::from(local.min(100));
        let scaled = u32::from(self.offset) + local * u32::from(self.weight) / 100;
        scaled.min(100) as u8
    }

    pub fn end(&self) -> u8 {
        self.offset.saturating_add(self.weight).min(100)
    }
}

/// Local file: audio extraction lead-in
pub const EXTRACT_BAND: StageBand = StageBand::new(0, 10);
/// Local file: speech recognition
pub const TRANSCRIBE_BAND: StageBand = StageBand::new(10, 80);
/// Local file: enhancement, rendering and writing outputs
pub const FINALIZE_BAND: StageBand = StageBand::new(90, 10);
/// Remote URL: fetching the media
pub const DOWNLOAD_BAND: StageBand = StageBand::new(0, 10);
/// Remote URL: everything after the download, i.e. the local-file pipeline
pub const REMOTE_PROCESSING_BAND: StageBand = StageBand::new(10, 90);

/// Which stage table a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    LocalFile,
    RemoteUrl,
}

impl PipelineKind {
    /// Map a stage-local value onto the global scale.
    ///
    /// Returns `None` for stages the pipeline does not have.
    pub fn global_progress(&self, stage: Stage, local: u8) -> Option<u8> {
        match (self, stage) {
            (PipelineKind::LocalFile, Stage::Download) => None,
            (PipelineKind::LocalFile, stage) => file_band(stage).map(|band| band.scale(local)),
            (PipelineKind::RemoteUrl, Stage::Download) => Some(DOWNLOAD_BAND.scale(local)),
            (PipelineKind::RemoteUrl, stage) => file_band(stage)
                .map(|band| REMOTE_PROCESSING_BAND.scale(band.scale(local))),
        }
    }
}

fn file_band(stage: Stage) -> Option<StageBand> {
    match stage {
        Stage::Download => None,
        Stage::Extract => Some(EXTRACT_BAND),
        Stage::Transcribe => Some(TRANSCRIBE_BAND),
        Stage::Finalize => Some(FINALIZE_BAND),
    }
}

/// A published global progress value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub progress: u8,
}

#[derive(Debug, Default)]
struct TrackerState {
    stage: Option<Stage>,
    last_local: Option<u8>,
    published: Option<u8>,
}

type ProgressSink = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Scales stage-local progress and forwards only strictly new values.
///
/// Duplicate or decreasing local values within a stage are dropped before
/// scaling; a global value lower than the last published one is never sent.
/// Entering a new stage publishes once even if the global value is unchanged.
pub struct ProgressTracker {
    kind: PipelineKind,
    state: Mutex<TrackerState>,
    sink: ProgressSink,
}

impl ProgressTracker {
    pub fn new(kind: PipelineKind, sink: impl Fn(ProgressUpdate) + Send + Sync + 'static) -> Self {
        Self {
            kind,
            state: Mutex::new(TrackerState::default()),
            sink: Box::new(sink),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn update(&self, stage: Stage, local: u8) {
        let local = local.min(100);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let stage_changed = state.stage != Some(stage);
        if stage_changed {
            state.stage = Some(stage);
            state.last_local = None;
        }

        if state.last_local.is_some_and(|last| local <= last) {
            return;
        }
        state.last_local = Some(local);

        let Some(global) = self.kind.global_progress(stage, local) else {
            tracing::debug!("Ignoring progress for stage {} outside of {:?} pipeline", stage, self.kind);
            return;
        };

        match state.published {
            Some(last) if global < last => return,
            Some(last) if global == last && !stage_changed => return,
            _ => {}
        }

        state.published = Some(global);
        (self.sink)(ProgressUpdate { stage, progress: global });
    }

    /// Last published global value, 0 before the first update
    pub fn current(&self) -> u8 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording_tracker(kind: PipelineKind) -> (ProgressTracker, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new(kind, move |update| sink.lock().unwrap().push(update));
        (tracker, seen)
    }

    #[test]
    fn test_band_scaling() {
        assert_eq!(TRANSCRIBE_BAND.scale(0), 10);
        assert_eq!(TRANSCRIBE_BAND.scale(50), 50);
        assert_eq!(TRANSCRIBE_BAND.scale(100), 90);
        assert_eq!(EXTRACT_BAND.scale(55), 5);
        assert_eq!(FINALIZE_BAND.scale(100), 100);
        assert_eq!(StageBand::new(95, 10).scale(100), 100);
        assert_eq!(TRANSCRIBE_BAND.scale(250), 90);
    }

    #[test]
    fn test_band_outputs_are_monotonic_and_bounded() {
        let bands = [EXTRACT_BAND, TRANSCRIBE_BAND, FINALIZE_BAND, DOWNLOAD_BAND, REMOTE_PROCESSING_BAND];
        for band in bands {
            let mut previous = band.scale(0);
            for local in 0..=100u8 {
                let global = band.scale(local);
                assert!(global >= previous, "{:?} went backwards at {}", band, local);
                assert!(global >= band.offset && global <= band.end());
                previous = global;
            }
        }
    }

    #[test]
    fn test_remote_pipeline_nests_file_bands() {
        let remote = PipelineKind::RemoteUrl;
        assert_eq!(remote.global_progress(Stage::Download, 100), Some(10));
        assert_eq!(remote.global_progress(Stage::Extract, 0), Some(10));
        assert_eq!(remote.global_progress(Stage::Transcribe, 100), Some(91));
        assert_eq!(remote.global_progress(Stage::Finalize, 100), Some(100));
        assert_eq!(PipelineKind::LocalFile.global_progress(Stage::Download, 50), None);
    }

    #[test]
    fn test_tracker_suppresses_duplicates_and_regressions() {
        let (tracker, seen) = recording_tracker(PipelineKind::LocalFile);

        tracker.update(Stage::Extract, 0);
        tracker.update(Stage::Extract, 100);
        tracker.update(Stage::Transcribe, 0);
        tracker.update(Stage::Transcribe, 40);
        tracker.update(Stage::Transcribe, 40);
        tracker.update(Stage::Transcribe, 20);
        tracker.update(Stage::Transcribe, 41);
        tracker.update(Stage::Transcribe, 45);
        tracker.update(Stage::Extract, 50);

        let progress: Vec<u8> = seen.lock().unwrap().iter().map(|u| u.progress).collect();
        assert_eq!(progress, vec![0, 10, 10, 42, 46]);
        assert_eq!(tracker.current(), 46);
    }

    #[test]
    fn test_tracker_output_never_decreases() {
        let (tracker, seen) = recording_tracker(PipelineKind::RemoteUrl);
        let script = [
            (Stage::Download, 0),
            (Stage::Download, 35),
            (Stage::Download, 100),
            (Stage::Extract, 0),
            (Stage::Extract, 100),
            (Stage::Transcribe, 3),
            (Stage::Transcribe, 77),
            (Stage::Transcribe, 100),
            (Stage::Finalize, 0),
            (Stage::Finalize, 100),
        ];
        for (stage, local) in script {
            tracker.update(stage, local);
        }

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|pair| pair[0].progress <= pair[1].progress));
        assert_eq!(seen.last().map(|u| u.progress), Some(100));
    }
}
