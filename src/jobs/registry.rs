use dashmap::DashMap;
use std::path::{Path, PathBuf};

use super::{Job, JobId, JobSettings, JobSource, JobSummary};
use crate::Result;

/// Default number of rows returned by [`JobRegistry::list`]
pub const DEFAULT_LIST_LIMIT: usize = 50;

const INTERRUPTED_ERROR: &str = "interrupted by restart";

/// Concurrent job store keyed by id.
///
/// Writes to one job go through the map's per-shard lock, so updates for the
/// same id are serialized. When opened on a directory every change is also
/// written to `<dir>/<id>.json`.
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
    persist_dir: Option<PathBuf>,
}

impl JobRegistry {
    pub fn in_memory() -> Self {
        Self {
            jobs: DashMap::new(),
            persist_dir: None,
        }
    }

    /// Open a registry backed by a directory of job records.
    ///
    /// Jobs that were still pending or processing when the process stopped
    /// are marked failed, since nothing will resume them.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs_err::create_dir_all(&dir)?;

        let registry = Self {
            jobs: DashMap::new(),
            persist_dir: Some(dir.clone()),
        };

        for entry in fs_err::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let mut job: Job = match fs_err::read_to_string(&path)
                .map_err(crate::TranscriberError::from)
                .and_then(|raw| serde_json::from_str::<Job>(&raw).map_err(Into::into))
            {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("Skipping unreadable job record {}: {}", path.display(), e);
                    continue;
                }
            };

            if !job.is_terminal() {
                tracing::info!("Job {} was interrupted, marking as failed", job.id());
                job.fail(INTERRUPTED_ERROR)?;
                registry.persist(&job);
            }

            registry.jobs.insert(job.id().clone(), job);
        }

        tracing::debug!("Loaded {} jobs from {}", registry.jobs.len(), dir.display());
        Ok(registry)
    }

    /// Create a pending job
    pub fn create(&self, source: JobSource, display_name: Option<String>, settings: JobSettings) -> Job {
        let job = Job::new(source, display_name, settings);
        self.persist(&job);
        self.jobs.insert(job.id().clone(), job.clone());

        tracing::info!("Created job {} for {}", job.id(), job.display_name());
        job
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// Newest first, at most `limit` entries
    pub fn list(&self, limit: usize) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self.jobs.iter().map(|job| job.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries.truncate(limit);
        summaries
    }

    /// Remove a job. Returns false when there was nothing to remove.
    pub fn delete(&self, id: &JobId) -> bool {
        let removed = self.jobs.remove(id).is_some();
        self.remove_record(id);
        removed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Apply a mutation to one job and persist the result.
    ///
    /// Returns `None` when the job no longer exists, e.g. it was deleted
    /// while its pipeline was still running. The record is written after the
    /// map guard is released; updates for one id come from its single run,
    /// so they still reach the disk in order.
    pub(crate) fn update<T>(&self, id: &JobId, mutate: impl FnOnce(&mut Job) -> T) -> Option<T> {
        let (value, changed) = {
            let mut job = self.jobs.get_mut(id)?;
            let value = mutate(&mut job);
            (value, self.persist_dir.is_some().then(|| job.clone()))
        };

        if let Some(job) = changed {
            self.persist(&job);
            // deleted while the record was being written
            if !self.jobs.contains_key(id) {
                self.remove_record(id);
            }
        }

        Some(value)
    }

    fn remove_record(&self, id: &JobId) {
        let Some(path) = self.record_path(id) else {
            return;
        };

        if let Err(e) = fs_err::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove job record {}: {}", path.display(), e);
            }
        }
    }

    fn record_path(&self, id: &JobId) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", id)))
    }

    fn persist(&self, job: &Job) {
        let Some(path) = self.record_path(job.id()) else {
            return;
        };

        if let Err(e) = write_record(&path, job) {
            tracing::warn!("Failed to persist job {}: {}", job.id(), e);
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn write_record(path: &Path, job: &Job) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs_err::write(&tmp, serde_json::to_vec_pretty(job)?)?;
    fs_err::rename(&tmp, path)?;
    Ok(())
}
