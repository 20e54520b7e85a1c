//! Per-job progress snapshots for clients that follow a job until it ends.

use dashmap::DashMap;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

use super::Stage;
use crate::jobs::{JobId, JobStatus};

/// Default interval at which a subscriber re-checks the latest snapshot
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What a client sees of a running job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub progress: u8,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub error: Option<String>,
}

/// Job-keyed snapshot slots.
///
/// The orchestrator opens a slot when it accepts a job and publishes into it;
/// subscribers only ever read. Removing a slot ends every open subscription.
pub struct ProgressChannel {
    slots: DashMap<JobId, watch::Sender<Option<ProgressSnapshot>>>,
    poll_interval: Duration,
}

impl ProgressChannel {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            poll_interval,
        }
    }

    /// Create the slot for a job and seed it with its first snapshot
    pub fn open(&self, id: &JobId, initial: ProgressSnapshot) {
        self.slots
            .entry(id.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(initial));
    }

    /// Replace the latest snapshot. Returns false if the slot is gone.
    pub fn publish(&self, id: &JobId, snapshot: ProgressSnapshot) -> bool {
        match self.slots.get(id) {
            Some(slot) => {
                slot.send_replace(Some(snapshot));
                true
            }
            None => false,
        }
    }

    pub fn latest(&self, id: &JobId) -> Option<ProgressSnapshot> {
        self.slots.get(id).and_then(|slot| slot.borrow().clone())
    }

    /// Follow a job. `None` when no slot is open for it; never creates one,
    /// so a removed job cannot come back as a slot nobody publishes to.
    pub fn subscribe(&self, id: &JobId) -> Option<ProgressSubscription> {
        let receiver = self.slots.get(id)?.subscribe();

        Some(ProgressSubscription {
            receiver,
            poll_interval: self.poll_interval,
            last: None,
            finished: false,
        })
    }

    pub fn remove(&self, id: &JobId) -> bool {
        self.slots.remove(id).is_some()
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Consumer side of one job's snapshots.
///
/// Yields a monotonic subsequence of what was published: a snapshot is skipped
/// when neither its progress nor its status changed, terminal snapshots are
/// always yielded and end the subscription.
pub struct ProgressSubscription {
    receiver: watch::Receiver<Option<ProgressSnapshot>>,
    poll_interval: Duration,
    last: Option<(u8, JobStatus)>,
    finished: bool,
}

impl ProgressSubscription {
    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        if self.finished {
            return None;
        }

        loop {
            let current = self.receiver.borrow_and_update().clone();

            if let Some(snapshot) = current {
                let terminal = snapshot.status.is_terminal();
                let key = (snapshot.progress, snapshot.status);

                if terminal || self.last != Some(key) {
                    self.last = Some(key);
                    self.finished = terminal;
                    return Some(snapshot);
                }
            }

            match tokio::time::timeout(self.poll_interval, self.receiver.changed()).await {
                Ok(Ok(())) | Err(_) => continue,
                Ok(Err(_)) => {
                    // slot removed: the job was deleted
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressSnapshot> + Send {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|snapshot| (snapshot, subscription))
        })
    }
}
