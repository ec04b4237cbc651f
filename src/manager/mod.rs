//! Job manager: the single writer of job records
//!
//! Every status change of a job or file goes through [`JobManager`]. It loads
//! the record, checks the transition against the state machine, stamps the
//! timestamps, saves the record atomically and then tells the heartbeat
//! tracker and event subscribers what happened.
//!
//! Writes for one job are serialized by a per-job lock, so read-modify-write
//! sequences never interleave. Different jobs never wait on each other.
//!
//! Methods are organized by domain:
//! - [`jobs`] - Job creation, status changes, finalization, cleanup
//! - [`files`] - File registration, status changes, upload claims, media moves

mod files;
mod jobs;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use jobs::CleanupReport;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};

use crate::error::{JobError, Result, StoreError};
use crate::heartbeat::HeartbeatTracker;
use crate::store::{JobStore, MediaDir};
use crate::types::{Event, Job, JobId};
use crate::Error;

/// Jobs read from the store in one pass
#[derive(Debug, Default)]
pub struct JobScan {
    /// Records that loaded
    pub jobs: Vec<Job>,
    /// Records that exist but cannot be trusted, with the reason
    pub corrupt: Vec<(JobId, String)>,
    /// Directories without a record
    pub orphaned: Vec<PathBuf>,
}

/// Sole mutator of job state
pub struct JobManager {
    store: JobStore,
    heartbeat: Arc<HeartbeatTracker>,
    event_tx: broadcast::Sender<Event>,
    locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl JobManager {
    /// Create a manager over `store`
    pub fn new(
        store: JobStore,
        heartbeat: Arc<HeartbeatTracker>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            store,
            heartbeat,
            event_tx,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to job lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The heartbeat tracker fed by file status changes
    pub fn heartbeat(&self) -> &Arc<HeartbeatTracker> {
        &self.heartbeat
    }

    /// Location of one of a job's media directories
    pub fn media_path(&self, id: &JobId, dir: MediaDir) -> PathBuf {
        self.store.media_path(id, dir)
    }

    /// Current record of a job
    ///
    /// A job that does not exist is [`JobError::UnknownJob`]; a corrupt record
    /// is reported as such.
    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        self.store.load(id).await.map_err(|e| unknown_job(e, id))
    }

    /// Load every job in the store
    ///
    /// Corrupt records are logged, announced as [`Event::CorruptJob`] and
    /// returned separately so callers can show them to an operator.
    pub async fn list_jobs(&self) -> Result<JobScan> {
        let listing = self.store.list_job_ids().await?;
        let mut scan = JobScan {
            orphaned: listing.orphaned,
            ..JobScan::default()
        };

        for id in listing.ids {
            match self.store.load(&id).await {
                Ok(job) => scan.jobs.push(job),
                Err(Error::Store(StoreError::Corrupt { reason, path, .. })) => {
                    tracing::error!(
                        job_id = %id,
                        path = %path.display(),
                        reason = %reason,
                        "Corrupt job record, operator attention required"
                    );
                    self.emit(Event::CorruptJob {
                        id: id.clone(),
                        reason: reason.clone(),
                    });
                    scan.corrupt.push((id, reason));
                }
                // removed between listing and loading
                Err(Error::Store(StoreError::NotFound { .. })) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(scan)
    }

    /// Bytes used by all job directories
    pub async fn storage_usage(&self) -> Result<u64> {
        self.store.storage_usage().await
    }

    /// Replace a corrupt record with its backup (operator action)
    pub async fn restore_backup(&self, id: &JobId) -> Result<Job> {
        let _guard = self.lock_job(id).await;
        self.store.restore_backup(id).await
    }

    /// Take the write lock of one job
    async fn lock_job(&self, id: &JobId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub(crate) fn emit(&self, event: Event) {
        // no subscribers is fine
        self.event_tx.send(event).ok();
    }
}

fn unknown_job(error: Error, id: &JobId) -> Error {
    match error {
        Error::Store(StoreError::NotFound { .. }) => JobError::UnknownJob { id: id.clone() }.into(),
        other => other,
    }
}
