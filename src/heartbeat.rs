//! In-memory liveness tracking per job
//!
//! Heartbeats are never persisted. After a restart the tracker starts empty
//! and liveness of old jobs is judged by the recovery scan from the
//! timestamps in their records.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::types::{JobId, elapsed_exceeds};

/// Latest progress signal of one job
#[derive(Clone, Debug, PartialEq)]
pub struct HeartbeatInfo {
    /// Files in a terminal status
    pub files_processed: usize,
    /// Files registered in the job
    pub total_files: usize,
    /// What the job was doing at the last update
    pub operation: String,
    /// Bytes fetched so far
    pub bytes_processed: u64,
    /// Time of the last update
    pub last_heartbeat: DateTime<Utc>,
    /// Time of the last update that increased files or bytes processed
    pub last_progress: DateTime<Utc>,
}

impl HeartbeatInfo {
    /// Share of files processed, 0-100
    pub fn progress_percentage(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.files_processed as f64 / self.total_files as f64 * 100.0
    }
}

/// Tracks the most recent heartbeat of every active job
pub struct HeartbeatTracker {
    entries: Mutex<HashMap<JobId, HeartbeatInfo>>,
    progress_window: Duration,
}

impl HeartbeatTracker {
    /// Tracker that also treats `progress_window` without progress as a stall
    pub fn new(progress_window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            progress_window,
        }
    }

    /// Record a heartbeat now
    pub async fn update(
        &self,
        id: &JobId,
        files_processed: usize,
        total_files: usize,
        operation: impl Into<String>,
        bytes_processed: u64,
    ) {
        self.update_at(
            id,
            files_processed,
            total_files,
            operation,
            bytes_processed,
            Utc::now(),
        )
        .await;
    }

    /// Record a heartbeat observed at `now`
    ///
    /// The progress timestamp only moves when `files_processed` or
    /// `bytes_processed` grew since the previous heartbeat. The first
    /// heartbeat of a job counts as progress.
    pub async fn update_at(
        &self,
        id: &JobId,
        files_processed: usize,
        total_files: usize,
        operation: impl Into<String>,
        bytes_processed: u64,
        now: DateTime<Utc>,
    ) {
        let operation = operation.into();
        let mut entries = self.entries.lock().await;

        let last_progress = match entries.get(id) {
            Some(prev)
                if files_processed <= prev.files_processed
                    && bytes_processed <= prev.bytes_processed =>
            {
                prev.last_progress
            }
            _ => now,
        };

        tracing::debug!(
            job_id = %id,
            files_processed,
            total_files,
            bytes_processed,
            operation = %operation,
            "Heartbeat"
        );

        entries.insert(
            id.clone(),
            HeartbeatInfo {
                files_processed,
                total_files,
                operation,
                bytes_processed,
                last_heartbeat: now,
                last_progress,
            },
        );
    }

    /// Current heartbeat of a job
    pub async fn get(&self, id: &JobId) -> Option<HeartbeatInfo> {
        self.entries.lock().await.get(id).cloned()
    }

    /// Stop tracking a job
    pub async fn remove(&self, id: &JobId) {
        if self.entries.lock().await.remove(id).is_some() {
            tracing::debug!(job_id = %id, "Removed heartbeat tracking");
        }
    }

    /// Whether a tracked job stopped reporting or stopped making progress
    ///
    /// Jobs without a heartbeat are not stalled; the tracker knows nothing
    /// about them.
    pub async fn is_stalled(&self, id: &JobId, timeout: Duration) -> bool {
        self.is_stalled_at(id, timeout, Utc::now()).await
    }

    /// [`is_stalled`](Self::is_stalled) evaluated at `now`
    pub async fn is_stalled_at(&self, id: &JobId, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.entries
            .lock()
            .await
            .get(id)
            .is_some_and(|info| self.stalled(info, timeout, now))
    }

    /// Every tracked job that is stalled, sorted by id
    pub async fn stalled_jobs(&self, timeout: Duration) -> Vec<JobId> {
        self.stalled_jobs_at(timeout, Utc::now()).await
    }

    /// [`stalled_jobs`](Self::stalled_jobs) evaluated at `now`
    pub async fn stalled_jobs_at(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<JobId> {
        let mut stalled: Vec<JobId> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, info)| self.stalled(info, timeout, now))
            .map(|(id, _)| id.clone())
            .collect();
        stalled.sort();
        stalled
    }

    /// Number of jobs being tracked
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no job is being tracked
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn stalled(&self, info: &HeartbeatInfo, timeout: Duration, now: DateTime<Utc>) -> bool {
        elapsed_exceeds(info.last_heartbeat, now, timeout)
            || elapsed_exceeds(info.last_progress, now, self.progress_window)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TIMEOUT: Duration = Duration::from_secs(300);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap() + chrono::TimeDelta::seconds(secs)
    }

    fn id(s: &str) -> JobId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_progress_only_moves_when_counts_grow() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(30));
        let job = id("job_a");

        tracker.update_at(&job, 0, 3, "downloading", 0, at(0)).await;
        tracker.update_at(&job, 0, 3, "downloading", 0, at(10)).await;
        let info = tracker.get(&job).await.unwrap();
        assert_eq!(info.last_heartbeat, at(10));
        assert_eq!(info.last_progress, at(0), "a timestamp bump is not progress");

        tracker.update_at(&job, 0, 3, "downloading", 512, at(20)).await;
        assert_eq!(tracker.get(&job).await.unwrap().last_progress, at(20));

        tracker.update_at(&job, 1, 3, "uploaded a.jpg", 512, at(25)).await;
        let info = tracker.get(&job).await.unwrap();
        assert_eq!(info.last_progress, at(25));
        assert!((info.progress_percentage() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stalled_by_missing_heartbeat() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(600));
        let job = id("job_a");
        tracker.update_at(&job, 0, 1, "downloading", 0, at(0)).await;

        assert!(!tracker.is_stalled_at(&job, TIMEOUT, at(300)).await);
        assert!(tracker.is_stalled_at(&job, TIMEOUT, at(301)).await);
    }

    #[tokio::test]
    async fn test_stalled_by_heartbeats_without_progress() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(30));
        let job = id("job_a");

        tracker.update_at(&job, 1, 4, "uploading", 100, at(0)).await;
        for secs in [10, 20, 30, 40] {
            tracker.update_at(&job, 1, 4, "uploading", 100, at(secs)).await;
        }

        // heartbeat is fresh but progress is 40s old
        assert!(tracker.is_stalled_at(&job, TIMEOUT, at(40)).await);

        tracker.update_at(&job, 2, 4, "uploading", 100, at(45)).await;
        assert!(!tracker.is_stalled_at(&job, TIMEOUT, at(50)).await);
    }

    #[tokio::test]
    async fn test_stalled_jobs_and_removal() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(30));
        let fresh = id("job_b");
        let stale = id("job_a");
        tracker.update_at(&stale, 0, 1, "downloading", 0, at(0)).await;
        tracker.update_at(&fresh, 0, 1, "downloading", 0, at(100)).await;

        assert_eq!(tracker.stalled_jobs_at(TIMEOUT, at(110)).await, vec![stale.clone()]);

        tracker.remove(&stale).await;
        assert!(tracker.stalled_jobs_at(TIMEOUT, at(110)).await.is_empty());
        assert_eq!(tracker.len().await, 1);
        assert!(!tracker.is_stalled_at(&stale, TIMEOUT, at(10_000)).await);
    }
}
