//! Job-level operations: creation, status changes, finalization, cleanup.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

use super::JobManager;
use crate::error::{JobError, StoreError};
use crate::types::{Event, FileStatus, Job, JobId, JobStatus, elapsed_exceeds};
use crate::{Error, Result};

/// Fresh ids tried before giving up on a create (ids carry a random suffix)
const CREATE_ATTEMPTS: usize = 3;

/// What a cleanup pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Finished jobs whose directories were removed
    pub removed: Vec<JobId>,
    /// Directories without a record, left in place
    pub orphaned: Vec<PathBuf>,
    /// Jobs with corrupt records, left in place
    pub corrupt: Vec<JobId>,
}

impl JobManager {
    /// Create a `Pending` job for `source_url`
    ///
    /// The URL must be an absolute `http` or `https` URL.
    pub async fn create_job(&self, source_url: &str) -> Result<JobId> {
        self.create_job_at(source_url, Utc::now()).await
    }

    /// [`create_job`](Self::create_job) with an explicit creation time
    pub async fn create_job_at(&self, source_url: &str, now: DateTime<Utc>) -> Result<JobId> {
        let source_url = source_url.trim();
        validate_source_url(source_url)?;

        for _ in 0..CREATE_ATTEMPTS {
            let id = JobId::generate(now);
            match self.store.create(&id, source_url, now).await {
                Ok(_) => {
                    tracing::info!(job_id = %id, source_url, "Created job");
                    self.emit(Event::JobCreated {
                        id: id.clone(),
                        source_url: source_url.to_string(),
                    });
                    return Ok(id);
                }
                Err(Error::Store(StoreError::AlreadyExists { id, .. })) => {
                    tracing::warn!(job_id = %id, "Job id collision, generating another");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Other(format!(
            "could not allocate a unique job id after {CREATE_ATTEMPTS} attempts"
        )))
    }

    /// Move a job to `status`, optionally recording a job-level error
    ///
    /// Moving to `Completed` or `PartiallyCompleted` requires every file to
    /// be terminal. Moving to `Failed` also fails every file still in flight
    /// with the job's error, so a failed job never has open files.
    ///
    /// Writes to a job that already finished are ignored: a transfer that
    /// outlived its job being failed for inactivity may still report back.
    pub async fn set_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let _guard = self.lock_job(id).await;
        let mut job = self.get_job(id).await?;

        if job.status.is_terminal() {
            if job.status != status {
                tracing::debug!(
                    job_id = %id,
                    current = %job.status,
                    requested = %status,
                    "Ignoring status change for finished job"
                );
            }
            return Ok(());
        }

        if !job.status.can_transition_to(status) {
            return Err(JobError::InvalidJobTransition {
                id: id.clone(),
                from: job.status,
                to: status,
            }
            .into());
        }

        let in_flight = job.files.len() - job.terminal_file_count();
        if matches!(status, JobStatus::Completed | JobStatus::PartiallyCompleted) && in_flight > 0 {
            return Err(JobError::Incomplete {
                id: id.clone(),
                in_flight,
            }
            .into());
        }

        let now = Utc::now();
        if let Some(error) = error {
            job.error = Some(error);
        }

        let mut failed_files = Vec::new();
        if status == JobStatus::Failed {
            let reason = job.error.clone().unwrap_or_else(|| "job failed".to_string());
            failed_files = fail_open_files(&mut job, &reason, now);
        }

        let previous = job.status;
        job.status = status;
        if status.is_terminal() {
            job.end_time = Some(now);
        }

        self.store.save(&job).await?;

        for filename in failed_files {
            self.emit(Event::FileStatusChanged {
                id: id.clone(),
                filename,
                status: FileStatus::Failed,
            });
        }
        self.job_changed(&job, previous).await;
        Ok(())
    }

    /// Mark a job `Failed` with `reason`
    pub async fn fail_job(&self, id: &JobId, reason: impl Into<String>) -> Result<()> {
        self.set_job_status(id, JobStatus::Failed, Some(reason.into()))
            .await
    }

    /// Record how many files the fetch provider reported
    pub async fn set_expected_files(&self, id: &JobId, count: u32) -> Result<()> {
        let _guard = self.lock_job(id).await;
        let mut job = self.get_job(id).await?;

        if job.status.is_terminal() || job.expected_file_count == count {
            return Ok(());
        }

        job.expected_file_count = count;
        self.store.save(&job).await
    }

    /// Derive the terminal status from the file outcomes and persist it
    ///
    /// `Completed` when every file uploaded, `Failed` when none did,
    /// `PartiallyCompleted` otherwise. Finalizing a finished job returns its
    /// status without writing anything. Files still in flight are
    /// [`JobError::Incomplete`].
    pub async fn finalize_job(&self, id: &JobId) -> Result<JobStatus> {
        let _guard = self.lock_job(id).await;
        let mut job = self.get_job(id).await?;

        if job.status.is_terminal() {
            tracing::debug!(job_id = %id, status = %job.status, "Job already finalized");
            return Ok(job.status);
        }

        let Some(status) = job.aggregate_status() else {
            return Err(JobError::Incomplete {
                id: id.clone(),
                in_flight: job.files.len() - job.terminal_file_count(),
            }
            .into());
        };

        if !job.status.can_transition_to(status) {
            return Err(JobError::InvalidJobTransition {
                id: id.clone(),
                from: job.status,
                to: status,
            }
            .into());
        }

        if status == JobStatus::Failed && job.error.is_none() {
            job.error = Some(if job.files.is_empty() {
                "job produced no files".to_string()
            } else {
                format!("all {} files failed", job.files.len())
            });
        }

        let previous = job.status;
        job.status = status;
        job.end_time = Some(Utc::now());
        self.store.save(&job).await?;

        self.job_changed(&job, previous).await;
        Ok(status)
    }

    /// Remove directories of jobs that finished more than `older_than` before `now`
    ///
    /// Jobs that are not terminal are never removed, and neither are corrupt
    /// records or directories without a record.
    pub async fn cleanup_finished(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let scan = self.list_jobs().await?;
        let mut report = CleanupReport {
            orphaned: scan.orphaned,
            corrupt: scan.corrupt.into_iter().map(|(id, _)| id).collect(),
            ..CleanupReport::default()
        };

        for job in scan.jobs {
            let expired = job.status.is_terminal()
                && job
                    .end_time
                    .is_some_and(|end| elapsed_exceeds(end, now, older_than));
            if !expired {
                continue;
            }

            let id = job.job_id;
            let guard = self.lock_job(&id).await;

            // re-check under the lock; the cache may be stale if the job was restored
            match self.store.load(&id).await {
                Ok(current) if current.status.is_terminal() => {}
                _ => continue,
            }

            if let Err(e) = self.store.remove_job_dir(&id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to remove finished job");
                continue;
            }

            drop(guard);
            self.locks.lock().await.remove(&id);
            tracing::info!(job_id = %id, "Removed finished job");
            report.removed.push(id);
        }

        Ok(report)
    }

    /// Log, notify and drop the heartbeat after a job status write
    async fn job_changed(&self, job: &Job, previous: JobStatus) {
        if previous != job.status {
            tracing::info!(
                job_id = %job.job_id,
                from = %previous,
                to = %job.status,
                error = job.error.as_deref().unwrap_or(""),
                "Job status changed"
            );
            self.emit(Event::JobStatusChanged {
                id: job.job_id.clone(),
                status: job.status,
            });
        }

        if job.status.is_terminal() {
            self.heartbeat.remove(&job.job_id).await;
            // finished jobs take no further writes
            self.locks.lock().await.remove(&job.job_id);
            self.emit(Event::JobFinished {
                id: job.job_id.clone(),
                status: job.status,
                uploaded: job.count(FileStatus::Uploaded),
                failed: job.count(FileStatus::Failed),
            });
        }
    }
}

/// Fail every non-terminal file with `reason`, returning their names
fn fail_open_files(job: &mut Job, reason: &str, now: DateTime<Utc>) -> Vec<String> {
    let mut failed = Vec::new();
    for file in job.files.values_mut().filter(|f| !f.status.is_terminal()) {
        match file.status {
            FileStatus::Pending | FileStatus::Downloading => file.download_time = Some(now),
            _ => file.upload_time = Some(now),
        }
        file.status = FileStatus::Failed;
        file.error = Some(reason.to_string());
        failed.push(file.filename.clone());
    }
    failed
}

fn validate_source_url(source_url: &str) -> Result<()> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: source_url.to_string(),
        reason,
    };

    let parsed = url::Url::parse(source_url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}
