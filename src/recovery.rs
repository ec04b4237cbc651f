//! Crash recovery
//!
//! After a restart nothing is running, but the store may still hold jobs in
//! `Downloading` or `Uploading`. A recovery pass finds the ones that have
//! been idle longer than the inactivity threshold, marks them `Interrupted`
//! and re-drives every file that still has retries left through the same
//! download and upload orchestrators a fresh job uses.
//!
//! Jobs started longer ago than the maximum age are never touched; they are
//! left for the operator.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;

use crate::config::RecoveryConfig;
use crate::manager::JobManager;
use crate::transfer::{DownloadOrchestrator, UploadOrchestrator};
use crate::types::{Event, FileStatus, FileUpdate, Job, JobId, JobStatus, elapsed_exceeds};
use crate::{Error, Result};

/// What a recovery pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs found interrupted
    pub interrupted: usize,
    /// Jobs whose files were re-driven
    pub resumed: usize,
    /// Jobs with nothing left to retry
    pub abandoned: usize,
    /// Jobs whose recovery itself failed
    pub failed: usize,
}

/// Finds interrupted jobs and re-drives them
pub struct RecoverySystem {
    manager: Arc<JobManager>,
    downloader: Arc<DownloadOrchestrator>,
    uploader: Arc<UploadOrchestrator>,
    config: RecoveryConfig,
    max_retries: u32,
}

impl RecoverySystem {
    /// Create a recovery system; files with `max_retries` recorded retries are not retried again
    pub fn new(
        manager: Arc<JobManager>,
        downloader: Arc<DownloadOrchestrator>,
        uploader: Arc<UploadOrchestrator>,
        config: RecoveryConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            manager,
            downloader,
            uploader,
            config,
            max_retries,
        }
    }

    /// Mark idle working jobs `Interrupted` and return every job awaiting recovery
    ///
    /// A job qualifies when it is `Downloading`, `Uploading` or `Recovering`
    /// and its last activity is older than the inactivity threshold. Jobs
    /// already `Interrupted` by an earlier pass are returned as well. Jobs
    /// started before the maximum age are skipped.
    pub async fn scan_interrupted(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let scan = self.manager.list_jobs().await?;
        let mut interrupted = Vec::new();

        for job in scan.jobs {
            let candidate = job.status.is_working()
                || matches!(job.status, JobStatus::Recovering | JobStatus::Interrupted);
            if !candidate {
                continue;
            }

            if elapsed_exceeds(job.start_time, now, self.config.max_job_age) {
                tracing::warn!(
                    job_id = %job.job_id,
                    status = %job.status,
                    start_time = %job.start_time,
                    "Job too old to recover, left for operator"
                );
                continue;
            }

            if job.status == JobStatus::Interrupted {
                interrupted.push(job);
                continue;
            }

            let last_activity = job.last_activity();
            if !elapsed_exceeds(last_activity, now, self.config.inactivity_threshold) {
                continue;
            }

            let id = job.job_id;
            if let Err(e) = self
                .manager
                .set_job_status(&id, JobStatus::Interrupted, None)
                .await
            {
                tracing::warn!(job_id = %id, error = %e, "Could not mark job interrupted");
                continue;
            }
            tracing::info!(job_id = %id, last_activity = %last_activity, "Found interrupted job");
            interrupted.push(self.manager.get_job(&id).await?);
        }

        Ok(interrupted)
    }

    /// Re-drive the retryable files of an interrupted job
    ///
    /// Returns `false` when nothing was left to retry (the job is then
    /// `Failed`), `true` once every eligible file has been re-driven. A
    /// failure of the recovery itself fails the job, is announced as
    /// [`Event::RecoveryFailed`] and returned.
    pub async fn resume(&self, job: Job) -> Result<bool> {
        let id = job.job_id.clone();
        match self.resume_job(&id).await {
            Ok(resumed) => Ok(resumed),
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Recovery failed");
                if let Err(write_err) = self
                    .manager
                    .fail_job(&id, format!("recovery failed: {e}"))
                    .await
                {
                    tracing::error!(job_id = %id, error = %write_err, "Could not record recovery failure");
                }
                self.manager.emit(Event::RecoveryFailed {
                    id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Scan and resume every interrupted job, a few at a time
    pub async fn recover_all(&self, now: DateTime<Utc>) -> Result<RecoveryReport> {
        let jobs = self.scan_interrupted(now).await?;
        let mut report = RecoveryReport {
            interrupted: jobs.len(),
            ..RecoveryReport::default()
        };
        if jobs.is_empty() {
            tracing::debug!("No interrupted jobs");
            return Ok(report);
        }

        let outcomes: Vec<Result<bool>> = futures::stream::iter(jobs)
            .map(|job| self.resume(job))
            .buffer_unordered(self.config.max_concurrent_recoveries.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(true) => report.resumed += 1,
                Ok(false) => report.abandoned += 1,
                Err(_) => report.failed += 1,
            }
        }

        tracing::info!(
            interrupted = report.interrupted,
            resumed = report.resumed,
            abandoned = report.abandoned,
            failed = report.failed,
            "Recovery pass finished"
        );
        Ok(report)
    }

    async fn resume_job(&self, id: &JobId) -> Result<bool> {
        let job = self.manager.get_job(id).await?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        let mut downloads = Vec::new();
        let mut requeue = Vec::new();
        for file in job.files.values().filter(|f| !f.status.is_terminal()) {
            if file.retries >= self.max_retries {
                tracing::warn!(job_id = %id, filename = %file.filename, retries = file.retries, "File out of retries");
                self.manager
                    .set_file_status(
                        id,
                        &file.filename,
                        FileUpdate::status(FileStatus::Failed)
                            .with_error("max retries exceeded during recovery"),
                    )
                    .await?;
                continue;
            }
            match file.status {
                FileStatus::Pending | FileStatus::Downloading => downloads.push(file.filename.clone()),
                FileStatus::Uploading => requeue.push(file.filename.clone()),
                // already waiting for a claim
                FileStatus::Downloaded | FileStatus::Uploaded | FileStatus::Failed => {}
            }
        }

        let waiting = job.count(FileStatus::Downloaded);
        if downloads.is_empty() && requeue.is_empty() && waiting == 0 {
            self.abandon(id).await?;
            return Ok(false);
        }

        if job.status.is_working() {
            self.manager
                .set_job_status(id, JobStatus::Interrupted, None)
                .await?;
        }
        self.manager
            .set_job_status(id, JobStatus::Recovering, None)
            .await?;
        tracing::info!(
            job_id = %id,
            downloads = downloads.len(),
            uploads = requeue.len() + waiting,
            "Resuming job"
        );

        for filename in &requeue {
            let update = FileUpdate::status(FileStatus::Downloaded)
                .with_error("upload interrupted")
                .retry();
            if let Err(e) = self.manager.set_file_status(id, filename, update).await {
                self.fail_file(id, filename, &e).await?;
            }
        }

        let mut redownload = Vec::new();
        for filename in downloads {
            let update = FileUpdate::status(FileStatus::Downloading).retry();
            match self.manager.set_file_status(id, &filename, update).await {
                Ok(()) => redownload.push(filename),
                Err(e) => self.fail_file(id, &filename, &e).await?,
            }
        }
        if let Err(e) = self.downloader.redownload_files(id, &redownload).await {
            for filename in &redownload {
                self.fail_file(id, filename, &e).await?;
            }
        }

        self.uploader.upload_job(id).await?;

        let current = self.manager.get_job(id).await?;
        if current.status.is_terminal() {
            return Ok(true);
        }
        match current.aggregate_status() {
            Some(_) => {
                let status = self.manager.finalize_job(id).await?;
                tracing::info!(job_id = %id, status = %status, "Recovered job");
            }
            None => {
                tracing::warn!(
                    job_id = %id,
                    in_flight = current.files.len() - current.terminal_file_count(),
                    "Files still in flight after recovery, left for the next pass"
                );
                self.manager
                    .set_job_status(id, JobStatus::Interrupted, None)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Fail a job that has nothing left to retry
    ///
    /// Files already uploaded keep their status; the job as a whole failed
    /// to finish.
    async fn abandon(&self, id: &JobId) -> Result<()> {
        tracing::warn!(job_id = %id, "No retryable files, failing job");
        self.manager
            .fail_job(id, "no retryable files remain")
            .await
    }

    /// Record a per-file recovery error on that file only
    async fn fail_file(&self, id: &JobId, filename: &str, error: &Error) -> Result<()> {
        tracing::warn!(job_id = %id, filename, error = %error, "File recovery failed");
        self.manager
            .set_file_status(
                id,
                filename,
                FileUpdate::status(FileStatus::Failed).with_error(error.to_string()),
            )
            .await
    }
}
