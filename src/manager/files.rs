//! File-level operations: registration, status changes, upload claims, media moves.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use super::JobManager;
use crate::error::JobError;
use crate::store::MediaDir;
use crate::types::{Event, FileRecord, FileStatus, FileUpdate, Job, JobId, JobStatus};
use crate::Result;

impl JobManager {
    /// Add a `Pending` file to a job
    ///
    /// Fails with [`JobError::UnknownJob`] if the job does not exist and
    /// [`JobError::DuplicateFile`] if the name is taken.
    pub async fn register_file(
        &self,
        id: &JobId,
        filename: &str,
        original_url: &str,
    ) -> Result<()> {
        validate_filename(filename)?;

        let _guard = self.lock_job(id).await;
        let mut job = self.get_job(id).await?;

        if job.status.is_terminal() {
            tracing::debug!(job_id = %id, filename, "Ignoring file registration for finished job");
            return Ok(());
        }

        if job.files.contains_key(filename) {
            return Err(JobError::DuplicateFile {
                id: id.clone(),
                filename: filename.to_string(),
            }
            .into());
        }

        job.files
            .insert(filename.to_string(), FileRecord::new(filename, original_url));
        self.store.save(&job).await?;

        tracing::debug!(job_id = %id, filename, "Registered file");
        self.emit(Event::FileStatusChanged {
            id: id.clone(),
            filename: filename.to_string(),
            status: FileStatus::Pending,
        });
        self.beat(&job, format!("registered {filename}")).await;
        Ok(())
    }

    /// Move a file to a new status and apply the permitted field changes
    ///
    /// Timestamps are stamped here: `download_time` when a download ends
    /// (success or failure), `upload_time` when an upload ends. Every call
    /// also refreshes the job's heartbeat.
    ///
    /// Fails with [`JobError::UnknownFile`] if the file is not registered.
    /// Writes to a finished job are ignored.
    pub async fn set_file_status(&self, id: &JobId, filename: &str, update: FileUpdate) -> Result<()> {
        let _guard = self.lock_job(id).await;
        let mut job = self.get_job(id).await?;

        if job.status.is_terminal() {
            tracing::debug!(
                job_id = %id,
                filename,
                requested = %update.status,
                "Ignoring file update for finished job"
            );
            return Ok(());
        }

        let now = Utc::now();
        let file = job
            .files
            .get_mut(filename)
            .ok_or_else(|| JobError::UnknownFile {
                id: id.clone(),
                filename: filename.to_string(),
            })?;

        let from = file.status;
        let to = update.status;
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidFileTransition {
                id: id.clone(),
                filename: filename.to_string(),
                from,
                to,
            }
            .into());
        }

        apply_file_update(file, update, now);
        let retries = file.retries;
        job.last_heartbeat = Some(now);
        self.store.save(&job).await?;

        tracing::debug!(job_id = %id, filename, from = %from, to = %to, retries, "File status written");
        if from != to {
            self.emit(Event::FileStatusChanged {
                id: id.clone(),
                filename: filename.to_string(),
                status: to,
            });
        }
        self.beat(&job, format!("{to} {filename}")).await;
        Ok(())
    }

    /// Atomically claim every `Downloaded` file of a job for upload
    ///
    /// The claimed files become `Uploading` and the job becomes `Uploading`
    /// in a single save, so concurrent claimers receive disjoint sets.
    /// Returns the claimed names in media order; an empty list means there
    /// was nothing to claim.
    pub async fn claim_downloaded_files(&self, id: &JobId) -> Result<Vec<String>> {
        let _guard = self.lock_job(id).await;
        let mut job = self.get_job(id).await?;

        if job.status.is_terminal() {
            return Ok(Vec::new());
        }

        let claimed: Vec<String> = job
            .ordered_filenames()
            .into_iter()
            .filter(|name| {
                job.files
                    .get(name)
                    .is_some_and(|f| f.status == FileStatus::Downloaded)
            })
            .collect();
        if claimed.is_empty() {
            return Ok(claimed);
        }

        if !job.status.can_transition_to(JobStatus::Uploading) {
            return Err(JobError::InvalidJobTransition {
                id: id.clone(),
                from: job.status,
                to: JobStatus::Uploading,
            }
            .into());
        }

        let previous = job.status;
        job.status = JobStatus::Uploading;
        for name in &claimed {
            if let Some(file) = job.files.get_mut(name) {
                file.status = FileStatus::Uploading;
            }
        }
        job.last_heartbeat = Some(Utc::now());
        self.store.save(&job).await?;

        tracing::info!(job_id = %id, count = claimed.len(), "Claimed files for upload");
        if previous != JobStatus::Uploading {
            self.emit(Event::JobStatusChanged {
                id: id.clone(),
                status: JobStatus::Uploading,
            });
        }
        for name in &claimed {
            self.emit(Event::FileStatusChanged {
                id: id.clone(),
                filename: name.clone(),
                status: FileStatus::Uploading,
            });
        }
        self.beat(&job, format!("claimed {} files", claimed.len())).await;
        Ok(claimed)
    }

    /// Move a file out of `media/` once its upload is decided
    ///
    /// Returns the new location, or `None` when the file was not in `media/`.
    pub async fn archive_file(
        &self,
        id: &JobId,
        filename: &str,
        dest: MediaDir,
    ) -> Result<Option<PathBuf>> {
        validate_filename(filename)?;
        self.store.move_media(id, filename, dest).await
    }

    async fn beat(&self, job: &Job, operation: String) {
        self.heartbeat
            .update(
                &job.job_id,
                job.terminal_file_count(),
                job.files.len(),
                operation,
                job.bytes_processed(),
            )
            .await;
    }
}

/// Apply `update` to `file`, stamping timestamps for the transition
///
/// A finished download starts the upload operation, so the retry counter is
/// reset when a file first reaches `Downloaded`.
fn apply_file_update(file: &mut FileRecord, update: FileUpdate, now: DateTime<Utc>) {
    use FileStatus::*;

    match (file.status, update.status) {
        (Pending | Downloading, Downloaded) => {
            file.download_time = Some(now);
            file.retries = 0;
        }
        (Pending | Downloading, Failed) => file.download_time = Some(now),
        (Uploading, Uploaded) | (Downloaded | Uploading, Failed) => file.upload_time = Some(now),
        _ => {}
    }

    file.status = update.status;
    match update.error {
        Some(error) => file.error = Some(error),
        None if update.status == Uploaded => file.error = None,
        None => {}
    }
    if let Some(bytes) = update.file_size {
        file.file_size = bytes;
    }
    if update.count_retry {
        file.retries += 1;
    }
}

/// File names are plain names inside the job's media directory
fn validate_filename(filename: &str) -> Result<()> {
    let valid = !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(JobError::InvalidFilename {
            filename: filename.to_string(),
        }
        .into())
    }
}
