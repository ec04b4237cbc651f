//! Job record persistence: create, load, atomic save, backup rollback.

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::{JobStore, MediaDir};
use crate::error::StoreError;
use crate::types::{Job, JobId};
use crate::{Error, Result};

impl JobStore {
    /// Create the job directory with its media subdirectories and an initial `Pending` record
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the directory is already there,
    /// whether or not it holds a record.
    pub async fn create(&self, id: &JobId, source_url: &str, now: DateTime<Utc>) -> Result<Job> {
        let dir = self.job_dir(id);

        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    id: id.clone(),
                    path: dir,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        for sub in MediaDir::ALL {
            tokio::fs::create_dir_all(self.media_path(id, sub)).await?;
        }

        let job = Job::new(id.clone(), source_url, now);
        self.save(&job).await?;

        tracing::debug!(job_id = %id, dir = %dir.display(), "Created job directory");
        Ok(job)
    }

    /// Load a job record, from the cache when possible
    ///
    /// A missing record is [`StoreError::NotFound`]. A record that does not
    /// parse, carries an unknown status, or names a different job is
    /// [`StoreError::Corrupt`]; it is never reported as missing.
    pub async fn load(&self, id: &JobId) -> Result<Job> {
        if let Some(job) = self.cache.lock().await.get(id) {
            return Ok(job.clone());
        }

        let path = self.state_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.clone() }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let job = parse_record(id, &path, &bytes)?;
        self.cache.lock().await.insert(id.clone(), job.clone());
        Ok(job)
    }

    /// Persist a job record atomically
    ///
    /// The record is written to a temporary file, flushed to disk and renamed
    /// over the previous one, so readers see either the old or the new record.
    /// If anything fails the previous record is left untouched and the cache
    /// keeps the previous value.
    pub async fn save(&self, job: &Job) -> Result<()> {
        let id = &job.job_id;
        let path = self.state_path(id);
        let tmp = self.temp_path(id);
        let bytes = serde_json::to_vec_pretty(job)?;

        if let Err(e) = write_synced(&tmp, &bytes).await {
            remove_quietly(&tmp).await;
            return Err(e.into());
        }

        if self.keep_backup
            && let Err(e) = self.back_up(id, &path).await
        {
            tracing::warn!(job_id = %id, error = %e, "Failed to back up job record");
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            remove_quietly(&tmp).await;
            tracing::error!(job_id = %id, error = %e, "Failed to replace job record");
            return Err(e.into());
        }

        self.cache.lock().await.insert(id.clone(), job.clone());
        Ok(())
    }

    /// Copy the current record to the backup slot
    ///
    /// The backup is replaced by rename, so a crash leaves either the old
    /// backup or the new one.
    async fn back_up(&self, id: &JobId, path: &Path) -> std::io::Result<()> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let tmp = self.backup_temp_path(id);
        let written = match write_synced(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, self.backup_path(id)).await,
            Err(e) => Err(e),
        };
        if written.is_err() {
            remove_quietly(&tmp).await;
        }
        written
    }

    /// Replace the record with the retained backup
    ///
    /// Operator action for a record reported as corrupt. The backup must parse
    /// and belong to the same job, otherwise nothing is changed.
    pub async fn restore_backup(&self, id: &JobId) -> Result<Job> {
        let backup = self.backup_path(id);
        let bytes = match tokio::fs::read(&backup).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.clone() }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let job = parse_record(id, &backup, &bytes)?;

        let tmp = self.temp_path(id);
        if let Err(e) = write_synced(&tmp, &bytes).await {
            remove_quietly(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, self.state_path(id)).await {
            remove_quietly(&tmp).await;
            return Err(e.into());
        }

        self.cache.lock().await.insert(id.clone(), job.clone());
        tracing::info!(job_id = %id, status = %job.status, "Restored job record from backup");
        Ok(job)
    }
}

fn parse_record(id: &JobId, path: &Path, bytes: &[u8]) -> Result<Job> {
    let job: Job = serde_json::from_slice(bytes).map_err(|e| corrupt(id, path, e.to_string()))?;

    if &job.job_id != id {
        return Err(corrupt(
            id,
            path,
            format!("record belongs to job {}", job.job_id),
        ));
    }
    Ok(job)
}

fn corrupt(id: &JobId, path: &Path, reason: String) -> Error {
    StoreError::Corrupt {
        id: id.clone(),
        path: path.to_path_buf(),
        reason,
    }
    .into()
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary record");
    }
}
