//! Upload orchestration: claim, size gate, retried delivery, archive.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::TransferSummary;
use crate::config::RetryConfig;
use crate::error::TransferError;
use crate::manager::JobManager;
use crate::providers::FileTransport;
use crate::retry::{IsRetryable, run_with_retry};
use crate::store::MediaDir;
use crate::types::{FileStatus, FileUpdate, Job, JobId};
use crate::Result;

/// Delivers a job's downloaded files through the transport
///
/// Files are claimed atomically, so two orchestrators working the same job
/// never send a file twice. Per-file failures are recorded on the file and
/// never abort the rest of the batch.
pub struct UploadOrchestrator {
    manager: Arc<JobManager>,
    transport: Arc<dyn FileTransport>,
    retry: RetryConfig,
    max_file_size: u64,
    permits: Arc<Semaphore>,
}

impl UploadOrchestrator {
    /// Create an orchestrator sending at most `max_concurrent` files at a time
    pub fn new(
        manager: Arc<JobManager>,
        transport: Arc<dyn FileTransport>,
        retry: RetryConfig,
        max_file_size: u64,
        max_concurrent: usize,
    ) -> Self {
        Self {
            manager,
            transport,
            retry,
            max_file_size,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Claim every `Downloaded` file of a job and upload them concurrently
    ///
    /// Only claiming can fail (unknown job, store errors); once files are
    /// claimed every one ends `Uploaded` or `Failed`.
    pub async fn upload_job(&self, id: &JobId) -> Result<TransferSummary> {
        let claimed = self.manager.claim_downloaded_files(id).await?;
        if claimed.is_empty() {
            tracing::debug!(job_id = %id, "Nothing to upload");
            return Ok(TransferSummary::default());
        }

        let job = self.manager.get_job(id).await?;
        let total = job.files.len();

        let outcomes = futures::future::join_all(
            claimed
                .iter()
                .enumerate()
                .map(|(index, filename)| self.upload_file(&job, filename, index + 1, total)),
        )
        .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let summary = TransferSummary {
            succeeded,
            failed: outcomes.len() - succeeded,
        };
        tracing::info!(
            job_id = %id,
            uploaded = summary.succeeded,
            failed = summary.failed,
            "Upload batch finished"
        );
        Ok(summary)
    }

    /// Upload one claimed file and record the outcome; true when uploaded
    async fn upload_file(&self, job: &Job, filename: &str, index: usize, total: usize) -> bool {
        let id = &job.job_id;
        let outcome = match self.permits.acquire().await {
            Ok(_permit) => {
                let path = self.manager.media_path(id, MediaDir::Media).join(filename);
                let caption = format!("{} ({index}/{total})", job.source_url);
                self.send(job, filename, &path, &caption).await
            }
            Err(_) => Err("upload cancelled by shutdown".to_string()),
        };

        let (update, dest, uploaded) = match outcome {
            Ok(()) => (FileUpdate::status(FileStatus::Uploaded), MediaDir::Uploaded, true),
            Err(reason) => {
                tracing::warn!(job_id = %id, filename, reason = %reason, "Upload failed");
                (
                    FileUpdate::status(FileStatus::Failed).with_error(reason),
                    MediaDir::Failed,
                    false,
                )
            }
        };

        if let Err(e) = self.manager.set_file_status(id, filename, update).await {
            tracing::error!(job_id = %id, filename, error = %e, "Failed to record upload outcome");
            return false;
        }
        if let Err(e) = self.manager.archive_file(id, filename, dest).await {
            tracing::warn!(job_id = %id, filename, error = %e, "Failed to archive media file");
        }
        uploaded
    }

    /// Gate and deliver a file, recording each transient failure as a retry
    async fn send(
        &self,
        job: &Job,
        filename: &str,
        path: &Path,
        caption: &str,
    ) -> std::result::Result<(), String> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::FileMissing(path.to_path_buf()).to_string());
            }
            Err(e) => return Err(format!("cannot read file: {e}")),
        };
        if size > self.max_file_size {
            return Err(format!(
                "file too large ({size} bytes, limit {} bytes)",
                self.max_file_size
            ));
        }

        // retries recorded by an earlier run count against the same ceiling
        let used = job.files.get(filename).map_or(0, |f| f.retries);
        let budget = RetryConfig {
            max_retries: self.retry.max_retries.saturating_sub(used),
            ..self.retry.clone()
        };

        let id = &job.job_id;
        let result = run_with_retry(
            &budget,
            || self.transport.send_file(path, caption),
            |attempt, error: &TransferError| {
                let manager = Arc::clone(&self.manager);
                let id = id.clone();
                let filename = filename.to_string();
                let reason = error.to_string();
                async move {
                    tracing::debug!(job_id = %id, filename, attempt, "Recording upload retry");
                    let update = FileUpdate::status(FileStatus::Uploading)
                        .with_error(reason)
                        .retry();
                    if let Err(e) = manager.set_file_status(&id, &filename, update).await {
                        tracing::warn!(job_id = %id, filename, error = %e, "Failed to record retry");
                    }
                }
            },
        )
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(job_id = %id, filename, size, "Uploaded file");
                Ok(())
            }
            Err(TransferError::TimedOut) => Err(format!("upload timed out for {filename}")),
            Err(e) if e.is_retryable() => {
                Err(format!("max retries exceeded for {filename}: {e}"))
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
