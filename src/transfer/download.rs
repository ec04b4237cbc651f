//! Fetch provider orchestration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::TransferSummary;
use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::manager::JobManager;
use crate::providers::{AuthProvider, FetchProvider};
use crate::retry::run_with_retry;
use crate::store::MediaDir;
use crate::types::{FileStatus, FileUpdate, Job, JobId, JobStatus};
use crate::{Error, Result};

/// Runs the fetch provider for jobs and registers what it produced
///
/// Fetch-level failures (invalid session, missing content, exhausted rate
/// limit retries) fail the whole job with the provider's classification.
/// Only infrastructure errors (store writes, shutdown) are returned as `Err`.
pub struct DownloadOrchestrator {
    manager: Arc<JobManager>,
    fetcher: Arc<dyn FetchProvider>,
    auth: Arc<dyn AuthProvider>,
    retry: RetryConfig,
    permits: Arc<Semaphore>,
}

impl DownloadOrchestrator {
    /// Create an orchestrator running at most `max_concurrent` fetches at a time
    pub fn new(
        manager: Arc<JobManager>,
        fetcher: Arc<dyn FetchProvider>,
        auth: Arc<dyn AuthProvider>,
        retry: RetryConfig,
        max_concurrent: usize,
    ) -> Self {
        Self {
            manager,
            fetcher,
            auth,
            retry,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Fetch a job's source and mark every produced file `Downloaded`
    ///
    /// A source that yields nothing fails the job. On success the job is
    /// left in `Downloading` with its files ready to be claimed for upload.
    pub async fn download_job(&self, id: &JobId) -> Result<TransferSummary> {
        let job = self.manager.get_job(id).await?;
        if job.status.is_terminal() {
            tracing::debug!(job_id = %id, status = %job.status, "Skipping download of finished job");
            return Ok(TransferSummary::default());
        }

        let Some(paths) = self.fetch(&job).await? else {
            return Ok(TransferSummary::default());
        };

        if paths.is_empty() {
            tracing::warn!(job_id = %id, source_url = %job.source_url, "Fetch produced no files");
            self.manager.fail_job(id, "no content was downloaded").await?;
            return Ok(TransferSummary::default());
        }

        let count = u32::try_from(paths.len()).unwrap_or(u32::MAX);
        self.manager.set_expected_files(id, count).await?;

        let mut summary = TransferSummary::default();
        for path in &paths {
            let Some(filename) = media_filename(path) else {
                tracing::warn!(job_id = %id, path = %path.display(), "Skipping fetched path without a file name");
                continue;
            };

            if !job.files.contains_key(&filename) {
                self.manager
                    .register_file(id, &filename, &job.source_url)
                    .await?;
            }

            let current = self.manager.get_job(id).await?;
            if current.status.is_terminal() {
                // failed underneath us, e.g. by the stall monitor
                break;
            }
            match current.files.get(&filename).map(|f| f.status) {
                Some(FileStatus::Pending | FileStatus::Downloading) => {
                    self.mark_downloaded(id, &filename, path).await?;
                    summary.succeeded += 1;
                }
                status => {
                    tracing::debug!(job_id = %id, filename, ?status, "File already past download");
                }
            }
        }

        tracing::info!(
            job_id = %id,
            downloaded = summary.succeeded,
            fetcher = self.fetcher.name(),
            "Download finished"
        );
        Ok(summary)
    }

    /// Re-run the fetch for a job and settle the named files
    ///
    /// Used by recovery for files whose download was interrupted. A file the
    /// fetch does not produce again is marked `Failed`; a failed fetch fails
    /// every named file with the provider's classification but leaves the
    /// job itself open.
    pub async fn redownload_files(&self, id: &JobId, filenames: &[String]) -> Result<TransferSummary> {
        let mut summary = TransferSummary::default();
        if filenames.is_empty() {
            return Ok(summary);
        }

        let job = self.manager.get_job(id).await?;
        self.manager
            .set_job_status(id, JobStatus::Downloading, None)
            .await?;

        let produced: HashSet<String> = match self.run_fetch(&job).await? {
            Ok(paths) => paths.iter().filter_map(|p| media_filename(p)).collect(),
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Re-download failed");
                for filename in filenames {
                    self.manager
                        .set_file_status(id, filename, FileUpdate::status(FileStatus::Failed).with_error(e.to_string()))
                        .await?;
                    summary.failed += 1;
                }
                return Ok(summary);
            }
        };

        let media = self.manager.media_path(id, MediaDir::Media);
        for filename in filenames {
            let path = media.join(filename);
            if produced.contains(filename) || tokio::fs::try_exists(&path).await.unwrap_or(false) {
                self.mark_downloaded(id, filename, &path).await?;
                summary.succeeded += 1;
            } else {
                self.manager
                    .set_file_status(
                        id,
                        filename,
                        FileUpdate::status(FileStatus::Failed)
                            .with_error("file missing after re-download"),
                    )
                    .await?;
                summary.failed += 1;
            }
        }

        tracing::info!(
            job_id = %id,
            recovered = summary.succeeded,
            failed = summary.failed,
            "Re-download finished"
        );
        Ok(summary)
    }

    /// Gate on the session, move the job to `Downloading` and fetch
    ///
    /// `None` means the job was failed here.
    async fn fetch(&self, job: &Job) -> Result<Option<Vec<PathBuf>>> {
        let id = &job.job_id;

        let auth = self.auth.validate().await;
        if !auth.valid {
            let reason = auth
                .reason
                .unwrap_or_else(|| "credentials rejected".to_string());
            tracing::warn!(job_id = %id, reason = %reason, "Authentication check failed");
            self.manager
                .fail_job(id, format!("authentication failed: {reason}"))
                .await?;
            return Ok(None);
        }

        self.manager
            .set_job_status(id, JobStatus::Downloading, None)
            .await?;

        match self.run_fetch(job).await? {
            Ok(paths) => Ok(Some(paths)),
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Fetch failed");
                self.manager.fail_job(id, e.to_string()).await?;
                Ok(None)
            }
        }
    }

    /// Invoke the provider under a permit, retrying rate limits
    ///
    /// The outer `Result` carries shutdown; the inner one the fetch outcome.
    async fn run_fetch(&self, job: &Job) -> Result<std::result::Result<Vec<PathBuf>, FetchError>> {
        let dest = self.manager.media_path(&job.job_id, MediaDir::Media);
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        tracing::info!(
            job_id = %job.job_id,
            source_url = %job.source_url,
            fetcher = self.fetcher.name(),
            "Fetching"
        );

        let result = run_with_retry(
            &self.retry,
            || self.fetcher.fetch(&job.source_url, &dest),
            |_attempt, _error: &FetchError| async {},
        )
        .await;
        Ok(result)
    }

    async fn mark_downloaded(&self, id: &JobId, filename: &str, path: &Path) -> Result<()> {
        let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        self.manager
            .set_file_status(
                id,
                filename,
                FileUpdate::status(FileStatus::Downloaded).with_file_size(size),
            )
            .await
    }
}

fn media_filename(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}
