//! Top-level pipeline: construction, job processing, startup and shutdown.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::JobError;
use crate::heartbeat::HeartbeatTracker;
use crate::manager::{CleanupReport, JobManager};
use crate::monitor::StallMonitor;
use crate::providers::{
    AuthProvider, CookieFileAuth, FetchProvider, FileTransport, GalleryDlFetcher, NoAuth,
};
use crate::recovery::{RecoveryReport, RecoverySystem};
use crate::reporting::Reporter;
use crate::store::JobStore;
use crate::transfer::{DownloadOrchestrator, UploadOrchestrator};
use crate::types::{Event, FileStatus, JobId, JobStatus, JobSummary};
use crate::{Error, Result};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Fetch-and-relay pipeline (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Relay {
    config: Arc<Config>,
    manager: Arc<JobManager>,
    downloader: Arc<DownloadOrchestrator>,
    uploader: Arc<UploadOrchestrator>,
    recovery: Arc<RecoverySystem>,
    monitor: Arc<StallMonitor>,
    reporter: Arc<Reporter>,
    transport: Arc<dyn FileTransport>,
    shutdown_token: CancellationToken,
    monitor_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    accepting_new: Arc<AtomicBool>,
}

impl Relay {
    /// Build the pipeline over the given collaborators
    ///
    /// Validates the configuration and opens the job store. Nothing runs in
    /// the background until [`start`](Self::start).
    pub async fn new(
        config: Config,
        fetcher: Arc<dyn FetchProvider>,
        transport: Arc<dyn FileTransport>,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let store = JobStore::open(&config.store).await?;
        let heartbeat = Arc::new(HeartbeatTracker::new(config.monitor.progress_window));
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let manager = Arc::new(JobManager::new(store, heartbeat, event_tx));

        let downloader = Arc::new(DownloadOrchestrator::new(
            Arc::clone(&manager),
            fetcher,
            auth,
            config.retry.clone(),
            config.transfer.max_concurrent_downloads,
        ));
        let uploader = Arc::new(UploadOrchestrator::new(
            Arc::clone(&manager),
            Arc::clone(&transport),
            config.retry.clone(),
            config.transfer.max_file_size,
            config.transfer.max_concurrent_uploads,
        ));
        let recovery = Arc::new(RecoverySystem::new(
            Arc::clone(&manager),
            Arc::clone(&downloader),
            Arc::clone(&uploader),
            config.recovery.clone(),
            config.retry.max_retries,
        ));
        let monitor = Arc::new(StallMonitor::new(
            Arc::clone(&manager),
            Some(Arc::clone(&transport)),
            config.monitor.clone(),
        ));
        let reporter = Arc::new(Reporter::new(Arc::clone(&manager), config.monitor.clone()));

        tracing::info!(jobs_dir = %config.store.jobs_dir.display(), "Relay ready");

        Ok(Self {
            config: Arc::new(config),
            manager,
            downloader,
            uploader,
            recovery,
            monitor,
            reporter,
            transport,
            shutdown_token: CancellationToken::new(),
            monitor_task: Arc::new(Mutex::new(None)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Build the pipeline with gallery-dl as the fetch provider
    ///
    /// When a cookie file is configured it also gates every fetch.
    pub async fn with_gallery_dl(config: Config, transport: Arc<dyn FileTransport>) -> Result<Self> {
        let fetcher = GalleryDlFetcher::from_config(&config.fetch)
            .ok_or_else(|| Error::ExternalTool("gallery-dl binary not found".to_string()))?;
        let auth: Arc<dyn AuthProvider> = match &config.fetch.cookies_file {
            Some(path) => Arc::new(CookieFileAuth::new(path)),
            None => Arc::new(NoAuth),
        };
        Self::new(config, Arc::new(fetcher), transport, auth).await
    }

    /// Subscribe to job lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.manager.subscribe()
    }

    /// The job manager, for direct status queries and operator actions
    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    /// Status views
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Recover interrupted jobs (if configured) and start the stall monitor
    ///
    /// Returns the recovery report when a recovery pass ran.
    pub async fn start(&self) -> Result<Option<RecoveryReport>> {
        let report = if self.config.recovery.recover_on_startup {
            Some(self.recover().await?)
        } else {
            None
        };

        let mut task = self.monitor_task.lock().await;
        if task.is_none() {
            *task = Some(Arc::clone(&self.monitor).spawn(self.shutdown_token.child_token()));
        }
        Ok(report)
    }

    /// Fetch and relay everything behind `source_url`, waiting for the outcome
    pub async fn process(&self, source_url: &str) -> Result<JobSummary> {
        let id = self.create(source_url).await?;
        self.run_job(&id).await?;
        self.reporter.job_summary(&id, Utc::now()).await
    }

    /// Create a job for `source_url` and process it in the background
    ///
    /// Progress is visible through [`subscribe`](Self::subscribe) and the
    /// job record.
    pub async fn submit(&self, source_url: &str) -> Result<JobId> {
        let id = self.create(source_url).await?;
        let relay = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.run_job(&job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "Job processing failed");
            }
        });
        Ok(id)
    }

    /// Drive an existing job through download, upload and finalization
    ///
    /// Returns the job's status afterwards. A job left with files in flight
    /// (for example after a store error on one file) stays open for recovery.
    pub async fn run_job(&self, id: &JobId) -> Result<JobStatus> {
        self.downloader.download_job(id).await?;

        let job = self.manager.get_job(id).await?;
        if !job.status.is_terminal() {
            self.uploader.upload_job(id).await?;
            match self.manager.finalize_job(id).await {
                Ok(_) => {}
                Err(Error::Job(JobError::Incomplete { in_flight, .. })) => {
                    tracing::warn!(job_id = %id, in_flight, "Job left with files in flight");
                }
                Err(e) => return Err(e),
            }
        }

        let job = self.manager.get_job(id).await?;
        if job.status.is_terminal() {
            self.notify_finished(id).await;
        }
        Ok(job.status)
    }

    /// Run a recovery pass now
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.recovery.recover_all(Utc::now()).await
    }

    /// Remove finished jobs older than the configured age
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.manager
            .cleanup_finished(self.config.cleanup.finished_job_age, Utc::now())
            .await
    }

    /// Stop accepting jobs and stop the stall monitor
    ///
    /// Jobs already running are not interrupted; anything they leave
    /// unfinished is picked up by the next recovery pass.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);
        self.shutdown_token.cancel();

        let task = self.monitor_task.lock().await.take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Stall monitor task ended abnormally");
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }

    async fn create(&self, source_url: &str) -> Result<JobId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        self.manager.create_job(source_url).await
    }

    /// Send a short outcome text through the transport
    async fn notify_finished(&self, id: &JobId) {
        let job = match self.manager.get_job(id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Cannot read job for notification");
                return;
            }
        };

        let mut text = format!(
            "Job {id} {}: {}/{} files uploaded",
            job.status,
            job.count(FileStatus::Uploaded),
            job.files.len()
        );
        if let Some(error) = &job.error {
            text.push_str(&format!(" ({error})"));
        }

        if let Err(e) = self.transport.send_text(&text).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to send job notification");
        }
    }
}
