//! Stall monitor
//!
//! Periodically asks the heartbeat tracker for stalled jobs and fails them.
//! The in-flight transfer is not cancelled: it finishes or fails on its own
//! and its late writes are ignored because the job is already terminal.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::manager::JobManager;
use crate::providers::FileTransport;
use crate::types::{Event, JobId, JobStatus};
use crate::Result;

/// Fails jobs that stopped reporting progress
pub struct StallMonitor {
    manager: Arc<JobManager>,
    notifier: Option<Arc<dyn FileTransport>>,
    config: MonitorConfig,
}

impl StallMonitor {
    /// Create a monitor; `notifier` receives a status text for each stalled job
    pub fn new(
        manager: Arc<JobManager>,
        notifier: Option<Arc<dyn FileTransport>>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            manager,
            notifier,
            config,
        }
    }

    /// Spawn the check loop until `cancel` fires
    ///
    /// Cancellation stops further checks; a check already running completes.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run the check loop until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            check_interval_secs = self.config.check_interval.as_secs(),
            heartbeat_timeout_secs = self.config.heartbeat_timeout.as_secs(),
            "Stall monitor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stall monitor stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.check_once(Utc::now()).await {
                        tracing::error!(error = %e, "Stall check failed");
                    }
                }
            }
        }
    }

    /// Fail every working job the tracker reports as stalled at `now`
    ///
    /// Returns the jobs that were failed.
    pub async fn check_once(&self, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let heartbeat = self.manager.heartbeat();
        let stalled = heartbeat
            .stalled_jobs_at(self.config.heartbeat_timeout, now)
            .await;

        let mut failed = Vec::new();
        for id in stalled {
            let Some(info) = heartbeat.get(&id).await else {
                continue;
            };
            let job = match self.manager.get_job(&id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Dropping heartbeat of unreadable job");
                    heartbeat.remove(&id).await;
                    continue;
                }
            };
            if !(job.status.is_working() || job.status == JobStatus::Recovering) {
                heartbeat.remove(&id).await;
                continue;
            }

            let idle_secs = (now - info.last_progress).num_seconds().max(0) as u64;
            let reason = format!("Job stuck - no progress for {idle_secs} seconds");
            tracing::warn!(
                job_id = %id,
                idle_secs,
                operation = %info.operation,
                "Job stalled, marking failed"
            );

            self.manager.fail_job(&id, reason.clone()).await?;
            heartbeat.remove(&id).await;
            self.manager.emit(Event::JobStalled {
                id: id.clone(),
                idle_secs,
            });
            self.notify(&id, &reason).await;
            failed.push(id);
        }

        Ok(failed)
    }

    async fn notify(&self, id: &JobId, reason: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.send_text(&format!("Job {id} failed: {reason}")).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to send stall notification");
        }
    }
}
