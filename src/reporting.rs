//! Read-only status views for external collaborators
//!
//! Every report is computed from the job records and the heartbeat tracker
//! at call time; nothing here writes state. The structs serialize with serde
//! so a chat front end or an HTTP layer can render them as they like.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::manager::JobManager;
use crate::types::{FileCounts, FileStatus, Job, JobId, JobStatus, JobSummary, elapsed_exceeds};
use crate::Result;

/// Progress of one running job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveJob {
    /// Job id
    pub job_id: JobId,
    /// Current status
    pub status: JobStatus,
    /// File counts
    pub stats: FileCounts,
    /// Share of files in a terminal status, 0-100
    pub progress_percentage: f64,
    /// Last reported operation, when the job has a heartbeat
    pub operation: Option<String>,
    /// Bytes fetched so far
    pub bytes_processed: u64,
}

/// All running jobs
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveJobsReport {
    /// Number of running jobs
    pub active_jobs: usize,
    /// Files registered across running jobs
    pub files_in_progress: usize,
    /// Bytes fetched across running jobs
    pub bytes_processed: u64,
    /// One entry per running job, sorted by id
    pub jobs: Vec<ActiveJob>,
}

/// Timing and throughput of one job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobPerformance {
    /// Job id
    pub job_id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Bytes of all fetched files
    pub total_bytes: u64,
    /// Start of the job to its last finished download
    pub download_secs: f64,
    /// First to last finished upload
    pub upload_secs: f64,
    /// Start to end (or to now while running)
    pub total_secs: f64,
    /// Download throughput, 0 when the duration is unknown
    pub download_bytes_per_sec: f64,
    /// Upload throughput, 0 when the duration is unknown
    pub upload_bytes_per_sec: f64,
    /// File counts
    pub stats: FileCounts,
    /// Job-level failure reason
    pub error: Option<String>,
}

/// Overall health verdict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing needs attention
    Healthy,
    /// Stuck or corrupt jobs exist
    Warning,
}

/// A job needing attention
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    /// Job id
    pub job_id: JobId,
    /// What is wrong
    pub reason: String,
    /// Seconds since the job last made progress, when known
    pub idle_secs: Option<u64>,
}

/// Health of the whole pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Verdict
    pub status: HealthStatus,
    /// Jobs downloading or uploading
    pub active_jobs: usize,
    /// Active jobs without recent progress
    pub stuck_jobs: usize,
    /// Jobs in `Failed`
    pub failed_jobs: usize,
    /// Records that cannot be parsed
    pub corrupt_jobs: usize,
    /// Completed jobs as a share of finished jobs, 0-100 (100 when none finished)
    pub success_rate: f64,
    /// Bytes used by job directories
    pub storage_bytes: u64,
    /// Job records in the store
    pub job_count: usize,
    /// Stuck and corrupt jobs
    pub issues: Vec<HealthIssue>,
}

/// Totals for jobs started in a recent window
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodicReport {
    /// Window length
    pub window_hours: u32,
    /// Jobs started in the window
    pub total_jobs: usize,
    /// Of those, `Completed`
    pub completed: usize,
    /// Of those, `PartiallyCompleted`
    pub partially_completed: usize,
    /// Of those, `Failed`
    pub failed: usize,
    /// Files registered
    pub total_files: usize,
    /// Files uploaded
    pub uploaded_files: usize,
    /// Files failed
    pub failed_files: usize,
    /// Bytes of uploaded files
    pub bytes_uploaded: u64,
    /// Completed jobs as a share of jobs in the window, 0-100 (100 when empty)
    pub success_rate: f64,
}

/// Builds reports over the job store
pub struct Reporter {
    manager: Arc<JobManager>,
    config: MonitorConfig,
}

impl Reporter {
    /// Create a reporter; stuck jobs are judged with the monitor's thresholds
    pub fn new(manager: Arc<JobManager>, config: MonitorConfig) -> Self {
        Self { manager, config }
    }

    /// Snapshot of one job
    pub async fn job_summary(&self, id: &JobId, now: DateTime<Utc>) -> Result<JobSummary> {
        let job = self.manager.get_job(id).await?;
        Ok(JobSummary::of(&job, now))
    }

    /// Progress of every job that is downloading or uploading
    pub async fn active_jobs_report(&self) -> Result<ActiveJobsReport> {
        let scan = self.manager.list_jobs().await?;
        let mut report = ActiveJobsReport::default();

        for job in scan.jobs.into_iter().filter(|j| j.status.is_working()) {
            let stats = FileCounts::of(&job);
            let heartbeat = self.manager.heartbeat().get(&job.job_id).await;
            let progress_percentage = match &heartbeat {
                Some(info) => info.progress_percentage(),
                None if stats.total > 0 => {
                    job.terminal_file_count() as f64 / stats.total as f64 * 100.0
                }
                None => 0.0,
            };

            report.files_in_progress += stats.total;
            report.bytes_processed += job.bytes_processed();
            report.jobs.push(ActiveJob {
                job_id: job.job_id.clone(),
                status: job.status,
                stats,
                progress_percentage,
                operation: heartbeat.map(|info| info.operation),
                bytes_processed: job.bytes_processed(),
            });
        }

        report.jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        report.active_jobs = report.jobs.len();
        Ok(report)
    }

    /// Timing and throughput of one job as of `now`
    pub async fn job_performance(&self, id: &JobId, now: DateTime<Utc>) -> Result<JobPerformance> {
        let job = self.manager.get_job(id).await?;
        Ok(performance_of(&job, now))
    }

    /// Health of the pipeline as of `now`
    pub async fn system_health(&self, now: DateTime<Utc>) -> Result<SystemHealth> {
        let scan = self.manager.list_jobs().await?;
        let storage_bytes = self.manager.storage_usage().await?;
        let heartbeat = self.manager.heartbeat();

        let mut issues = Vec::new();
        let mut active_jobs = 0;
        for job in scan.jobs.iter().filter(|j| j.status.is_working()) {
            active_jobs += 1;

            let (stuck, since) = match heartbeat.get(&job.job_id).await {
                Some(info) => (
                    heartbeat
                        .is_stalled_at(&job.job_id, self.config.heartbeat_timeout, now)
                        .await,
                    info.last_progress,
                ),
                // nothing reported since this process started
                None => {
                    let since = job.last_activity();
                    (elapsed_exceeds(since, now, self.config.heartbeat_timeout), since)
                }
            };
            if stuck {
                issues.push(HealthIssue {
                    job_id: job.job_id.clone(),
                    reason: "stuck".to_string(),
                    idle_secs: Some(seconds_between(since, now) as u64),
                });
            }
        }
        let stuck_jobs = issues.len();

        for (id, reason) in &scan.corrupt {
            issues.push(HealthIssue {
                job_id: id.clone(),
                reason: format!("corrupt record: {reason}"),
                idle_secs: None,
            });
        }

        let completed = count_status(&scan.jobs, JobStatus::Completed);
        let failed_jobs = count_status(&scan.jobs, JobStatus::Failed);
        let finished = scan.jobs.iter().filter(|j| j.status.is_terminal()).count();

        let status = if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };

        Ok(SystemHealth {
            status,
            active_jobs,
            stuck_jobs,
            failed_jobs,
            corrupt_jobs: scan.corrupt.len(),
            success_rate: percentage(completed, finished),
            storage_bytes,
            job_count: scan.jobs.len() + scan.corrupt.len(),
            issues,
        })
    }

    /// Totals for jobs started within `hours` before `now`
    pub async fn periodic_report(&self, hours: u32, now: DateTime<Utc>) -> Result<PeriodicReport> {
        let cutoff = now - TimeDelta::hours(i64::from(hours));
        let scan = self.manager.list_jobs().await?;
        let jobs: Vec<&Job> = scan.jobs.iter().filter(|j| j.start_time >= cutoff).collect();

        let mut report = PeriodicReport {
            window_hours: hours,
            total_jobs: jobs.len(),
            ..PeriodicReport::default()
        };
        for job in &jobs {
            match job.status {
                JobStatus::Completed => report.completed += 1,
                JobStatus::PartiallyCompleted => report.partially_completed += 1,
                JobStatus::Failed => report.failed += 1,
                _ => {}
            }
            report.total_files += job.files.len();
            report.uploaded_files += job.count(FileStatus::Uploaded);
            report.failed_files += job.count(FileStatus::Failed);
            report.bytes_uploaded += job
                .files
                .values()
                .filter(|f| f.status == FileStatus::Uploaded)
                .map(|f| f.file_size)
                .sum::<u64>();
        }
        report.success_rate = percentage(report.completed, report.total_jobs);

        Ok(report)
    }
}

fn performance_of(job: &Job, now: DateTime<Utc>) -> JobPerformance {
    let total_bytes = job.bytes_processed();

    let last_download = job.files.values().filter_map(|f| f.download_time).max();
    let upload_times: Vec<DateTime<Utc>> =
        job.files.values().filter_map(|f| f.upload_time).collect();

    let download_secs = last_download.map_or(0.0, |end| seconds_between(job.start_time, end));
    let upload_secs = match (upload_times.iter().min(), upload_times.iter().max()) {
        (Some(first), Some(last)) => seconds_between(*first, *last),
        _ => 0.0,
    };

    JobPerformance {
        job_id: job.job_id.clone(),
        status: job.status,
        total_bytes,
        download_secs,
        upload_secs,
        total_secs: seconds_between(job.start_time, job.end_time.unwrap_or(now)),
        download_bytes_per_sec: rate(total_bytes, download_secs),
        upload_bytes_per_sec: rate(total_bytes, upload_secs),
        stats: FileCounts::of(job),
        error: job.error.clone(),
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

fn rate(bytes: u64, secs: f64) -> f64 {
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        100.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn count_status(jobs: &[Job], status: JobStatus) -> usize {
    jobs.iter().filter(|j| j.status == status).count()
}
