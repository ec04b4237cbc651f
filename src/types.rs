//! Core types for relay-dl

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::StoreError;

/// Longest job id accepted when parsing (ids double as directory names)
const MAX_JOB_ID_LEN: usize = 128;

/// Unique identifier for a job
///
/// Generated ids look like `job_20260119_142501_3fa9c1`: the creation second
/// followed by a random 24-bit suffix, so two jobs created in the same second
/// do not collide. Parsed ids are restricted to `[A-Za-z0-9_.-]` because every
/// id is also the name of the job's directory on disk.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id for a job created at `now`
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
        Self(format!("job_{}_{:06x}", now.format("%Y%m%d_%H%M%S"), suffix))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= MAX_JOB_ID_LEN
            && s != "."
            && s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(StoreError::InvalidJobId { id: s.to_string() })
        }
    }
}

impl TryFrom<String> for JobId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, fetch not started yet
    Pending,
    /// Fetch provider is running
    Downloading,
    /// Downloaded files are being relayed
    Uploading,
    /// Transient state while an interrupted job is re-driven
    Recovering,
    /// Every file uploaded
    Completed,
    /// Every file failed, or the job failed as a whole
    Failed,
    /// Found inactive by a recovery scan
    Interrupted,
    /// Some files uploaded, some failed
    PartiallyCompleted,
}

impl JobStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::PartiallyCompleted
        )
    }

    /// Statuses in which a transfer is expected to be making progress
    pub fn is_working(self) -> bool {
        matches!(self, JobStatus::Downloading | JobStatus::Uploading)
    }

    /// Whether the job state machine permits moving from `self` to `next`
    ///
    /// Re-asserting the current status is always permitted.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        if self == next {
            return true;
        }

        match self {
            Pending => matches!(next, Downloading | Uploading | Failed),
            Downloading | Uploading => !matches!(next, Pending | Recovering),
            Interrupted => matches!(next, Recovering | Failed | Completed | PartiallyCompleted),
            Recovering => !matches!(next, Pending),
            Completed | Failed | PartiallyCompleted => false,
        }
    }

    /// Stable lowercase name, identical to the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Uploading => "uploading",
            JobStatus::Recovering => "recovering",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Interrupted => "interrupted",
            JobStatus::PartiallyCompleted => "partially_completed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Registered, nothing fetched yet
    Pending,
    /// Being fetched
    Downloading,
    /// On disk in the job's media directory
    Downloaded,
    /// Claimed by an upload orchestrator
    Uploading,
    /// Delivered to the transport
    Uploaded,
    /// Gave up on this file
    Failed,
}

impl FileStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Uploaded | FileStatus::Failed)
    }

    /// Whether the file state machine permits moving from `self` to `next`
    ///
    /// `Uploading -> Downloaded` is the requeue edge used by recovery when an
    /// upload was interrupted. Re-asserting the current status is permitted
    /// so retry bookkeeping can be written without changing status.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;

        if self == next {
            return true;
        }

        match self {
            Pending => matches!(next, Downloading | Downloaded | Failed),
            Downloading => matches!(next, Downloaded | Failed),
            Downloaded => matches!(next, Uploading | Failed),
            Uploading => matches!(next, Uploaded | Failed | Downloaded),
            Uploaded | Failed => false,
        }
    }

    /// Stable lowercase name, identical to the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Downloading => "downloading",
            FileStatus::Downloaded => "downloaded",
            FileStatus::Uploading => "uploading",
            FileStatus::Uploaded => "uploaded",
            FileStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One media file inside a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File name inside the job's media directory (unique within the job)
    pub filename: String,
    /// The sub-resource this file came from
    pub original_url: String,
    /// Current status
    pub status: FileStatus,
    /// When the file reached `Downloaded` (or failed while downloading)
    #[serde(default)]
    pub download_time: Option<DateTime<Utc>>,
    /// When the file reached `Uploaded` (or failed while uploading)
    #[serde(default)]
    pub upload_time: Option<DateTime<Utc>>,
    /// Failed attempts of the current operation that led to a retry
    #[serde(default)]
    pub retries: u32,
    /// Last failure reason
    #[serde(default)]
    pub error: Option<String>,
    /// Size in bytes (0 until known)
    #[serde(default)]
    pub file_size: u64,
}

impl FileRecord {
    /// New `Pending` record
    pub fn new(filename: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            original_url: original_url.into(),
            status: FileStatus::Pending,
            download_time: None,
            upload_time: None,
            retries: 0,
            error: None,
            file_size: 0,
        }
    }

    /// Most recent timestamp recorded on this file
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        match (self.download_time, self.upload_time) {
            (Some(d), Some(u)) => Some(d.max(u)),
            (d, u) => d.or(u),
        }
    }
}

/// One fetch-and-relay unit of work, persisted as a single record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id, also the job's directory name
    pub job_id: JobId,
    /// The subject to fetch
    pub source_url: String,
    /// Current status
    pub status: JobStatus,
    /// Files keyed by filename
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
    /// Creation time
    pub start_time: DateTime<Utc>,
    /// Set when the job reaches a terminal status
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Job-level failure reason
    #[serde(default)]
    pub error: Option<String>,
    /// Number of files the fetch provider reported
    #[serde(default)]
    pub expected_file_count: u32,
    /// Most recent progress signal written with the record
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Job {
    /// New `Pending` job with no files
    pub fn new(job_id: JobId, source_url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            source_url: source_url.into(),
            status: JobStatus::Pending,
            files: BTreeMap::new(),
            start_time: now,
            end_time: None,
            error: None,
            expected_file_count: 0,
            last_heartbeat: None,
        }
    }

    /// Latest of heartbeat, file download/upload times and start time
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.files
            .values()
            .filter_map(FileRecord::last_activity)
            .chain(self.last_heartbeat)
            .fold(self.start_time, |latest, t| latest.max(t))
    }

    /// Number of files currently in `status`
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.values().filter(|f| f.status == status).count()
    }

    /// Number of files in `Uploaded` or `Failed`
    pub fn terminal_file_count(&self) -> usize {
        self.files.values().filter(|f| f.status.is_terminal()).count()
    }

    /// Bytes of every file that made it to disk
    pub fn bytes_processed(&self) -> u64 {
        self.files
            .values()
            .filter(|f| {
                matches!(
                    f.status,
                    FileStatus::Downloaded | FileStatus::Uploading | FileStatus::Uploaded
                )
            })
            .map(|f| f.file_size)
            .sum()
    }

    /// Terminal status implied by the file outcomes
    ///
    /// `None` while any file is still in flight. A job without files is
    /// `Failed`: there is nothing it could have relayed.
    pub fn aggregate_status(&self) -> Option<JobStatus> {
        if self.files.values().any(|f| !f.status.is_terminal()) {
            return None;
        }

        let uploaded = self.count(FileStatus::Uploaded);
        let status = if self.files.is_empty() || uploaded == 0 {
            JobStatus::Failed
        } else if uploaded == self.files.len() {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyCompleted
        };
        Some(status)
    }

    /// Filenames in natural media order (`post_2of5.jpg` before `post_10of12.jpg`)
    pub fn ordered_filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort_by(|a, b| media_index(a).cmp(&media_index(b)).then_with(|| a.cmp(b)));
        names
    }
}

/// Leading number of the last `_`-separated part of the file stem (`0` if none)
fn media_index(filename: &str) -> u64 {
    let stem = filename.split('.').next().unwrap_or(filename);
    let last = stem.rsplit('_').next().unwrap_or(stem);
    let digits: String = last.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Whether more than `limit` passed between `since` and `now`
///
/// A `since` in the future never counts as elapsed.
pub(crate) fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    (now - since).to_std().is_ok_and(|elapsed| elapsed > limit)
}

/// Fields a caller may change on a file, alongside its status
///
/// Timestamps are not settable: the job manager stamps `download_time` and
/// `upload_time` itself according to the transition being recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct FileUpdate {
    /// Target status
    pub status: FileStatus,
    /// Failure reason to record
    pub error: Option<String>,
    /// Size in bytes, once known
    pub file_size: Option<u64>,
    /// Count a failed attempt of the current operation
    pub count_retry: bool,
}

impl FileUpdate {
    /// Update to `status` with no other changes
    pub fn status(status: FileStatus) -> Self {
        Self {
            status,
            error: None,
            file_size: None,
            count_retry: false,
        }
    }

    /// Record a failure reason
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Record the file size
    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(bytes);
        self
    }

    /// Increment the retry counter
    pub fn retry(mut self) -> Self {
        self.count_retry = true;
        self
    }
}

/// Per-status file counts for one job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    /// All files
    pub total: usize,
    /// `Pending` or `Downloading`
    pub pending: usize,
    /// `Downloaded`
    pub downloaded: usize,
    /// `Uploading`
    pub uploading: usize,
    /// `Uploaded`
    pub uploaded: usize,
    /// `Failed`
    pub failed: usize,
}

impl FileCounts {
    /// Tally the files of `job`
    pub fn of(job: &Job) -> Self {
        Self {
            total: job.files.len(),
            pending: job.count(FileStatus::Pending) + job.count(FileStatus::Downloading),
            downloaded: job.count(FileStatus::Downloaded),
            uploading: job.count(FileStatus::Uploading),
            uploaded: job.count(FileStatus::Uploaded),
            failed: job.count(FileStatus::Failed),
        }
    }
}

/// Read-only snapshot of one job for status views
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job id
    pub job_id: JobId,
    /// Current status
    pub status: JobStatus,
    /// The subject being fetched
    pub source_url: String,
    /// File counts
    pub stats: FileCounts,
    /// Seconds from start to end (or to now while running)
    pub duration_secs: f64,
    /// Job-level failure reason
    pub error: Option<String>,
    /// Filenames in natural media order
    pub files: Vec<String>,
}

impl JobSummary {
    /// Summarize `job` as of `now`
    pub fn of(job: &Job, now: DateTime<Utc>) -> Self {
        let end = job.end_time.unwrap_or(now);
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            source_url: job.source_url.clone(),
            stats: FileCounts::of(job),
            duration_secs: (end - job.start_time).num_milliseconds() as f64 / 1000.0,
            error: job.error.clone(),
            files: job.ordered_filenames(),
        }
    }
}

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job record created
    JobCreated {
        /// Job id
        id: JobId,
        /// Source URL
        source_url: String,
    },

    /// Job moved to a new status
    JobStatusChanged {
        /// Job id
        id: JobId,
        /// New status
        status: JobStatus,
    },

    /// File moved to a new status
    FileStatusChanged {
        /// Job id
        id: JobId,
        /// File name
        filename: String,
        /// New status
        status: FileStatus,
    },

    /// Job reached a terminal status
    JobFinished {
        /// Job id
        id: JobId,
        /// Terminal status
        status: JobStatus,
        /// Files uploaded
        uploaded: usize,
        /// Files failed
        failed: usize,
    },

    /// Stall monitor failed a job for inactivity
    JobStalled {
        /// Job id
        id: JobId,
        /// Seconds without progress
        idle_secs: u64,
    },

    /// A stored record could not be parsed; operator attention required
    CorruptJob {
        /// Job id
        id: JobId,
        /// Parse error
        reason: String,
    },

    /// Whole-job recovery failed
    RecoveryFailed {
        /// Job id
        id: JobId,
        /// Error message
        error: String,
    },
}
