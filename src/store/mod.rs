//! Durable per-job state on disk
//!
//! Every job owns one directory under the configured `jobs_dir`:
//!
//! ```text
//! <jobs_dir>/<job_id>/
//!     job_state.json        the job record, replaced atomically on save
//!     job_state.json.bak    previous record, kept for operator rollback
//!     media/                files fetched and not yet relayed
//!     uploaded/             files the transport accepted
//!     failed/               files that will not be relayed
//! ```
//!
//! ## Submodules
//!
//! Methods on [`JobStore`] are organized by concern:
//! - [`records`] - create, load, save and backup rollback of job records
//! - [`layout`] - directory listing, media moves, storage usage, removal
//!
//! Only the [`JobManager`](crate::manager::JobManager) holds a store; everything
//! else changes job state through it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::types::{Job, JobId};

mod layout;
mod records;

/// Name of the job record inside a job directory
pub const STATE_FILE: &str = "job_state.json";
/// Suffix of the retained previous record
const BACKUP_SUFFIX: &str = ".bak";
/// Suffix of the record being written
const TEMP_SUFFIX: &str = ".tmp";

/// Per-job media subdirectory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaDir {
    /// Fetched, waiting to be relayed
    Media,
    /// Relayed successfully
    Uploaded,
    /// Given up on
    Failed,
}

impl MediaDir {
    /// Directory name inside the job directory
    pub fn as_str(self) -> &'static str {
        match self {
            MediaDir::Media => "media",
            MediaDir::Uploaded => "uploaded",
            MediaDir::Failed => "failed",
        }
    }

    const ALL: [MediaDir; 3] = [MediaDir::Media, MediaDir::Uploaded, MediaDir::Failed];
}

/// Result of scanning the jobs directory
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobListing {
    /// Directories holding a state record
    pub ids: BTreeSet<JobId>,
    /// Directories without a state record (left for the operator)
    pub orphaned: Vec<PathBuf>,
}

/// File-per-job store with an in-process cache
pub struct JobStore {
    root: PathBuf,
    keep_backup: bool,
    cache: Mutex<HashMap<JobId, Job>>,
}

impl JobStore {
    /// Open the store rooted at `config.jobs_dir`, creating the directory if needed
    pub async fn open(config: &StoreConfig) -> crate::Result<Self> {
        tokio::fs::create_dir_all(&config.jobs_dir).await?;

        tracing::debug!(root = %config.jobs_dir.display(), "Opened job store");

        Ok(Self {
            root: config.jobs_dir.clone(),
            keep_backup: config.keep_backup,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory holding the job directories
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one job
    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// One of the job's media subdirectories
    pub fn media_path(&self, id: &JobId, dir: MediaDir) -> PathBuf {
        self.job_dir(id).join(dir.as_str())
    }

    /// Path of the job's state record
    pub fn state_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(STATE_FILE)
    }

    fn backup_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(format!("{STATE_FILE}{BACKUP_SUFFIX}"))
    }

    fn temp_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(format!("{STATE_FILE}{TEMP_SUFFIX}"))
    }

    fn backup_temp_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(format!("{STATE_FILE}{BACKUP_SUFFIX}{TEMP_SUFFIX}"))
    }

    /// Drop a job from the in-process cache
    ///
    /// The next [`load`](Self::load) reads the record from disk again.
    pub async fn evict(&self, id: &JobId) {
        self.cache.lock().await.remove(id);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
