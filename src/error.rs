//! Error types for relay-dl
//!
//! This module provides the error taxonomy for the library:
//! - Store errors (missing, duplicate or corrupt job records)
//! - Job state errors (unknown job/file, rejected transitions)
//! - Fetch provider classifications (auth required, not found, rate limited)
//! - Transport conditions (retry-after, timed out), two of which are transient
//!
//! Failures that end a job are not propagated to external collaborators as
//! errors; they are written into the job's `error` field. These types are for
//! the calling code inside the process.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{FileStatus, JobId, JobStatus};

/// Result type alias for relay-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for relay-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.max_concurrent_uploads")
        key: Option<String>,
    },

    /// Job store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Job or file state error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Fetch provider failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// File transport failed
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Source URL could not be parsed
    #[error("invalid source URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (gallery-dl)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Job store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for this job
    #[error("job {id} not found")]
    NotFound {
        /// The job id that was not found
        id: JobId,
    },

    /// The job directory already exists
    #[error("job {id} already exists at {path}")]
    AlreadyExists {
        /// The job id being created
        id: JobId,
        /// The existing directory
        path: PathBuf,
    },

    /// The record exists but cannot be parsed or does not match its directory
    #[error("job {id} has a corrupt state record at {path}: {reason}")]
    Corrupt {
        /// The job whose record is unreadable
        id: JobId,
        /// The state file
        path: PathBuf,
        /// Parse or validation message
        reason: String,
    },

    /// A string that cannot be used as a job id
    #[error("invalid job id {id:?}")]
    InvalidJobId {
        /// The rejected value
        id: String,
    },
}

/// Job and file state errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Job does not exist
    #[error("unknown job {id}")]
    UnknownJob {
        /// The job id
        id: JobId,
    },

    /// File is not registered in the job
    #[error("unknown file {filename} in job {id}")]
    UnknownFile {
        /// The job id
        id: JobId,
        /// The missing file name
        filename: String,
    },

    /// File name already registered in the job
    #[error("file {filename} already registered in job {id}")]
    DuplicateFile {
        /// The job id
        id: JobId,
        /// The duplicate file name
        filename: String,
    },

    /// File name would escape the job's media directory
    #[error("invalid file name {filename:?}")]
    InvalidFilename {
        /// The rejected name
        filename: String,
    },

    /// Job status transition not permitted by the state machine
    #[error("cannot move job {id} from {from} to {to}")]
    InvalidJobTransition {
        /// The job id
        id: JobId,
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// File status transition not permitted by the state machine
    #[error("cannot move file {filename} in job {id} from {from} to {to}")]
    InvalidFileTransition {
        /// The job id
        id: JobId,
        /// The file name
        filename: String,
        /// Current status
        from: FileStatus,
        /// Requested status
        to: FileStatus,
    },

    /// Finalization requested while files are still in flight
    #[error("job {id} still has {in_flight} file(s) in flight")]
    Incomplete {
        /// The job id
        id: JobId,
        /// Number of non-terminal files
        in_flight: usize,
    },
}

/// Fetch provider failure, already classified by the provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source requires a valid session
    #[error("login required: {0}")]
    AuthRequired(String),

    /// The content does not exist or is not visible
    #[error("content not found: {0}")]
    NotFound(String),

    /// The source is throttling requests
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Anything else
    #[error("download failed: {0}")]
    Unknown(String),
}

/// Transport failure while delivering a file or status text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The endpoint asked us to wait before retrying
    #[error("retry after {}s", .0.as_secs())]
    RetryAfter(Duration),

    /// The request timed out
    #[error("timed out")]
    TimedOut,

    /// The local file is gone
    #[error("file not found: {}", .0.display())]
    FileMissing(PathBuf),

    /// Permanent failure
    #[error("{0}")]
    Failed(String),
}

impl Error {
    /// Machine-readable code for external collaborators rendering a failure
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Store(e) => match e {
                StoreError::NotFound { .. } => "job_not_found",
                StoreError::AlreadyExists { .. } => "job_exists",
                StoreError::Corrupt { .. } => "store_corrupt",
                StoreError::InvalidJobId { .. } => "invalid_job_id",
            },
            Error::Job(e) => match e {
                JobError::UnknownJob { .. } => "unknown_job",
                JobError::UnknownFile { .. } => "unknown_file",
                JobError::DuplicateFile { .. } => "duplicate_file",
                JobError::InvalidFilename { .. } => "invalid_filename",
                JobError::InvalidJobTransition { .. } => "invalid_job_transition",
                JobError::InvalidFileTransition { .. } => "invalid_file_transition",
                JobError::Incomplete { .. } => "job_incomplete",
            },
            Error::Fetch(e) => match e {
                FetchError::AuthRequired(_) => "auth_required",
                FetchError::NotFound(_) => "content_not_found",
                FetchError::RateLimited(_) => "rate_limited",
                FetchError::Unknown(_) => "fetch_failed",
            },
            Error::Transfer(e) => match e {
                TransferError::RetryAfter(_) => "retry_after",
                TransferError::TimedOut => "timed_out",
                TransferError::FileMissing(_) => "file_missing",
                TransferError::Failed(_) => "transfer_failed",
            },
            Error::InvalidUrl { .. } => "invalid_url",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }

    /// True when the store holds a record that cannot be trusted
    ///
    /// Callers must surface these to an operator instead of treating the job
    /// as absent.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Store(StoreError::Corrupt { .. }))
    }
}
