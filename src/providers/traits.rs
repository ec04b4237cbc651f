//! Traits for the external collaborators the pipeline calls into

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{FetchError, TransferError};

/// Downloads the media behind a source URL
///
/// Implementations write files into `dest` and return their paths. Failures
/// are classified by the provider; the pipeline records the classification as
/// the job's failure reason without second-guessing it.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Fetch everything behind `url` into `dest`
    ///
    /// An empty list means the source had nothing to download.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<Vec<PathBuf>, FetchError>;

    /// Get the name of this implementation
    fn name(&self) -> &'static str;
}

/// Delivers files and status text to the messaging endpoint
///
/// [`TransferError::RetryAfter`] and [`TransferError::TimedOut`] are retried by
/// the upload orchestrator; any other error fails the file.
#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Deliver the file at `path` with a caption
    async fn send_file(&self, path: &Path, caption: &str) -> Result<(), TransferError>;

    /// Deliver a plain status text
    async fn send_text(&self, text: &str) -> Result<(), TransferError>;
}

/// Outcome of a credential check
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    /// Whether fetches may proceed
    pub valid: bool,
    /// Diagnostic message when invalid
    pub reason: Option<String>,
}

impl AuthStatus {
    /// Credentials are usable
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    /// Credentials are unusable for `reason`
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Validates the session used by the fetch provider
///
/// The pipeline only gates fetch attempts on [`AuthStatus::valid`].
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Check the configured credentials
    async fn validate(&self) -> AuthStatus;
}
