//! Download and upload orchestration
//!
//! The orchestrators drive the external collaborators and report every
//! outcome through [`JobManager`](crate::manager::JobManager); they never
//! write job records themselves.
//!
//! - [`download`] - Auth gate, fetch provider invocation, file registration
//! - [`upload`] - Upload claims, size gate, retried delivery, media archiving

pub mod download;
pub mod upload;


pub use download::DownloadOrchestrator;
pub use upload::UploadOrchestrator;

/// Per-file outcome counts of one orchestrator pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Files that reached the desired status
    pub succeeded: usize,
    /// Files marked `Failed`
    pub failed: usize,
}

impl TransferSummary {
    /// Files handled in this pass
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}
