//! # relay-dl
//!
//! Job-oriented fetch-and-relay pipeline: given a source URL, download the
//! media behind it with an external extraction tool, track every file durably
//! on disk, relay the results to a messaging endpoint and recover jobs that a
//! crash or restart left behind.
//!
//! ## Design Philosophy
//!
//! relay-dl is designed to be:
//! - **Durable** - Every status change is an atomic write of the job record
//! - **Recoverable** - Interrupted jobs are found and re-driven on startup
//! - **Library-first** - The chat front end and the transport are supplied by the embedder
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use relay_dl::providers::{FileTransport, NoAuth, GalleryDlFetcher};
//! use relay_dl::error::TransferError;
//! use relay_dl::{Config, Relay};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl FileTransport for Printer {
//!     async fn send_file(&self, path: &Path, caption: &str) -> Result<(), TransferError> {
//!         println!("{caption}: {}", path.display());
//!         Ok(())
//!     }
//!
//!     async fn send_text(&self, text: &str) -> Result<(), TransferError> {
//!         println!("{text}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = GalleryDlFetcher::from_path().ok_or("gallery-dl not installed")?;
//!     let relay = Relay::new(
//!         Config::default(),
//!         Arc::new(fetcher),
//!         Arc::new(Printer),
//!         Arc::new(NoAuth),
//!     )
//!     .await?;
//!
//!     // Subscribe to events
//!     let mut events = relay.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     relay.start().await?;
//!     let summary = relay.process("https://www.instagram.com/p/abc123/").await?;
//!     println!("{}: {:?}", summary.job_id, summary.status);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// In-memory liveness tracking
pub mod heartbeat;
/// Job manager, the single writer of job records
pub mod manager;
/// Stall monitor
pub mod monitor;
/// External collaborators (fetch tool, transport, auth)
pub mod providers;
/// Crash recovery
pub mod recovery;
/// Top-level pipeline
pub mod relay;
/// Status reports
pub mod reporting;
/// Retry logic with linear backoff
pub mod retry;
/// On-disk job store
pub mod store;
/// Download and upload orchestration
pub mod transfer;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, FetchError, JobError, Result, StoreError, TransferError};
pub use manager::JobManager;
pub use relay::Relay;
pub use types::{
    Event, FileCounts, FileRecord, FileStatus, Job, JobId, JobStatus, JobSummary,
};

/// Helper function to run the relay with graceful signal handling.
///
/// Starts the relay (recovery pass and stall monitor), waits for a termination
/// signal and then calls the relay's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use relay_dl::{Config, Relay, run_with_shutdown};
/// # use relay_dl::providers::FileTransport;
/// # use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn FileTransport>) -> Result<(), Box<dyn std::error::Error>> {
/// let relay = Relay::with_gallery_dl(Config::default(), transport).await?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(relay).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(relay: Relay) -> Result<()> {
    relay.start().await?;
    wait_for_signal().await;
    relay.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
