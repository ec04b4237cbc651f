//! Shared test helpers: a manager over a temp directory and scripted collaborators.

use crate::config::{RetryConfig, StoreConfig};
use crate::error::{FetchError, TransferError};
use crate::heartbeat::HeartbeatTracker;
use crate::manager::JobManager;
use crate::providers::{AuthProvider, AuthStatus, FetchProvider, FileTransport};
use crate::store::JobStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Mutex;

/// Helper to create a test JobManager with its store under a temp directory.
/// Returns the manager and the tempdir (which must be kept alive).
/// Job directories live in `<tempdir>/jobs`.
pub(crate) async fn create_test_manager() -> (Arc<JobManager>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = StoreConfig {
        jobs_dir: temp_dir.path().join("jobs"),
        ..StoreConfig::default()
    };

    let store = JobStore::open(&config).await.unwrap();
    let heartbeat = Arc::new(HeartbeatTracker::new(Duration::from_secs(30)));
    let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

    (
        Arc::new(JobManager::new(store, heartbeat, event_tx)),
        temp_dir,
    )
}

/// Retry settings with millisecond waits
pub(crate) fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        backoff_step: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter: false,
    }
}

/// Counts calls currently in progress and remembers the highest count seen
#[derive(Default)]
pub(crate) struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Fetcher that writes a fixed set of files, after failing with scripted errors
pub(crate) struct MockFetcher {
    files: Vec<(String, Vec<u8>)>,
    errors: Mutex<VecDeque<FetchError>>,
    calls: Mutex<u32>,
    delay: Option<Duration>,
    in_flight: InFlight,
}

impl MockFetcher {
    pub(crate) fn with_files(files: &[(&str, usize)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, size)| (name.to_string(), vec![0u8; *size]))
                .collect(),
            errors: Mutex::new(VecDeque::new()),
            calls: Mutex::new(0),
            delay: None,
            in_flight: InFlight::default(),
        }
    }

    /// Hold every fetch for `delay`
    pub(crate) fn slow(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    /// Most fetches seen running at the same time
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    /// Fail the next calls with `errors`, in order
    pub(crate) fn failing_first(self, errors: Vec<FetchError>) -> Self {
        Self {
            errors: Mutex::new(errors.into()),
            ..self
        }
    }

    pub(crate) async fn calls(&self) -> u32 {
        *self.calls.lock().await
    }
}

#[async_trait]
impl FetchProvider for MockFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<Vec<PathBuf>, FetchError> {
        *self.calls.lock().await += 1;
        if let Some(delay) = self.delay {
            self.in_flight.enter();
            tokio::time::sleep(delay).await;
            self.in_flight.exit();
        }
        if let Some(error) = self.errors.lock().await.pop_front() {
            return Err(error);
        }

        tokio::fs::create_dir_all(dest).await.unwrap();
        let mut paths = Vec::new();
        for (name, bytes) in &self.files {
            let path = dest.join(name);
            tokio::fs::write(&path, bytes).await.unwrap();
            paths.push(path);
        }
        Ok(paths)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Transport that records deliveries and fails files as scripted
#[derive(Default)]
pub(crate) struct MockTransport {
    /// Errors returned for a file name before sends of it succeed
    scripted: Mutex<HashMap<String, VecDeque<TransferError>>>,
    /// Files that fail every attempt
    always: Mutex<HashMap<String, TransferError>>,
    attempts: Mutex<HashMap<String, u32>>,
    sent: Mutex<Vec<(String, String)>>,
    texts: Mutex<Vec<String>>,
    /// Hold every send for this long
    delay: Option<Duration>,
    in_flight: InFlight,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) async fn fail_times(&self, filename: &str, error: TransferError, times: usize) {
        self.scripted
            .lock()
            .await
            .insert(filename.to_string(), std::iter::repeat_n(error, times).collect());
    }

    pub(crate) async fn fail_always(&self, filename: &str, error: TransferError) {
        self.always.lock().await.insert(filename.to_string(), error);
    }

    pub(crate) async fn attempts(&self, filename: &str) -> u32 {
        self.attempts.lock().await.get(filename).copied().unwrap_or(0)
    }

    /// Names of delivered files, in delivery order
    pub(crate) async fn sent_files(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(f, _)| f.clone()).collect()
    }

    pub(crate) async fn captions(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, c)| c.clone()).collect()
    }

    pub(crate) async fn texts(&self) -> Vec<String> {
        self.texts.lock().await.clone()
    }

    /// Most file sends seen running at the same time
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }
}

#[async_trait]
impl FileTransport for MockTransport {
    async fn send_file(&self, path: &Path, caption: &str) -> Result<(), TransferError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        *self.attempts.lock().await.entry(name.clone()).or_default() += 1;

        if let Some(delay) = self.delay {
            self.in_flight.enter();
            tokio::time::sleep(delay).await;
            self.in_flight.exit();
        }
        if let Some(error) = self.always.lock().await.get(&name) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .scripted
            .lock()
            .await
            .get_mut(&name)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }

        self.sent.lock().await.push((name, caption.to_string()));
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), TransferError> {
        self.texts.lock().await.push(text.to_string());
        Ok(())
    }
}

/// Auth provider with a fixed answer
pub(crate) struct StaticAuth(pub(crate) AuthStatus);

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn validate(&self) -> AuthStatus {
        self.0.clone()
    }
}
