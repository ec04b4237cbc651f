//! Relay construction for tests

use super::mocks::{ScriptedFetcher, ScriptedTransport, StaticAuth};
use relay_dl::config::RetryConfig;
use relay_dl::{Config, Relay};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Config rooted in `root` with millisecond retry waits
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.store.jobs_dir = root.join("jobs");
    config.retry = RetryConfig {
        max_retries: 3,
        backoff_step: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter: false,
    };
    config.recovery.recover_on_startup = false;
    config
}

/// Relay over the given mocks with a valid session
pub async fn create_relay(
    config: Config,
    fetcher: Arc<ScriptedFetcher>,
    transport: Arc<ScriptedTransport>,
) -> Relay {
    Relay::new(config, fetcher, transport, Arc::new(StaticAuth::valid()))
        .await
        .expect("relay construction failed")
}

/// Relay in a fresh temp directory
///
/// Returns the relay and the tempdir (which must be kept alive).
pub async fn create_test_relay(
    fetcher: Arc<ScriptedFetcher>,
    transport: Arc<ScriptedTransport>,
) -> (Relay, TempDir) {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let relay = create_relay(test_config(temp_dir.path()), fetcher, transport).await;
    (relay, temp_dir)
}
