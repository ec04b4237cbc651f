//! Scripted collaborators standing in for the fetch tool, transport and session check

use async_trait::async_trait;
use relay_dl::error::{FetchError, TransferError};
use relay_dl::providers::{AuthProvider, AuthStatus, FetchProvider, FileTransport};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// Fetcher that writes fixed files into the destination, or fails
pub struct ScriptedFetcher {
    files: Vec<(String, usize)>,
    error: Option<FetchError>,
    calls: Mutex<u32>,
}

impl ScriptedFetcher {
    /// Produce `files` (name, size) on every call
    pub fn with_files(files: &[(&str, usize)]) -> Self {
        Self {
            files: files.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            error: None,
            calls: Mutex::new(0),
        }
    }

    /// Fail every call with `error`
    pub fn failing(error: FetchError) -> Self {
        Self {
            files: Vec::new(),
            error: Some(error),
            calls: Mutex::new(0),
        }
    }

    pub async fn calls(&self) -> u32 {
        *self.calls.lock().await
    }
}

#[async_trait]
impl FetchProvider for ScriptedFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<Vec<PathBuf>, FetchError> {
        *self.calls.lock().await += 1;
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| FetchError::Unknown(e.to_string()))?;
        let mut paths = Vec::new();
        for (name, size) in &self.files {
            let path = dest.join(name);
            tokio::fs::write(&path, vec![7u8; *size])
                .await
                .map_err(|e| FetchError::Unknown(e.to_string()))?;
            paths.push(path);
        }
        Ok(paths)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Transport that records deliveries; named files fail permanently
#[derive(Default)]
pub struct ScriptedTransport {
    rejected: HashSet<String>,
    delay: Option<Duration>,
    attempts: Mutex<HashMap<String, u32>>,
    sent: Mutex<Vec<String>>,
    texts: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject these files with a permanent error
    pub fn rejecting(names: &[&str]) -> Self {
        Self {
            rejected: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Hold every file send for `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<String> {
        let mut sent = self.sent.lock().await.clone();
        sent.sort();
        sent
    }

    pub async fn attempts(&self, name: &str) -> u32 {
        self.attempts.lock().await.get(name).copied().unwrap_or(0)
    }

    pub async fn texts(&self) -> Vec<String> {
        self.texts.lock().await.clone()
    }
}

#[async_trait]
impl FileTransport for ScriptedTransport {
    async fn send_file(&self, path: &Path, _caption: &str) -> Result<(), TransferError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        *self.attempts.lock().await.entry(name.clone()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected.contains(&name) {
            return Err(TransferError::Failed(format!("{name} rejected by endpoint")));
        }

        self.sent.lock().await.push(name);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), TransferError> {
        self.texts.lock().await.push(text.to_string());
        Ok(())
    }
}

/// Session check with a fixed answer
pub struct StaticAuth(AuthStatus);

impl StaticAuth {
    pub fn valid() -> Self {
        Self(AuthStatus::valid())
    }

    pub fn invalid(reason: &str) -> Self {
        Self(AuthStatus::invalid(reason))
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn validate(&self) -> AuthStatus {
        self.0.clone()
    }
}
