//! Fetch provider backed by the external gallery-dl binary

use super::traits::FetchProvider;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// Metadata written next to the media by `--write-metadata`
const METADATA_EXTENSIONS: [&str; 2] = ["json", "txt"];

/// Fetch provider that runs gallery-dl
///
/// The tool is invoked as
/// `gallery-dl --write-metadata -D <dest> --verbose [--config <file>] [--cookies <file>] [extra args] <url>`
/// and every non-metadata file left in `dest` is reported as downloaded.
///
/// # Examples
///
/// ```no_run
/// use relay_dl::providers::{FetchProvider, GalleryDlFetcher};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = GalleryDlFetcher::from_path().expect("gallery-dl not found in PATH");
/// let files = fetcher
///     .fetch("https://www.instagram.com/p/abc/", Path::new("downloads/jobs/x/media"))
///     .await?;
/// println!("{} files", files.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GalleryDlFetcher {
    binary_path: PathBuf,
    config_file: Option<PathBuf>,
    cookies_file: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl GalleryDlFetcher {
    /// Create a fetcher with an explicit binary path and no extra options
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            config_file: None,
            cookies_file: None,
            extra_args: Vec::new(),
        }
    }

    /// Attempt to find gallery-dl in PATH
    pub fn from_path() -> Option<Self> {
        which::which("gallery-dl").ok().map(Self::new)
    }

    /// Build from configuration, searching PATH when no binary is configured
    pub fn from_config(config: &FetchConfig) -> Option<Self> {
        let fetcher = match &config.gallery_dl_path {
            Some(path) => Self::new(path.clone()),
            None => Self::from_path()?,
        };

        Some(Self {
            config_file: config.config_file.clone(),
            cookies_file: config.cookies_file.clone(),
            extra_args: config.extra_args.clone(),
            ..fetcher
        })
    }

    fn command_args(&self, url: &str, dest: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec![
            "--write-metadata".into(),
            "-D".into(),
            dest.as_os_str().to_owned(),
            "--verbose".into(),
        ];

        if let Some(config_file) = &self.config_file {
            args.push("--config".into());
            args.push(config_file.as_os_str().to_owned());
        }

        // a missing cookie file means an anonymous fetch, not an error
        if let Some(cookies) = self.cookies_file.as_ref().filter(|p| p.exists()) {
            args.push("--cookies".into());
            args.push(cookies.as_os_str().to_owned());
        }

        args.extend(self.extra_args.iter().map(Into::into));
        args.push(url.into());
        args
    }
}

#[async_trait]
impl FetchProvider for GalleryDlFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<Vec<PathBuf>, FetchError> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| FetchError::Unknown(format!("cannot create {}: {e}", dest.display())))?;

        let args = self.command_args(url, dest);
        tracing::info!(
            binary = %self.binary_path.display(),
            url,
            dest = %dest.display(),
            "Running gallery-dl"
        );

        let output = Command::new(&self.binary_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| FetchError::Unknown(format!("failed to execute gallery-dl: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            code = ?output.status.code(),
            stdout = %truncate(&stdout, 500),
            stderr = %truncate(&stderr, 500),
            "gallery-dl finished"
        );

        if !output.status.success() {
            let message = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(classify_failure(message));
        }

        if stdout.trim().is_empty() && stderr.trim().is_empty() {
            return Err(FetchError::Unknown(
                "no output received from gallery-dl, check its configuration".to_string(),
            ));
        }

        let files = list_media_files(dest)
            .await
            .map_err(|e| FetchError::Unknown(format!("cannot list {}: {e}", dest.display())))?;

        if files.is_empty() {
            tracing::warn!(url, "gallery-dl succeeded but wrote no media files");
        }
        Ok(files)
    }

    fn name(&self) -> &'static str {
        "gallery-dl"
    }
}

/// Map gallery-dl failure output onto a fetch classification
pub fn classify_failure(output: &str) -> FetchError {
    let lower = output.to_lowercase();
    let detail = output.trim().to_string();

    if lower.contains("login required") {
        FetchError::AuthRequired(
            "login required, check that the session is still valid".to_string(),
        )
    } else if lower.contains("not found") {
        FetchError::NotFound("the post may be private or deleted".to_string())
    } else if lower.contains("rate limit") {
        FetchError::RateLimited("try again later".to_string())
    } else {
        FetchError::Unknown(detail)
    }
}

/// Files directly inside `dir`, skipping metadata, sorted by name
async fn list_media_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_metadata = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| METADATA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_metadata {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("[instagram][error] Login required"),
            FetchError::AuthRequired(_)
        ));
        assert!(matches!(
            classify_failure("HttpError: 404 Not Found"),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("[instagram][warning] Rate limit exceeded"),
            FetchError::RateLimited(_)
        ));
        assert_eq!(
            classify_failure("  something exploded\n"),
            FetchError::Unknown("something exploded".to_string())
        );
    }

    #[test]
    fn test_command_args_skip_missing_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = GalleryDlFetcher::new(PathBuf::from("/usr/bin/gallery-dl"));
        fetcher.config_file = Some(PathBuf::from("/etc/gallery-dl.conf"));
        fetcher.cookies_file = Some(dir.path().join("missing.txt"));
        fetcher.extra_args = vec!["--no-part".to_string()];

        let args = fetcher.command_args("https://example.com/p/1", Path::new("/tmp/media"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "--write-metadata",
                "-D",
                "/tmp/media",
                "--verbose",
                "--config",
                "/etc/gallery-dl.conf",
                "--no-part",
                "https://example.com/p/1",
            ]
        );
    }

    #[test]
    fn test_command_args_include_existing_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        std::fs::write(&cookies, "# Netscape HTTP Cookie File\n").unwrap();

        let mut fetcher = GalleryDlFetcher::new(PathBuf::from("gallery-dl"));
        fetcher.cookies_file = Some(cookies.clone());

        let args = fetcher.command_args("https://example.com/p/1", Path::new("/tmp/media"));
        let position = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(PathBuf::from(&args[position + 1]), cookies);
    }

    #[tokio::test]
    async fn test_list_media_files_skips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.mp4", "a.mp4.json", "info.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_media_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.jpg"]);
    }

    #[test]
    fn test_from_path_matches_which() {
        match which::which("gallery-dl") {
            Ok(expected) => {
                assert_eq!(GalleryDlFetcher::from_path().unwrap().binary_path, expected)
            }
            Err(_) => assert!(GalleryDlFetcher::from_path().is_none()),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
