//! Session checks performed before a fetch

use super::traits::{AuthProvider, AuthStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// Cookies that must be present for an authenticated session
const REQUIRED_COOKIES: [&str; 2] = ["sessionid", "ds_user_id"];

/// Validates a Netscape-format cookie file without contacting the source
///
/// The file must exist, contain at least one cookie line and carry every
/// cookie the source needs for a logged-in session.
#[derive(Debug, Clone)]
pub struct CookieFileAuth {
    cookie_file: PathBuf,
}

impl CookieFileAuth {
    /// Check the cookie file at `cookie_file`
    pub fn new(cookie_file: impl Into<PathBuf>) -> Self {
        Self {
            cookie_file: cookie_file.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for CookieFileAuth {
    async fn validate(&self) -> AuthStatus {
        let content = match tokio::fs::read_to_string(&self.cookie_file).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    path = %self.cookie_file.display(),
                    error = %e,
                    "Cannot read cookie file"
                );
                return AuthStatus::invalid("failed to load cookies from file");
            }
        };

        let cookies = parse_netscape_cookies(&content);
        if cookies.is_empty() {
            return AuthStatus::invalid("failed to load cookies from file");
        }

        let missing: Vec<&str> = REQUIRED_COOKIES
            .iter()
            .copied()
            .filter(|name| !cookies.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return AuthStatus::invalid(format!("missing required cookies: {}", missing.join(", ")));
        }

        AuthStatus::valid()
    }
}

/// Accepts every fetch; used when no credentials are configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn validate(&self) -> AuthStatus {
        AuthStatus::valid()
    }
}

/// Cookie name to value, from tab-separated lines with at least seven fields
fn parse_netscape_cookies(content: &str) -> HashMap<&str, &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            (fields.len() >= 7).then(|| (fields[5], fields[6]))
        })
        .collect()
}
