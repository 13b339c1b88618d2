// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::upload::validate::UploadPolicy;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt"];
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Refresh this long before the access token expires.
pub const DEFAULT_REFRESH_LEAD_SECS: u64 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for the docdrop client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the document API.
    #[arg(long, default_value = DEFAULT_API_URL, env = "DOCDROP_API_URL")]
    pub api_url: String,

    /// Session file. Defaults to the docdrop state directory.
    #[arg(long, env = "DOCDROP_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    /// Largest accepted upload, in MiB.
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE_MB, env = "DOCDROP_MAX_FILE_SIZE_MB")]
    pub max_file_size_mb: u64,

    /// Accepted file extensions (comma-separated, case-insensitive).
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| (*s).to_owned()),
        env = "DOCDROP_ALLOWED_EXTENSIONS"
    )]
    pub allowed_extensions: Vec<String>,

    /// Maximum uploads in flight at once.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT, env = "DOCDROP_MAX_CONCURRENT")]
    pub max_concurrent: usize,

    /// Seconds before access token expiry to refresh it.
    #[arg(long, default_value_t = DEFAULT_REFRESH_LEAD_SECS, env = "DOCDROP_REFRESH_LEAD_SECS")]
    pub refresh_lead_secs: u64,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, env = "DOCDROP_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, default_value = "info", env = "DOCDROP_LOG")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, default_value = "text", env = "DOCDROP_LOG_FORMAT")]
    pub log_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            session_file: None,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| (*s).to_owned()).collect(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_level: "info".to_owned(),
            log_format: "text".to_owned(),
        }
    }
}

impl ClientConfig {
    /// Default config pointed at `api_url`.
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self { api_url: api_url.into(), ..Self::default() }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("--max-concurrent must be at least 1");
        }
        if self.max_file_size_mb == 0 {
            anyhow::bail!("--max-file-size-mb must be at least 1");
        }
        if self.allowed_extensions.iter().all(|e| e.trim().is_empty()) {
            anyhow::bail!("--allowed-extensions must name at least one extension");
        }
        match self.log_format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("invalid --log-format: {other}"),
        }
        Ok(())
    }

    /// API base URL without a trailing slash.
    pub fn base_url(&self) -> String {
        self.api_url.trim_end_matches('/').to_owned()
    }

    pub fn refresh_lead(&self) -> Duration {
        Duration::from_secs(self.refresh_lead_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy::new(self.max_file_size_mb * 1024 * 1024, &self.allowed_extensions)
    }

    /// Resolve the session file path.
    ///
    /// Checks `--session-file`, then `$XDG_STATE_HOME/docdrop`, then
    /// `$HOME/.local/state/docdrop`.
    pub fn session_path(&self) -> PathBuf {
        if let Some(ref path) = self.session_file {
            return path.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("docdrop/session.json");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/docdrop/session.json");
        }
        PathBuf::from(".docdrop/session.json")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
