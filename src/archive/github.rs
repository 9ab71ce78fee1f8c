//! GitHub zipball downloads.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_DISPOSITION};
use std::time::Duration;
use tracing::{debug, info};

use super::{ArchiveSource, FetchedArchive};
use crate::core::error::TaskError;
use crate::core::types::BundleRef;

const DEFAULT_API_URL: &str = "https://api.github.com";
const ACCEPT_V3: &str = "application/vnd.github.v3+json";

/// Connection settings for the archive API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubConfig {
    /// Base URL of the API, without a trailing slash.
    pub api_url: String,
    /// Timeout for the whole request, body included.
    pub timeout: Duration,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GithubConfig {
    /// Point at another API host (GitHub Enterprise, or a local test server).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Downloads repository snapshots through `GET /repos/{owner}/{repo}/zipball`.
///
/// Redirects to the storage host are followed. Requests are never retried.
#[derive(Debug, Clone)]
pub struct GithubArchiveFetcher {
    client: reqwest::Client,
    api_url: String,
}

impl GithubArchiveFetcher {
    /// Build a fetcher with its own HTTP client.
    pub fn new(config: GithubConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("bundlerun/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the zipball endpoint for `bundle`.
    pub fn archive_url(&self, bundle: &BundleRef) -> String {
        let repo = bundle.repo();
        let mut url = format!(
            "{}/repos/{}/{}/zipball",
            self.api_url,
            repo.owner(),
            repo.name()
        );
        if let Some(git_ref) = bundle.git_ref() {
            url.push('/');
            url.push_str(git_ref);
        }
        url
    }
}

#[async_trait]
impl ArchiveSource for GithubArchiveFetcher {
    async fn fetch(&self, bundle: &BundleRef) -> Result<FetchedArchive, TaskError> {
        let repo = bundle.repo().to_string();
        let url = self.archive_url(bundle);
        debug!(%url, "requesting archive");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("token {}", bundle.credential().expose()))
            .header(ACCEPT, ACCEPT_V3)
            .send()
            .await
            .map_err(|e| transport_error(&repo, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::Fetch {
                repo,
                status: Some(status.as_u16()),
                message: format!("HTTP {}", status),
            });
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_content_disposition)
            .ok_or_else(|| TaskError::ArchiveMetadata { repo: repo.clone() })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&repo, e))?;

        info!(%repo, %filename, size = bytes.len(), "archive downloaded");
        Ok(FetchedArchive::new(bytes.to_vec(), filename))
    }
}

fn transport_error(repo: &str, err: reqwest::Error) -> TaskError {
    let message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else {
        err.to_string()
    };
    TaskError::Fetch {
        repo: repo.to_string(),
        status: err.status().map(|s| s.as_u16()),
        message,
    }
}

/// Extract the `filename=` segment of a `Content-Disposition` header value.
///
/// Surrounding quotes are removed. Returns `None` when the segment is missing
/// or empty.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    value.split(';').find_map(|segment| {
        let (key, raw) = segment.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = raw.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}
