//! Fetch collaborator: turns a URL into HTML text.
//!
//! Implement [`Fetcher`] to plug in another way of obtaining the page (a
//! headless browser, a cache). Equivalent markup must yield equivalent
//! extraction output regardless of how it was fetched.
//!
//! | Fetcher | Sources |
//! |---------|---------|
//! | [`HttpFetcher`] | `http://` and `https://` URLs, with user agent and timeout |
//! | [`FileFetcher`] | `file://` URLs and plain filesystem paths |
//! | [`SourceFetcher`] | Dispatches to one of the above by URL scheme |

use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ScrapeConfig;

/// A failure to obtain the source document. Aborts the scrape cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Obtains the HTML of a page.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain HTTP GET with a custom user agent and a request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(config: &ScrapeConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_error(&self, url: &str, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                source,
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!(url, "fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|e| self.request_error(url, e))
    }
}

/// Reads saved HTML from disk. Accepts `file://` URLs or bare paths.
pub struct FileFetcher;

impl FileFetcher {
    pub fn path_of(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let path = Self::path_of(url);
        debug!(path = %path.display(), "reading page from disk");
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Ok(html),
            Err(source) => Err(FetchError::Io { path, source }),
        }
    }
}

/// Routes `http(s)://` URLs to [`HttpFetcher`] and everything else to [`FileFetcher`].
pub struct SourceFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl SourceFetcher {
    pub fn new(config: &ScrapeConfig) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            file: FileFetcher,
        })
    }
}

pub fn is_http(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if is_http(url) {
            self.http.fetch(url).await
        } else {
            self.file.fetch(url).await
        }
    }
}
