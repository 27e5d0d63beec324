pub mod cache;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::Config;

/// Failure of a single GET. Cloneable so a cached failure can be shared by
/// every caller that was waiting on the same URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error(
        "GET {url} was rate limited (HTTP {status}; remaining={}, reset={}, retry-after={})",
        .remaining.as_deref().unwrap_or("?"),
        .reset.as_deref().unwrap_or("?"),
        .retry_after.as_deref().unwrap_or("?")
    )]
    RateLimited {
        url: String,
        status: u16,
        remaining: Option<String>,
        reset: Option<String>,
        retry_after: Option<String>,
    },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }
}

/// Plain GET access to remote content. Implemented over HTTP in production
/// and over an in-memory fixture in tests.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Admission control for outbound requests: at most `limit` tasks run at
/// once, the rest wait in FIFO order.
#[derive(Debug, Clone)]
pub struct Throttle {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl Throttle {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `task` once a slot is free. The slot is released when the task
    /// finishes, whatever its outcome.
    pub async fn run<F: Future>(&self, task: F) -> F::Output {
        // The semaphore is never closed, so acquisition only fails if that
        // invariant is broken; run unthrottled rather than drop the request.
        let _permit = self.permits.acquire().await.ok();
        task.await
    }
}

/// HTTP implementation of [`Fetch`] behind a [`Throttle`].
pub struct HttpFetcher {
    client: reqwest::Client,
    throttle: Throttle,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let throttle = Throttle::new(config.max_concurrent_requests);
        debug!(
            max_concurrent = throttle.limit(),
            authenticated = config.github_token.is_some(),
            "HTTP fetcher ready"
        );

        Ok(Self {
            client,
            throttle,
            token: config.github_token.clone(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let mut req = self
            .client
            .get(url)
            .header(USER_AGENT, concat!("learn-resolver/", env!("CARGO_PKG_VERSION")));
        if url.starts_with("https://api.github.com/") {
            req = req.header(ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.token {
                req = req.header(AUTHORIZATION, format!("Bearer {}", token));
            }
        }

        let resp = req.send().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            debug!(url, status = status.as_u16(), "GET ok");
            return Ok(resp);
        }

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let err = rate_limit_error(url, status, resp.headers());
            warn!("{}", err);
            return Err(err);
        }

        Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

fn rate_limit_error(url: &str, status: StatusCode, headers: &HeaderMap) -> FetchError {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    FetchError::RateLimited {
        url: url.to_string(),
        status: status.as_u16(),
        remaining: header("x-ratelimit-remaining"),
        reset: header("x-ratelimit-reset"),
        retry_after: header("retry-after"),
    }
}

impl Fetch for HttpFetcher {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.throttle
            .run(async {
                let resp = self.get(url).await?;
                resp.text().await.map_err(|e| FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            })
            .await
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.throttle
            .run(async {
                let resp = self.get(url).await?;
                resp.bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| FetchError::Transport {
                        url: url.to_string(),
                        message: e.to_string(),
                    })
            })
            .await
    }
}
