//! Shared HTTP plumbing for page scraping and JSON APIs.

use super::{is_retryable_status, FetchOutcome, RateLimiter, SourceError};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = concat!("music-dataviz-etl/", env!("CARGO_PKG_VERSION"));

/// Fetches HTML pages, mapping HTTP results onto [`FetchOutcome`].
#[derive(Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    limiter: Option<Arc<RateLimiter>>,
}

impl PageFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            limiter: None,
        })
    }

    /// Spaces every request made through this fetcher (and its clones).
    pub fn with_rate_limit(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// GETs `url`. Retryable statuses and network errors are transient,
    /// any other non-2xx status is an empty result.
    pub async fn get_page(&self, url: &str) -> FetchOutcome<String> {
        if let Some(limiter) = &self.limiter {
            limiter.wait().await;
        }
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return request_error(e).into(),
        };

        let status = response.status();
        if !status.is_success() {
            return status_outcome(status.as_u16(), url);
        }
        match response.text().await {
            Ok(body) => FetchOutcome::Found(body),
            Err(e) => request_error(e).into(),
        }
    }
}

/// Outcome for a non-2xx status on a page endpoint.
pub(crate) fn status_outcome<T>(status: u16, url: &str) -> FetchOutcome<T> {
    if is_retryable_status(status) {
        FetchOutcome::TransientFailure(SourceError::Status {
            status,
            url: url.to_string(),
        })
    } else {
        debug!("{} answered {}, treating as no data", url, status);
        FetchOutcome::NotFound
    }
}

pub(crate) fn request_error(error: reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::Request(format!("timeout: {}", error))
    } else if error.is_decode() {
        SourceError::Malformed(error.to_string())
    } else if let Some(status) = error.status() {
        SourceError::Status {
            status: status.as_u16(),
            url: error.url().map(|u| u.to_string()).unwrap_or_default(),
        }
    } else {
        SourceError::Request(error.to_string())
    }
}
