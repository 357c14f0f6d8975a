//! Extraction layer: typed fetch outcomes, retry and rate limiting, the bounded
//! worker pool, and the concrete sources (chart pages, artist stats pages,
//! Spotify metadata API, MusicBrainz cross-reference lookup).

mod charts;
mod http;
mod musicbrainz;
mod pool;
mod rate_limit;
mod retry;
mod spotify;
mod stats;

pub use charts::{parse_chart_page, KworbChartSource};
pub use http::{PageFetcher, DEFAULT_USER_AGENT};
pub use musicbrainz::MusicBrainzClient;
pub use pool::{PoolReport, WorkerPool};
pub use rate_limit::RateLimiter;
pub use retry::{with_retry, RetryPolicy};
pub use spotify::{SpotifyCredentials, SpotifyMetadataSource};
pub use stats::{parse_artist_stats_page, parse_listeners_page, KworbStatsSource};

use crate::models::{ChartPage, RawArtistStats, RawListenerRow};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Outcome of fetching one work item.
///
/// `NotFound` is an expected, empty result. Transient failures are retried by
/// [`with_retry`]; permanent failures drop the item.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Found(T),
    NotFound,
    TransientFailure(SourceError),
    PermanentFailure(SourceError),
}

impl<T> FetchOutcome<T> {
    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Found(_) => "found",
            FetchOutcome::NotFound => "not_found",
            FetchOutcome::TransientFailure(_) => "transient",
            FetchOutcome::PermanentFailure(_) => "permanent",
        }
    }
}

impl<T> From<SourceError> for FetchOutcome<T> {
    fn from(error: SourceError) -> Self {
        if error.is_retryable() {
            FetchOutcome::TransientFailure(error)
        } else {
            FetchOutcome::PermanentFailure(error)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Status { status, .. } => is_retryable_status(*status),
            SourceError::Request(_) | SourceError::Timeout(_) => true,
            SourceError::Malformed(_) => false,
        }
    }
}

/// Statuses that signal a throttled or temporarily broken upstream.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// A batch of identifiers sent in one metadata request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdBatch {
    pub index: usize,
    pub ids: Vec<String>,
}

impl IdBatch {
    pub fn chunk(ids: &[String], size: usize) -> Vec<IdBatch> {
        ids.chunks(size.max(1))
            .enumerate()
            .map(|(index, chunk)| IdBatch {
                index,
                ids: chunk.to_vec(),
            })
            .collect()
    }
}

impl fmt::Display for IdBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch #{} ({} ids)", self.index, self.ids.len())
    }
}

/// Per-region daily chart pages.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn fetch_region(&self, region_code: &str) -> FetchOutcome<ChartPage>;
}

/// Per-artist stats pages plus the paged listener ranking.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_artist_stats(&self, artist_id: &str) -> FetchOutcome<RawArtistStats>;

    /// Fetches one page (1-based) of the listener ranking.
    async fn fetch_listeners(&self, page: u32) -> FetchOutcome<Vec<RawListenerRow>>;

    fn listener_pages(&self) -> u32;
}

/// Which batch endpoint of a metadata API is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataEndpoint {
    Artists,
    Tracks,
    AudioFeatures,
}

impl MetadataEndpoint {
    /// Largest number of ids the provider accepts per request.
    pub fn max_batch(&self) -> usize {
        match self {
            MetadataEndpoint::Artists | MetadataEndpoint::Tracks => 50,
            MetadataEndpoint::AudioFeatures => 100,
        }
    }
}

impl fmt::Display for MetadataEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataEndpoint::Artists => write!(f, "artists"),
            MetadataEndpoint::Tracks => write!(f, "tracks"),
            MetadataEndpoint::AudioFeatures => write!(f, "audio-features"),
        }
    }
}

/// Batch metadata API. Items the provider does not know are simply absent
/// from the returned `(id, blob)` pairs.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_batch(
        &self,
        endpoint: MetadataEndpoint,
        ids: &[String],
    ) -> FetchOutcome<Vec<(String, Value)>>;
}

/// Resolves an artist id to its identifier in a second identity system.
#[async_trait]
pub trait CrossReferenceSource: Send + Sync {
    async fn lookup_mbid(&self, artist_id: &str) -> FetchOutcome<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{} should retry", status);
        }
        for status in [400, 401, 403, 404, 501] {
            assert!(!is_retryable_status(status), "{} should not retry", status);
        }
    }

    #[test]
    fn source_error_classifies_into_outcome() {
        let transient: FetchOutcome<()> = SourceError::Status {
            status: 503,
            url: "u".into(),
        }
        .into();
        assert!(matches!(transient, FetchOutcome::TransientFailure(_)));

        let permanent: FetchOutcome<()> = SourceError::Malformed("no table".into()).into();
        assert!(matches!(permanent, FetchOutcome::PermanentFailure(_)));
    }

    #[test]
    fn id_batches_respect_size() {
        let ids: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        let batches = IdBatch::chunk(&ids, 50);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].ids.len(), 20);
        assert_eq!(batches[1].to_string(), "batch #1 (50 ids)");
    }
}
