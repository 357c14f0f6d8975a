//! MusicBrainz client for resolving Spotify artist IDs to MBIDs.
//!
//! Rate limited to 1 request per second per MusicBrainz API policy.

use super::http::{request_error, status_outcome};
use super::{CrossReferenceSource, FetchOutcome, RateLimiter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const MUSICBRAINZ_API_BASE: &str = "https://musicbrainz.org/ws/2";
/// Slightly over the one request per second MusicBrainz allows.
pub const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(1100);

pub struct MusicBrainzClient {
    client: reqwest::Client,
    api_base: String,
    limiter: RateLimiter,
}

#[derive(Deserialize)]
struct UrlLookupResponse {
    #[serde(default)]
    relations: Vec<MbRelation>,
}

#[derive(Deserialize)]
struct MbRelation {
    artist: Option<MbArtist>,
}

#[derive(Deserialize)]
struct MbArtist {
    id: String,
}

impl MusicBrainzClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create MusicBrainz HTTP client")?;

        Ok(Self {
            client,
            api_base: MUSICBRAINZ_API_BASE.to_string(),
            limiter: RateLimiter::new(RATE_LIMIT_INTERVAL),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn url_lookup(&self, spotify_id: &str) -> String {
        let spotify_url = format!("https://open.spotify.com/artist/{}", spotify_id);
        format!(
            "{}/url?resource={}&inc=artist-rels&fmt=json",
            self.api_base,
            urlencoding::encode(&spotify_url)
        )
    }
}

#[async_trait]
impl CrossReferenceSource for MusicBrainzClient {
    /// Looks up the MusicBrainz artist linked to a Spotify artist URL.
    async fn lookup_mbid(&self, artist_id: &str) -> FetchOutcome<String> {
        self.limiter.wait().await;

        let url = self.url_lookup(artist_id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return request_error(e).into(),
        };
        if !response.status().is_success() {
            // 404 means the URL is unknown to MusicBrainz; 503 is its rate limiter
            return status_outcome(response.status().as_u16(), &url);
        }

        let body: UrlLookupResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return request_error(e).into(),
        };
        match first_artist_mbid(body) {
            Some(mbid) => FetchOutcome::Found(mbid),
            None => {
                debug!("MusicBrainz URL for {} has no artist relation", artist_id);
                FetchOutcome::NotFound
            }
        }
    }
}

fn first_artist_mbid(body: UrlLookupResponse) -> Option<String> {
    body.relations
        .into_iter()
        .find_map(|rel| rel.artist.map(|artist| artist.id))
        .filter(|id| !id.is_empty())
}
