//! Spotify Web API batch metadata source (client-credentials flow).

use super::http::{request_error, status_outcome};
use super::{FetchOutcome, MetadataEndpoint, MetadataSource, RateLimiter, SourceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Tokens are refreshed this long before the provider expires them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifyMetadataSource {
    client: reqwest::Client,
    credentials: SpotifyCredentials,
    api_base: String,
    token_url: String,
    batch_delay: RateLimiter,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyMetadataSource {
    pub fn new(
        credentials: SpotifyCredentials,
        timeout: Duration,
        inter_batch_delay: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create Spotify HTTP client")?;
        Ok(Self {
            client,
            credentials,
            api_base: SPOTIFY_API_BASE.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            batch_delay: RateLimiter::new(inter_batch_delay),
            token: Mutex::new(None),
        })
    }

    pub fn with_endpoints(mut self, api_base: &str, token_url: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.token_url = token_url.to_string();
        self
    }

    /// Returns a cached bearer token, exchanging the client credentials when
    /// none is cached or the cached one is about to expire.
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting Spotify access token");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status,
                url: self.token_url.clone(),
            });
        }
        let body: TokenResponse = response.json().await.map_err(request_error)?;
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        info!("Obtained Spotify access token valid for {:?}", lifetime);
        Ok(body.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl MetadataSource for SpotifyMetadataSource {
    async fn fetch_batch(
        &self,
        endpoint: MetadataEndpoint,
        ids: &[String],
    ) -> FetchOutcome<Vec<(String, Value)>> {
        if ids.is_empty() {
            return FetchOutcome::Found(Vec::new());
        }
        if ids.len() > endpoint.max_batch() {
            return FetchOutcome::PermanentFailure(SourceError::Malformed(format!(
                "{} ids exceed the {} batch limit of {}",
                ids.len(),
                endpoint,
                endpoint.max_batch()
            )));
        }

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => return e.into(),
        };

        self.batch_delay.wait().await;
        let url = format!("{}/{}", self.api_base, endpoint_path(endpoint));
        let response = match self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("ids", ids.join(","))])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return request_error(e).into(),
        };

        let status = response.status().as_u16();
        if status == 401 {
            self.invalidate_token().await;
            return FetchOutcome::TransientFailure(SourceError::Status { status, url });
        }
        if !response.status().is_success() {
            return status_outcome(status, &url);
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return request_error(e).into(),
        };
        match extract_items(endpoint, &body) {
            Ok(items) => FetchOutcome::Found(items),
            Err(e) => FetchOutcome::PermanentFailure(e),
        }
    }
}

fn endpoint_path(endpoint: MetadataEndpoint) -> &'static str {
    match endpoint {
        MetadataEndpoint::Artists => "artists",
        MetadataEndpoint::Tracks => "tracks",
        MetadataEndpoint::AudioFeatures => "audio-features",
    }
}

fn response_key(endpoint: MetadataEndpoint) -> &'static str {
    match endpoint {
        MetadataEndpoint::Artists => "artists",
        MetadataEndpoint::Tracks => "tracks",
        MetadataEndpoint::AudioFeatures => "audio_features",
    }
}

/// Pairs every non-null item with its id. Null items are ids the provider
/// does not know and are dropped.
fn extract_items(
    endpoint: MetadataEndpoint,
    body: &Value,
) -> Result<Vec<(String, Value)>, SourceError> {
    let key = response_key(endpoint);
    let items = body
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed(format!("response has no `{}` array", key)))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?.to_string();
            Some((id, item.clone()))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Local stand-in for the token and artists endpoints. The first
    /// `unauthorized` artist requests are answered with 401.
    struct StubApi {
        base: String,
        token_requests: Arc<AtomicUsize>,
        bearers: Arc<StdMutex<Vec<String>>>,
    }

    async fn start_stub(unauthorized: usize) -> StubApi {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let token_requests = Arc::new(AtomicUsize::new(0));
        let bearers = Arc::new(StdMutex::new(Vec::new()));
        let unauthorized = AtomicUsize::new(unauthorized);

        let (tokens, seen) = (token_requests.clone(), bearers.clone());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let head = read_request(&mut socket).await;
                let (status, body) = if head.starts_with("POST /token") {
                    let n = tokens.fetch_add(1, Ordering::SeqCst) + 1;
                    let token = json!({
                        "access_token": format!("tok-{}", n),
                        "token_type": "Bearer",
                        "expires_in": 3600
                    });
                    (200, token)
                } else {
                    seen.lock().unwrap().push(header_value(&head, "authorization"));
                    let reject = unauthorized
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                    if reject {
                        (401, json!({"error": {"status": 401}}))
                    } else {
                        (200, json!({"artists": [{"id": "a1", "name": "Artist One"}]}))
                    }
                };
                write_response(&mut socket, status, &body.to_string()).await;
            }
        });

        StubApi {
            base,
            token_requests,
            bearers,
        }
    }

    /// Reads one request and returns its head, consuming any body.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return String::from_utf8_lossy(&buf).to_string();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                let body_len = header_value(&head, "content-length").parse().unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    return head;
                }
            }
        }
    }

    fn header_value(head: &str, name: &str) -> String {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default()
    }

    async fn write_response(socket: &mut TcpStream, status: u16, body: &str) {
        let reason = if status == 200 { "OK" } else { "Unauthorized" };
        let response = format!(
            "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    }

    fn stub_source(stub: &StubApi, delay: Duration) -> SpotifyMetadataSource {
        SpotifyMetadataSource::new(
            SpotifyCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            Duration::from_secs(5),
            delay,
        )
        .unwrap()
        .with_endpoints(&format!("{}/v1", stub.base), &format!("{}/token", stub.base))
    }

    fn one_artist() -> Vec<String> {
        vec!["a1".to_string()]
    }

    #[test]
    fn null_items_are_dropped() {
        let body = json!({
            "artists": [
                {"id": "a1", "name": "Artist One", "genres": ["pop"]},
                null,
                {"id": "a3", "name": "Artist Three"}
            ]
        });
        let items = extract_items(MetadataEndpoint::Artists, &body).unwrap();
        let ids: Vec<_> = items.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a3"]);
        assert_eq!(items[0].1["genres"][0], "pop");
    }

    #[test]
    fn audio_features_use_snake_case_key() {
        let body = json!({"audio_features": [{"id": "t1", "danceability": 0.7}]});
        let items = extract_items(MetadataEndpoint::AudioFeatures, &body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(endpoint_path(MetadataEndpoint::AudioFeatures), "audio-features");
    }

    #[test]
    fn missing_array_is_malformed() {
        let body = json!({"error": {"status": 400}});
        assert!(matches!(
            extract_items(MetadataEndpoint::Tracks, &body),
            Err(SourceError::Malformed(_))
        ));
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = SpotifyCredentials {
            client_id: "id".into(),
            client_secret: "hunter2".into(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_before_any_request() {
        let source = SpotifyMetadataSource::new(
            SpotifyCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .unwrap()
        .with_endpoints("http://127.0.0.1:9", "http://127.0.0.1:9/token");
        let ids: Vec<String> = (0..51).map(|i| format!("a{}", i)).collect();
        assert!(matches!(
            source.fetch_batch(MetadataEndpoint::Artists, &ids).await,
            FetchOutcome::PermanentFailure(SourceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn token_is_reused_across_batches() {
        let stub = start_stub(0).await;
        let source = stub_source(&stub, Duration::ZERO);

        for _ in 0..2 {
            match source.fetch_batch(MetadataEndpoint::Artists, &one_artist()).await {
                FetchOutcome::Found(items) => assert_eq!(items[0].0, "a1"),
                other => panic!("expected items, got {:?}", other),
            }
        }

        assert_eq!(stub.token_requests.load(Ordering::SeqCst), 1);
        assert_eq!(*stub.bearers.lock().unwrap(), vec!["Bearer tok-1", "Bearer tok-1"]);
    }

    #[tokio::test]
    async fn unauthorized_batch_drops_token_and_next_batch_reauthenticates() {
        let stub = start_stub(1).await;
        let source = stub_source(&stub, Duration::ZERO);

        assert!(matches!(
            source.fetch_batch(MetadataEndpoint::Artists, &one_artist()).await,
            FetchOutcome::TransientFailure(SourceError::Status { status: 401, .. })
        ));
        assert!(matches!(
            source.fetch_batch(MetadataEndpoint::Artists, &one_artist()).await,
            FetchOutcome::Found(_)
        ));

        assert_eq!(stub.token_requests.load(Ordering::SeqCst), 2);
        assert_eq!(*stub.bearers.lock().unwrap(), vec!["Bearer tok-1", "Bearer tok-2"]);
    }

    #[tokio::test]
    async fn consecutive_batches_are_spaced_by_the_batch_delay() {
        let delay = Duration::from_millis(200);
        let stub = start_stub(0).await;
        let source = stub_source(&stub, delay);

        let started = std::time::Instant::now();
        for _ in 0..2 {
            assert!(matches!(
                source.fetch_batch(MetadataEndpoint::Artists, &one_artist()).await,
                FetchOutcome::Found(_)
            ));
        }

        assert!(started.elapsed() >= delay);
        assert_eq!(stub.bearers.lock().unwrap().len(), 2);
    }
}
