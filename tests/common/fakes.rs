//! In-memory implementations of the extractor traits.
#![allow(dead_code)]

use async_trait::async_trait;
use music_dataviz_etl::extract::{
    ChartSource, CrossReferenceSource, FetchOutcome, MetadataEndpoint, MetadataSource,
    SourceError, StatsSource,
};
use music_dataviz_etl::models::{ChartPage, RawArtistStats, RawListenerRow};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn malformed<T>(what: &str) -> FetchOutcome<T> {
    FetchOutcome::PermanentFailure(SourceError::Malformed(format!("broken fixture: {}", what)))
}

/// Chart pages keyed by region code. Unknown regions are `NotFound`.
#[derive(Default)]
pub struct FakeChartSource {
    pages: HashMap<String, ChartPage>,
    broken: HashSet<String>,
    /// Regions whose fetch never completes.
    hanging: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeChartSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, region: &str, page: ChartPage) -> Self {
        self.pages.insert(region.to_string(), page);
        self
    }

    pub fn with_broken(mut self, region: &str) -> Self {
        self.broken.insert(region.to_string());
        self
    }

    pub fn with_hanging(mut self, region: &str) -> Self {
        self.hanging.insert(region.to_string());
        self
    }
}

#[async_trait]
impl ChartSource for FakeChartSource {
    async fn fetch_region(&self, region_code: &str) -> FetchOutcome<ChartPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.contains(region_code) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.broken.contains(region_code) {
            return malformed(region_code);
        }
        match self.pages.get(region_code) {
            Some(page) => FetchOutcome::Found(page.clone()),
            None => FetchOutcome::NotFound,
        }
    }
}

/// Artist stats keyed by artist id plus a paged listener index.
#[derive(Default)]
pub struct FakeStatsSource {
    stats: HashMap<String, RawArtistStats>,
    broken: HashSet<String>,
    listener_pages: Vec<Vec<RawListenerRow>>,
}

impl FakeStatsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stats(mut self, artist_id: &str, stats: RawArtistStats) -> Self {
        self.stats.insert(artist_id.to_string(), stats);
        self
    }

    pub fn with_broken(mut self, artist_id: &str) -> Self {
        self.broken.insert(artist_id.to_string());
        self
    }

    pub fn with_listener_page(mut self, rows: &[(&str, &str)]) -> Self {
        self.listener_pages.push(
            rows.iter()
                .map(|(name, listeners)| RawListenerRow {
                    artist_name: name.to_string(),
                    listeners: listeners.to_string(),
                })
                .collect(),
        );
        self
    }
}

#[async_trait]
impl StatsSource for FakeStatsSource {
    async fn fetch_artist_stats(&self, artist_id: &str) -> FetchOutcome<RawArtistStats> {
        if self.broken.contains(artist_id) {
            return malformed(artist_id);
        }
        match self.stats.get(artist_id) {
            Some(stats) => FetchOutcome::Found(stats.clone()),
            None => FetchOutcome::NotFound,
        }
    }

    async fn fetch_listeners(&self, page: u32) -> FetchOutcome<Vec<RawListenerRow>> {
        match page
            .checked_sub(1)
            .and_then(|i| self.listener_pages.get(i as usize))
        {
            Some(rows) => FetchOutcome::Found(rows.clone()),
            None => FetchOutcome::NotFound,
        }
    }

    fn listener_pages(&self) -> u32 {
        self.listener_pages.len() as u32
    }
}

/// Metadata API that knows a fixed set of ids and records every request.
#[derive(Default)]
pub struct FakeMetadataSource {
    known: HashSet<String>,
    /// Every known item is returned twice.
    repeats: bool,
    pub requests: Mutex<Vec<(MetadataEndpoint, usize)>>,
}

impl FakeMetadataSource {
    pub fn knowing<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            known: ids.into_iter().map(str::to_string).collect(),
            repeats: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_repeated_items(mut self) -> Self {
        self.repeats = true;
        self
    }

    pub fn requests(&self) -> Vec<(MetadataEndpoint, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataSource for FakeMetadataSource {
    async fn fetch_batch(
        &self,
        endpoint: MetadataEndpoint,
        ids: &[String],
    ) -> FetchOutcome<Vec<(String, Value)>> {
        self.requests.lock().unwrap().push((endpoint, ids.len()));
        if ids.len() > endpoint.max_batch() {
            return malformed("oversized batch");
        }
        let copies = if self.repeats { 2 } else { 1 };
        let items = ids
            .iter()
            .filter(|id| self.known.contains(*id))
            .flat_map(|id| std::iter::repeat(id).take(copies))
            .map(|id| (id.clone(), json!({"id": id, "source": endpoint.to_string()})))
            .collect();
        FetchOutcome::Found(items)
    }
}

#[derive(Default)]
pub struct FakeCrossReference {
    mbids: HashMap<String, String>,
}

impl FakeCrossReference {
    pub fn with(mut self, artist_id: &str, mbid: &str) -> Self {
        self.mbids.insert(artist_id.to_string(), mbid.to_string());
        self
    }
}

#[async_trait]
impl CrossReferenceSource for FakeCrossReference {
    async fn lookup_mbid(&self, artist_id: &str) -> FetchOutcome<String> {
        match self.mbids.get(artist_id) {
            Some(mbid) => FetchOutcome::Found(mbid.clone()),
            None => FetchOutcome::NotFound,
        }
    }
}
