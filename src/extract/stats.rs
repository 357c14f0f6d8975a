//! Artist stats pages and the paged listener ranking from kworb.net.

use super::{FetchOutcome, PageFetcher, StatsSource};
use crate::models::{RawArtistStats, RawListenerRow, RawValue};
use async_trait::async_trait;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

pub const KWORB_STATS_BASE_URL: &str = "https://kworb.net";

/// Marker kworb prints instead of a table for unknown artists.
const NO_DATA_MARKER: &str = "No data available";
const TOTAL_COLUMN: &str = "Total";
pub const DEFAULT_LISTENER_PAGES: u32 = 5;

lazy_static! {
    static ref TABLE: Selector = Selector::parse("table").unwrap();
    static ref SORTABLE_TABLE: Selector = Selector::parse("table.sortable").unwrap();
    static ref ROW: Selector = Selector::parse("tr").unwrap();
    static ref HEADER: Selector = Selector::parse("th").unwrap();
    static ref CELL: Selector = Selector::parse("td").unwrap();
}

pub struct KworbStatsSource {
    fetcher: PageFetcher,
    base_url: String,
    listener_pages: u32,
}

impl KworbStatsSource {
    pub fn new(fetcher: PageFetcher, listener_pages: u32) -> Self {
        Self::with_base_url(fetcher, KWORB_STATS_BASE_URL, listener_pages)
    }

    pub fn with_base_url(fetcher: PageFetcher, base_url: &str, listener_pages: u32) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            listener_pages,
        }
    }

    fn artist_url(&self, artist_id: &str) -> String {
        format!("{}/spotify/artist/{}_songs.html", self.base_url, artist_id)
    }

    /// Page 1 has no numeric suffix.
    fn listeners_url(&self, page: u32) -> String {
        if page <= 1 {
            format!("{}/spotify/listeners.html", self.base_url)
        } else {
            format!("{}/spotify/listeners{}.html", self.base_url, page)
        }
    }
}

#[async_trait]
impl StatsSource for KworbStatsSource {
    async fn fetch_artist_stats(&self, artist_id: &str) -> FetchOutcome<RawArtistStats> {
        match self.fetcher.get_page(&self.artist_url(artist_id)).await {
            FetchOutcome::Found(body) => match parse_artist_stats_page(&body) {
                Some(stats) => FetchOutcome::Found(stats),
                None => {
                    debug!("No stats table for artist {}", artist_id);
                    FetchOutcome::NotFound
                }
            },
            FetchOutcome::NotFound => FetchOutcome::NotFound,
            FetchOutcome::TransientFailure(e) => FetchOutcome::TransientFailure(e),
            FetchOutcome::PermanentFailure(e) => FetchOutcome::PermanentFailure(e),
        }
    }

    async fn fetch_listeners(&self, page: u32) -> FetchOutcome<Vec<RawListenerRow>> {
        match self.fetcher.get_page(&self.listeners_url(page)).await {
            FetchOutcome::Found(body) => match parse_listeners_page(&body) {
                Some(rows) => FetchOutcome::Found(rows),
                None => FetchOutcome::NotFound,
            },
            FetchOutcome::NotFound => FetchOutcome::NotFound,
            FetchOutcome::TransientFailure(e) => FetchOutcome::TransientFailure(e),
            FetchOutcome::PermanentFailure(e) => FetchOutcome::PermanentFailure(e),
        }
    }

    fn listener_pages(&self) -> u32 {
        self.listener_pages
    }
}

fn text_of(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Reads the `Total` column of the first table: row 0 is cumulative streams,
/// row 1 the daily figure. `None` when the page has no usable table.
pub fn parse_artist_stats_page(html: &str) -> Option<RawArtistStats> {
    if html.contains(NO_DATA_MARKER) {
        return None;
    }
    let document = Html::parse_document(html);
    let table = document.select(&TABLE).next()?;

    let headers: Vec<String> = table.select(&HEADER).map(|th| text_of(&th)).collect();
    let total_index = headers.iter().position(|h| h == TOTAL_COLUMN)?;

    let body_rows: Vec<Vec<String>> = table
        .select(&ROW)
        .map(|tr| tr.select(&CELL).map(|td| text_of(&td)).collect::<Vec<_>>())
        .filter(|cells| !cells.is_empty())
        .collect();

    let column = |row: usize| -> Option<RawValue> {
        body_rows
            .get(row)
            .and_then(|cells| cells.get(total_index))
            .map(|text| RawValue::Text(text.clone()))
    };

    Some(RawArtistStats {
        cumulative_streams: column(0),
        streams: column(1),
    })
}

/// Extracts `(artist name, listeners)` pairs from one listener ranking page.
pub fn parse_listeners_page(html: &str) -> Option<Vec<RawListenerRow>> {
    let document = Html::parse_document(html);
    let table = document.select(&SORTABLE_TABLE).next()?;
    let rows = table
        .select(&ROW)
        .skip(1)
        .filter_map(|tr| {
            let cells: Vec<ElementRef> = tr.select(&CELL).collect();
            if cells.len() < 3 {
                return None;
            }
            let artist_name = text_of(&cells[1]);
            if artist_name.is_empty() {
                return None;
            }
            Some(RawListenerRow {
                artist_name,
                listeners: text_of(&cells[2]),
            })
        })
        .collect();
    Some(rows)
}
