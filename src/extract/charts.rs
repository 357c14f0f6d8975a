//! Daily per-region chart pages from kworb.net.

use super::{ChartSource, FetchOutcome, PageFetcher};
use crate::models::{CellLink, ChartPage, RawChartRow};
use async_trait::async_trait;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

pub const KWORB_BASE_URL: &str = "https://kworb.net";

const MIN_CELLS: usize = 11;
const RANK_CELL: usize = 0;
const TEXT_CELL: usize = 2;
const DAYS_CELL: usize = 3;
const STREAMS_CELL: usize = 6;
const TOTAL_CELL: usize = 10;

lazy_static! {
    static ref TITLE: Selector = Selector::parse("span.pagetitle").unwrap();
    static ref ROWS: Selector = Selector::parse("table#spotifydaily tbody tr").unwrap();
    static ref TABLE: Selector = Selector::parse("table#spotifydaily").unwrap();
    static ref CELL: Selector = Selector::parse("td").unwrap();
    static ref LINK: Selector = Selector::parse("a").unwrap();
    static ref TITLE_DATE: Regex = Regex::new(r"(\d{4})/(\d{2})/(\d{2})").unwrap();
}

pub struct KworbChartSource {
    fetcher: PageFetcher,
    base_url: String,
}

impl KworbChartSource {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self::with_base_url(fetcher, KWORB_BASE_URL)
    }

    pub fn with_base_url(fetcher: PageFetcher, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn region_url(&self, region_code: &str) -> String {
        format!(
            "{}/spotify/country/{}_daily.html",
            self.base_url,
            region_code.to_lowercase()
        )
    }
}

#[async_trait]
impl ChartSource for KworbChartSource {
    async fn fetch_region(&self, region_code: &str) -> FetchOutcome<ChartPage> {
        let url = self.region_url(region_code);
        match self.fetcher.get_page(&url).await {
            FetchOutcome::Found(body) => match parse_chart_page(&body) {
                Some(page) => FetchOutcome::Found(page),
                None => {
                    debug!("No chart table for {} at {}", region_code, url);
                    FetchOutcome::NotFound
                }
            },
            FetchOutcome::NotFound => FetchOutcome::NotFound,
            FetchOutcome::TransientFailure(e) => FetchOutcome::TransientFailure(e),
            FetchOutcome::PermanentFailure(e) => FetchOutcome::PermanentFailure(e),
        }
    }
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Extracts the chart table. Returns `None` when the page has no chart table.
/// Rows with too few cells are dropped here.
pub fn parse_chart_page(html: &str) -> Option<ChartPage> {
    let document = Html::parse_document(html);
    document.select(&TABLE).next()?;

    let date = document
        .select(&TITLE)
        .next()
        .and_then(|title| parse_title_date(&cell_text(&title)));

    let mut rows = Vec::new();
    for row in document.select(&ROWS) {
        let cells: Vec<ElementRef> = row.select(&CELL).collect();
        if cells.len() < MIN_CELLS {
            debug!("Skipping chart row with {} cells", cells.len());
            continue;
        }
        let links = cells[TEXT_CELL]
            .select(&LINK)
            .map(|a| CellLink::new(a.value().attr("href").unwrap_or_default(), cell_text(&a)))
            .collect();
        rows.push(RawChartRow {
            rank: cell_text(&cells[RANK_CELL]),
            links,
            days: cell_text(&cells[DAYS_CELL]),
            streams: cell_text(&cells[STREAMS_CELL]),
            total: cell_text(&cells[TOTAL_CELL]),
        });
    }
    Some(ChartPage { date, rows })
}

fn parse_title_date(title: &str) -> Option<NaiveDate> {
    let caps = TITLE_DATE.captures(title)?;
    NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
}
