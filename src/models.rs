//! Records shared by the extract, transform and load stages.
//!
//! Identity records ([`Artist`], [`Song`]) are write-once, [`ArtistSong`] edges are
//! created once, and facts ([`ChartEntry`], [`ArtistStat`]) are last-write-wins per key.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Song {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtistSong {
    pub artist_id: String,
    pub song_id: String,
}

/// Market grouping that drives per-region chart extraction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Region {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartEntry {
    pub song_id: String,
    pub region_code: String,
    pub date: NaiveDate,
    pub rank: u32,
    pub streams: u64,
    pub cumulative_streams: u64,
    pub days_on_chart: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistStat {
    pub artist_id: String,
    pub date: NaiveDate,
    pub cumulative_streams: Option<f64>,
    pub streams: Option<f64>,
    pub listeners: Option<f64>,
}

/// Everything one region's chart page contributes, in load order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartPayload {
    pub artists: Vec<Artist>,
    pub songs: Vec<Song>,
    pub artist_songs: Vec<ArtistSong>,
    pub entries: Vec<ChartEntry>,
}

// Raw extractor payloads. These carry text exactly as scraped; the transform
// module owns every numeric interpretation.

/// A hyperlink inside a composite table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellLink {
    pub href: String,
    pub text: String,
}

impl CellLink {
    pub fn new(href: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            text: text.into(),
        }
    }
}

/// One scraped row of a daily chart table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawChartRow {
    pub rank: String,
    pub links: Vec<CellLink>,
    pub days: String,
    pub streams: String,
    pub total: String,
}

/// A region's daily chart page before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChartPage {
    /// Date printed in the page title, when present.
    pub date: Option<NaiveDate>,
    pub rows: Vec<RawChartRow>,
}

/// Untyped cell value as it comes out of a page or API payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{}", v),
            RawValue::Float(v) => write!(f, "{}", v),
            RawValue::Text(v) => write!(f, "{:?}", v),
        }
    }
}

/// Totals scraped from an artist's stats page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawArtistStats {
    pub cumulative_streams: Option<RawValue>,
    pub streams: Option<RawValue>,
}

/// One row of the listener ranking index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawListenerRow {
    pub artist_name: String,
    pub listeners: String,
}

/// Kinds of records a run can touch, used for per-kind accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Region,
    ChartPage,
    Artist,
    Song,
    ArtistSong,
    ChartEntry,
    ArtistStat,
    ListenerPage,
    ArtistMetadata,
    SongMetadata,
    SongFeatures,
    ArtistMbid,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Region => "region",
            EntityKind::ChartPage => "chart_page",
            EntityKind::Artist => "artist",
            EntityKind::Song => "song",
            EntityKind::ArtistSong => "artist_song",
            EntityKind::ChartEntry => "chart_entry",
            EntityKind::ArtistStat => "artist_stat",
            EntityKind::ListenerPage => "listener_page",
            EntityKind::ArtistMetadata => "artist_metadata",
            EntityKind::SongMetadata => "song_metadata",
            EntityKind::SongFeatures => "song_features",
            EntityKind::ArtistMbid => "artist_mbid",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
