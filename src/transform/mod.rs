//! Pure normalization from scraped payloads to typed records.
//!
//! Two numeric domains live here and must stay separate:
//! - chart fields (rank, streams, totals, days) treat `""` and `"-"` as zero,
//! - stats fields (cumulative streams, streams, listeners) treat them as absent.

use crate::models::{
    Artist, ArtistSong, ArtistStat, CellLink, ChartEntry, ChartPayload, RawArtistStats,
    RawChartRow, RawListenerRow, RawValue, Song,
};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

lazy_static! {
    static ref TRACK_HREF: Regex = Regex::new(r"/track/([^./]+)\.html").unwrap();
    static ref ARTIST_HREF: Regex = Regex::new(r"/artist/([^./]+)\.html").unwrap();
}

const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumberError {
    #[error("not a number: {0:?}")]
    Invalid(String),
    #[error("negative value: {0}")]
    Negative(String),
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// Stats values at or above 2^63 cannot be stored as integers.
const STAT_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Why a scraped row was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowRejection {
    #[error("cell has no track link")]
    NoSong,
    #[error("cell has no artist link")]
    NoArtists,
    #[error("rank must be a positive integer, got {0:?}")]
    InvalidRank(String),
    #[error("empty {0} cell")]
    EmptyCell(&'static str),
    #[error("invalid {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        #[source]
        source: NumberError,
    },
}

fn strip_decorations(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_suffix('+').unwrap_or(trimmed);
    trimmed.chars().filter(|c| *c != ',').collect()
}

/// Parses a chart-domain count. Empty text and the dash placeholder become `0`.
///
/// Output re-parses to itself: `parse_chart_number(&n.to_string()) == Ok(n)`.
pub fn parse_chart_number(text: &str) -> Result<u64, NumberError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == PLACEHOLDER {
        return Ok(0);
    }
    let cleaned = strip_decorations(trimmed);
    if cleaned.starts_with('-') {
        return Err(NumberError::Negative(text.to_string()));
    }
    cleaned
        .parse::<u64>()
        .map_err(|_| NumberError::Invalid(text.to_string()))
}

/// Parses a stats-domain value. Missing values, empty text and the dash
/// placeholder all mean "no value", never zero.
pub fn parse_stat_number(value: Option<&RawValue>) -> Result<Option<f64>, NumberError> {
    let parsed = match value {
        None => return Ok(None),
        Some(RawValue::Int(v)) => *v as f64,
        Some(RawValue::Float(v)) => *v,
        Some(RawValue::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == PLACEHOLDER {
                return Ok(None);
            }
            strip_decorations(trimmed)
                .parse::<f64>()
                .map_err(|_| NumberError::Invalid(text.clone()))?
        }
    };
    if !parsed.is_finite() {
        return Err(NumberError::Invalid(parsed.to_string()));
    }
    if parsed < 0.0 {
        return Err(NumberError::Negative(parsed.to_string()));
    }
    if parsed.round() >= STAT_LIMIT {
        return Err(NumberError::OutOfRange(parsed.to_string()));
    }
    Ok(Some(parsed))
}

/// Identities found in a chart row's composite text cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellEntities {
    pub song: Song,
    pub artists: Vec<Artist>,
}

/// Decomposes a composite cell: the first track link is the song, every
/// artist link is a credited artist, in link order.
pub fn extract_entities(links: &[CellLink]) -> Result<CellEntities, RowRejection> {
    let song = links.iter().find_map(|link| {
        TRACK_HREF.captures(&link.href).map(|caps| Song {
            id: caps[1].to_string(),
            name: link.text.trim().to_string(),
        })
    });
    let artists: Vec<Artist> = links
        .iter()
        .filter_map(|link| {
            ARTIST_HREF.captures(&link.href).map(|caps| Artist {
                id: caps[1].to_string(),
                name: link.text.trim().to_string(),
            })
        })
        .collect();

    let song = song.ok_or(RowRejection::NoSong)?;
    if artists.is_empty() {
        return Err(RowRejection::NoArtists);
    }
    Ok(CellEntities { song, artists })
}

/// Everything one valid chart row produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRowRecords {
    pub song: Song,
    pub artists: Vec<Artist>,
    pub entry: ChartEntry,
}

impl ChartRowRecords {
    pub fn artist_songs(&self) -> impl Iterator<Item = ArtistSong> + '_ {
        self.artists.iter().map(|artist| ArtistSong {
            artist_id: artist.id.clone(),
            song_id: self.song.id.clone(),
        })
    }
}

fn chart_field(field: &'static str, text: &str) -> Result<u64, RowRejection> {
    parse_chart_number(text).map_err(|source| RowRejection::InvalidNumber { field, source })
}

fn require_text<'a>(field: &'static str, text: &'a str) -> Result<&'a str, RowRejection> {
    if text.trim().is_empty() {
        Err(RowRejection::EmptyCell(field))
    } else {
        Ok(text)
    }
}

pub fn normalize_chart_row(
    region_code: &str,
    date: NaiveDate,
    row: &RawChartRow,
) -> Result<ChartRowRecords, RowRejection> {
    let rank = row
        .rank
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|rank| *rank > 0)
        .ok_or_else(|| RowRejection::InvalidRank(row.rank.clone()))?;

    let CellEntities { song, artists } = extract_entities(&row.links)?;

    let days = chart_field("days", require_text("days", &row.days)?)?;
    let streams = chart_field("streams", require_text("streams", &row.streams)?)?;
    let total = chart_field("total", require_text("total", &row.total)?)?;

    let entry = ChartEntry {
        song_id: song.id.clone(),
        region_code: region_code.to_string(),
        date,
        rank,
        streams,
        cumulative_streams: total,
        days_on_chart: u32::try_from(days).map_err(|_| RowRejection::InvalidNumber {
            field: "days",
            source: NumberError::Invalid(row.days.clone()),
        })?,
    };
    Ok(ChartRowRecords {
        song,
        artists,
        entry,
    })
}

/// Result of normalizing a whole chart page.
#[derive(Debug, Clone, Default)]
pub struct NormalizedChart {
    pub payload: ChartPayload,
    pub rejected: usize,
}

/// Normalizes every row of a region's page, deduplicating identities and edges
/// so each appears once in the payload.
pub fn normalize_chart_page(
    region_code: &str,
    date: NaiveDate,
    rows: &[RawChartRow],
) -> NormalizedChart {
    let mut out = NormalizedChart::default();
    let mut seen_artists = HashSet::new();
    let mut seen_songs = HashSet::new();
    let mut seen_edges = HashSet::new();

    for row in rows {
        let records = match normalize_chart_row(region_code, date, row) {
            Ok(records) => records,
            Err(reason) => {
                tracing::debug!("Discarding {} chart row {:?}: {}", region_code, row.rank, reason);
                out.rejected += 1;
                continue;
            }
        };
        for edge in records.artist_songs() {
            if seen_edges.insert(edge.clone()) {
                out.payload.artist_songs.push(edge);
            }
        }
        for artist in records.artists {
            if seen_artists.insert(artist.id.clone()) {
                out.payload.artists.push(artist);
            }
        }
        if seen_songs.insert(records.song.id.clone()) {
            out.payload.songs.push(records.song);
        }
        out.payload.entries.push(records.entry);
    }
    out
}

pub fn normalize_artist_stats(
    artist_id: &str,
    date: NaiveDate,
    raw: &RawArtistStats,
) -> Result<ArtistStat, NumberError> {
    Ok(ArtistStat {
        artist_id: artist_id.to_string(),
        date,
        cumulative_streams: parse_stat_number(raw.cumulative_streams.as_ref())?,
        streams: parse_stat_number(raw.streams.as_ref())?,
        listeners: None,
    })
}

/// Builds the `artist name -> listeners` index. Rows without a usable count
/// are dropped; the first occurrence of a name wins.
pub fn normalize_listeners(rows: &[RawListenerRow]) -> HashMap<String, f64> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        let name = row.artist_name.trim();
        if name.is_empty() {
            continue;
        }
        let value = RawValue::Text(row.listeners.clone());
        match parse_stat_number(Some(&value)) {
            Ok(Some(listeners)) => {
                index.entry(name.to_string()).or_insert(listeners);
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("Skipping listener row for {}: {}", name, e),
        }
    }
    index
}
