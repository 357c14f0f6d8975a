//! Set-based upserts into the chart store.
//!
//! Identity rows (regions, artists, songs, artist/song edges) are insert-if-absent:
//! the first writer wins. Fact rows (chart entries, artist stats) overwrite their
//! measured columns on key conflict. Every call writes one entity kind inside one
//! transaction, which is rolled back on the first failing row.

use crate::metrics;
use crate::models::{
    Artist, ArtistSong, ArtistStat, ChartEntry, ChartPayload, EntityKind, Region, Song,
};
use crate::store::SessionFactory;
use anyhow::{Context, Result};
use rusqlite::{params, CachedStatement};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// A failed write of one entity kind. The kind's transaction was rolled back.
#[derive(Debug, Error)]
#[error("failed to load {kind}: {source:#}")]
pub struct LoadError {
    pub kind: EntityKind,
    #[source]
    pub source: anyhow::Error,
}

/// Rows written per kind by [`Loader::load_chart_payload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChartLoadReport {
    pub artists: usize,
    pub songs: usize,
    pub artist_songs: usize,
    pub entries: usize,
}

#[derive(Clone)]
pub struct Loader {
    sessions: Arc<dyn SessionFactory>,
}

const UPSERT_CHART_ENTRY: &str = "
    INSERT INTO chart_entry
        (song_id, region_code, date, rank, streams, cumulative_streams, days_on_chart)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (song_id, region_code, date) DO UPDATE SET
        rank = excluded.rank,
        streams = excluded.streams,
        cumulative_streams = excluded.cumulative_streams,
        days_on_chart = excluded.days_on_chart";

const UPSERT_ARTIST_STAT: &str = "
    INSERT INTO artist_stat (artist_id, date, cumulative_streams, streams, listeners)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (artist_id, date) DO UPDATE SET
        cumulative_streams = excluded.cumulative_streams,
        streams = excluded.streams,
        listeners = excluded.listeners";

/// Upper bound (exclusive) of integers an `f64` converts to without saturating.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn whole(value: Option<f64>) -> rusqlite::Result<Option<i64>> {
    let Some(v) = value else {
        return Ok(None);
    };
    let rounded = v.round();
    if rounded.is_finite() && rounded > -I64_LIMIT && rounded < I64_LIMIT {
        Ok(Some(rounded as i64))
    } else {
        Err(rusqlite::Error::ToSqlConversionFailure(
            format!("{} does not fit an integer column", v).into(),
        ))
    }
}

impl Loader {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self { sessions }
    }

    /// Runs `bind` for every row inside one transaction and returns the number
    /// of rows inserted or updated. Empty input never touches the store.
    fn write_batch<T>(
        &self,
        kind: EntityKind,
        sql: &str,
        rows: &[T],
        bind: impl Fn(&mut CachedStatement<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut session = self.sessions.session()?;
        let tx = session
            .transaction()
            .with_context(|| format!("Failed to begin {} batch", kind))?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for (index, row) in rows.iter().enumerate() {
                written += bind(&mut stmt, row).with_context(|| {
                    format!("{} row {} of {} rejected", kind, index + 1, rows.len())
                })?;
            }
        }
        tx.commit()
            .with_context(|| format!("Failed to commit {} batch", kind))?;

        debug!("Loaded {} {} rows ({} written)", rows.len(), kind, written);
        metrics::record_rows_loaded(kind, written);
        Ok(written)
    }

    pub fn load_regions(&self, regions: &[Region]) -> Result<usize> {
        self.write_batch(
            EntityKind::Region,
            "INSERT INTO region (code, name, grouping) VALUES (?1, ?2, ?3)
             ON CONFLICT (code) DO NOTHING",
            regions,
            |stmt, r| stmt.execute(params![r.code, r.name, r.group]),
        )
    }

    pub fn load_artists(&self, artists: &[Artist]) -> Result<usize> {
        self.write_batch(
            EntityKind::Artist,
            "INSERT INTO artist (id, name) VALUES (?1, ?2) ON CONFLICT (id) DO NOTHING",
            artists,
            |stmt, a| stmt.execute(params![a.id, a.name]),
        )
    }

    pub fn load_songs(&self, songs: &[Song]) -> Result<usize> {
        self.write_batch(
            EntityKind::Song,
            "INSERT INTO song (id, name) VALUES (?1, ?2) ON CONFLICT (id) DO NOTHING",
            songs,
            |stmt, s| stmt.execute(params![s.id, s.name]),
        )
    }

    pub fn load_artist_songs(&self, edges: &[ArtistSong]) -> Result<usize> {
        self.write_batch(
            EntityKind::ArtistSong,
            "INSERT INTO artist_song (artist_id, song_id) VALUES (?1, ?2)
             ON CONFLICT (artist_id, song_id) DO NOTHING",
            edges,
            |stmt, e| stmt.execute(params![e.artist_id, e.song_id]),
        )
    }

    pub fn load_chart_entries(&self, entries: &[ChartEntry]) -> Result<usize> {
        self.write_batch(EntityKind::ChartEntry, UPSERT_CHART_ENTRY, entries, |stmt, e| {
            stmt.execute(params![
                e.song_id,
                e.region_code,
                e.date,
                e.rank,
                e.streams,
                e.cumulative_streams,
                e.days_on_chart
            ])
        })
    }

    pub fn load_artist_stats(&self, stats: &[ArtistStat]) -> Result<usize> {
        self.write_batch(EntityKind::ArtistStat, UPSERT_ARTIST_STAT, stats, |stmt, s| {
            let cumulative_streams = whole(s.cumulative_streams)?;
            let streams = whole(s.streams)?;
            let listeners = whole(s.listeners)?;
            stmt.execute(params![s.artist_id, s.date, cumulative_streams, streams, listeners])
        })
    }

    /// Loads artists, songs, edges and entries in that order, stopping at the
    /// first kind that fails. Kinds written before the failure stay committed.
    pub fn load_chart_payload(
        &self,
        payload: &ChartPayload,
    ) -> Result<ChartLoadReport, LoadError> {
        let fail = |kind: EntityKind| {
            move |source: anyhow::Error| {
                error!("Chart payload load failed at {}: {:#}", kind, source);
                LoadError { kind, source }
            }
        };
        Ok(ChartLoadReport {
            artists: self.load_artists(&payload.artists).map_err(fail(EntityKind::Artist))?,
            songs: self.load_songs(&payload.songs).map_err(fail(EntityKind::Song))?,
            artist_songs: self
                .load_artist_songs(&payload.artist_songs)
                .map_err(fail(EntityKind::ArtistSong))?,
            entries: self
                .load_chart_entries(&payload.entries)
                .map_err(fail(EntityKind::ChartEntry))?,
        })
    }

    fn update_column(
        &self,
        kind: EntityKind,
        sql: &str,
        values: &[(String, Value)],
    ) -> Result<usize> {
        self.write_batch(kind, sql, values, |stmt, (id, blob)| stmt.execute(params![id, blob]))
    }

    /// Attaches metadata blobs to existing artists. Unknown ids are ignored.
    pub fn attach_artist_metadata(&self, values: &[(String, Value)]) -> Result<usize> {
        self.update_column(
            EntityKind::ArtistMetadata,
            "UPDATE artist SET metadata = ?2 WHERE id = ?1",
            values,
        )
    }

    pub fn attach_song_metadata(&self, values: &[(String, Value)]) -> Result<usize> {
        self.update_column(
            EntityKind::SongMetadata,
            "UPDATE song SET metadata = ?2 WHERE id = ?1",
            values,
        )
    }

    pub fn attach_song_features(&self, values: &[(String, Value)]) -> Result<usize> {
        self.update_column(
            EntityKind::SongFeatures,
            "UPDATE song SET features = ?2 WHERE id = ?1",
            values,
        )
    }

    pub fn set_artist_mbid(&self, values: &[(String, String)]) -> Result<usize> {
        self.write_batch(
            EntityKind::ArtistMbid,
            "UPDATE artist SET mbid = ?2 WHERE id = ?1",
            values,
            |stmt, (id, mbid)| stmt.execute(params![id, mbid]),
        )
    }
}
