//! Temporary stores and canned source payloads.
#![allow(dead_code)]

use super::constants::*;
use chrono::NaiveDate;
use music_dataviz_etl::extract::{RetryPolicy, WorkerPool};
use music_dataviz_etl::load::Loader;
use music_dataviz_etl::models::{CellLink, ChartPage, RawChartRow, Region};
use music_dataviz_etl::pipeline::RunContext;
use music_dataviz_etl::store::{
    RunHistory, SessionFactory, SqliteSessionFactory, StoreReader, DEFAULT_MAX_IDLE,
};
use rusqlite::params;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A chart store in a temporary directory, removed on drop.
pub struct TestStore {
    _dir: TempDir,
    pub sessions: Arc<dyn SessionFactory>,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let factory = SqliteSessionFactory::open(dir.path().join("charts.db"), DEFAULT_MAX_IDLE)
            .unwrap();
        Self {
            _dir: dir,
            sessions: Arc::new(factory),
        }
    }

    /// Store seeded with one region per code (name = code).
    pub fn with_regions(codes: &[&str]) -> Self {
        let store = Self::new();
        let regions: Vec<Region> = codes
            .iter()
            .map(|code| Region {
                code: code.to_string(),
                name: code.to_string(),
                group: None,
            })
            .collect();
        store.loader().load_regions(&regions).unwrap();
        store
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader::new(self.sessions.clone())
    }

    pub fn loader(&self) -> Loader {
        Loader::new(self.sessions.clone())
    }

    pub fn history(&self) -> RunHistory {
        RunHistory::new(self.sessions.clone())
    }

    pub fn count(&self, table: &str) -> i64 {
        let session = self.sessions.session().unwrap();
        session
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    /// Inserts bare artists directly, for pipelines that start from stored identities.
    pub fn insert_artists(&self, artists: &[(&str, &str)]) {
        let session = self.sessions.session().unwrap();
        for (id, name) in artists {
            session
                .execute(
                    "INSERT INTO artist (id, name) VALUES (?1, ?2)",
                    params![id, name],
                )
                .unwrap();
        }
    }

    pub fn insert_songs(&self, songs: &[(&str, &str)]) {
        let session = self.sessions.session().unwrap();
        for (id, name) in songs {
            session
                .execute("INSERT INTO song (id, name) VALUES (?1, ?2)", params![id, name])
                .unwrap();
        }
    }

    /// `(rank, streams, cumulative_streams, days_on_chart)` of one chart entry.
    pub fn chart_entry(&self, song_id: &str, region: &str) -> Option<(i64, i64, i64, i64)> {
        let session = self.sessions.session().unwrap();
        session
            .query_row(
                "SELECT rank, streams, cumulative_streams, days_on_chart
                 FROM chart_entry WHERE song_id = ?1 AND region_code = ?2",
                params![song_id, region],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .ok()
    }

    /// `(cumulative_streams, streams, listeners)` of the only stat row of an artist.
    pub fn artist_stat(&self, artist_id: &str) -> Option<(Option<i64>, Option<i64>, Option<i64>)> {
        let session = self.sessions.session().unwrap();
        session
            .query_row(
                "SELECT cumulative_streams, streams, listeners FROM artist_stat WHERE artist_id = ?1",
                params![artist_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok()
    }

    /// Makes every insert into `table` abort, to simulate a failing write.
    pub fn reject_inserts_into(&self, table: &str) {
        let session = self.sessions.session().unwrap();
        session
            .execute_batch(&format!(
                "CREATE TRIGGER reject_{table} BEFORE INSERT ON {table}
                 BEGIN SELECT RAISE(ABORT, '{table} writes disabled'); END;"
            ))
            .unwrap();
    }

    pub fn string_column(&self, sql: &str, id: &str) -> Option<String> {
        let session = self.sessions.session().unwrap();
        session
            .query_row(sql, params![id], |row| row.get::<_, Option<String>>(0))
            .unwrap()
    }
}

/// A chart table row with one track link followed by the given artist links.
pub fn chart_row(
    rank: &str,
    song: (&str, &str),
    artists: &[(&str, &str)],
    streams: &str,
    total: &str,
) -> RawChartRow {
    let mut links = vec![CellLink::new(format!("../track/{}.html", song.0), song.1)];
    links.extend(
        artists
            .iter()
            .map(|(id, name)| CellLink::new(format!("../artist/{}.html", id), *name)),
    );
    RawChartRow {
        rank: rank.to_string(),
        links,
        days: "12".to_string(),
        streams: streams.to_string(),
        total: total.to_string(),
    }
}

/// Two valid rows plus one row without artists, dated [`CHART_DATE`].
pub fn us_chart_page() -> ChartPage {
    let (y, m, d) = CHART_DATE;
    ChartPage {
        date: NaiveDate::from_ymd_opt(y, m, d),
        rows: vec![
            chart_row(
                "1",
                (SONG_A_ID, SONG_A_NAME),
                &[(ARTIST_X_ID, ARTIST_X_NAME), (ARTIST_Y_ID, ARTIST_Y_NAME)],
                "1,234",
                "500,000+",
            ),
            chart_row("2", (SONG_B_ID, SONG_B_NAME), &[(ARTIST_X_ID, ARTIST_X_NAME)], "-", "-"),
            chart_row("3", ("orphan", "No Artists"), &[], "10", "10"),
        ],
    }
}

/// Pool without backoff or timeouts, so tests run instantly.
pub fn test_pool(name: &str, size: usize) -> WorkerPool {
    WorkerPool::new(name, size, RetryPolicy::immediate(3))
}

pub fn run_context(cancel: CancellationToken) -> RunContext {
    RunContext::new(cancel, NaiveDate::from_ymd_opt(2024, 5, 18).unwrap())
}
