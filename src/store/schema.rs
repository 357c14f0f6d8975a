//! Versioned schema for the chart store.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tracing::info;

/// Offset added to schema versions in `PRAGMA user_version`, so a database
/// created by something else is never mistaken for one of ours.
pub const BASE_DB_VERSION: i64 = 41000;

pub struct EtlSchema {
    pub version: i64,
    pub up: &'static str,
}

pub const ETL_VERSIONED_SCHEMAS: &[EtlSchema] = &[EtlSchema {
    version: 1,
    up: r#"
            CREATE TABLE IF NOT EXISTS region (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                grouping TEXT
            );

            CREATE TABLE IF NOT EXISTS artist (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                metadata TEXT,
                mbid TEXT
            );

            CREATE TABLE IF NOT EXISTS song (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                metadata TEXT,
                features TEXT
            );

            CREATE TABLE IF NOT EXISTS artist_song (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                artist_id TEXT NOT NULL REFERENCES artist(id),
                song_id TEXT NOT NULL REFERENCES song(id),
                UNIQUE (artist_id, song_id)
            );

            CREATE TABLE IF NOT EXISTS chart_entry (
                song_id TEXT NOT NULL REFERENCES song(id),
                region_code TEXT NOT NULL REFERENCES region(code),
                date TEXT NOT NULL,
                rank INTEGER NOT NULL CHECK (rank > 0),
                streams INTEGER NOT NULL CHECK (streams >= 0),
                cumulative_streams INTEGER NOT NULL CHECK (cumulative_streams >= 0),
                days_on_chart INTEGER NOT NULL CHECK (days_on_chart >= 0),
                PRIMARY KEY (song_id, region_code, date)
            );

            CREATE TABLE IF NOT EXISTS artist_stat (
                artist_id TEXT NOT NULL REFERENCES artist(id),
                date TEXT NOT NULL,
                cumulative_streams INTEGER CHECK (cumulative_streams >= 0),
                streams INTEGER CHECK (streams >= 0),
                listeners INTEGER CHECK (listeners >= 0),
                PRIMARY KEY (artist_id, date)
            );

            CREATE TABLE IF NOT EXISTS pipeline_run (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL,
                summary TEXT,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_chart_entry_region_date ON chart_entry(region_code, date);
            CREATE INDEX IF NOT EXISTS idx_artist_song_song ON artist_song(song_id);
            CREATE INDEX IF NOT EXISTS idx_pipeline_run_started ON pipeline_run(pipeline, started_at DESC);
        "#,
}];

pub fn latest_version() -> i64 {
    ETL_VERSIONED_SCHEMAS.last().map(|s| s.version).unwrap_or(0)
}

/// Brings `conn` to the latest schema. A fresh database (user_version 0) gets
/// every schema applied; an older known version is migrated forward inside a
/// transaction; anything else is rejected.
pub fn apply(conn: &mut Connection) -> Result<()> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();

    let from_version = if raw_version == 0 {
        info!("Initializing chart store schema v{}", latest);
        0
    } else {
        let db_version = raw_version - BASE_DB_VERSION;
        if db_version < 1 || db_version > latest {
            bail!(
                "Unknown chart store version {} (this build supports up to {})",
                raw_version,
                BASE_DB_VERSION + latest
            );
        }
        db_version
    };
    if from_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for schema in ETL_VERSIONED_SCHEMAS.iter().filter(|s| s.version > from_version) {
        tx.execute_batch(schema.up)
            .with_context(|| format!("Failed to apply chart store schema v{}", schema.version))?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {};", BASE_DB_VERSION + latest))?;
    tx.commit()?;
    Ok(())
}
