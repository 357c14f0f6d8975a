use super::SessionFactory;
use anyhow::{Context, Result};
use rusqlite::params;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-side queries that enumerate pipeline work.
#[derive(Clone)]
pub struct StoreReader {
    sessions: Arc<dyn SessionFactory>,
}

impl StoreReader {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self { sessions }
    }

    fn strings(&self, sql: &str) -> Result<Vec<String>> {
        let session = self.sessions.session()?;
        let mut stmt = session.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Query failed: {}", sql))?;
        Ok(rows)
    }

    pub fn region_codes(&self) -> Result<Vec<String>> {
        self.strings("SELECT code FROM region ORDER BY code")
    }

    pub fn artist_ids(&self) -> Result<Vec<String>> {
        self.strings("SELECT id FROM artist ORDER BY id")
    }

    /// `artist id -> display name` for every stored artist.
    pub fn artist_names(&self) -> Result<HashMap<String, String>> {
        let session = self.sessions.session()?;
        let mut stmt = session.prepare_cached("SELECT id, name FROM artist")?;
        let names = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(names)
    }

    pub fn artists_missing_metadata(&self) -> Result<Vec<String>> {
        self.strings("SELECT id FROM artist WHERE metadata IS NULL ORDER BY id")
    }

    pub fn songs_missing_metadata(&self) -> Result<Vec<String>> {
        self.strings("SELECT id FROM song WHERE metadata IS NULL ORDER BY id")
    }

    pub fn songs_missing_features(&self) -> Result<Vec<String>> {
        self.strings("SELECT id FROM song WHERE features IS NULL ORDER BY id")
    }

    pub fn artists_missing_mbid(&self) -> Result<Vec<String>> {
        self.strings("SELECT id FROM artist WHERE mbid IS NULL ORDER BY id")
    }
}
