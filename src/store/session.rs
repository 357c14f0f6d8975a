use super::schema;
use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_IDLE: usize = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out store sessions. Injected into loaders, readers and pipelines so
/// each unit of work opens its own session.
pub trait SessionFactory: Send + Sync {
    fn session(&self) -> Result<Session>;
}

/// One logical store session. Dereferences to the underlying connection and
/// returns it to its pool when dropped.
pub struct Session {
    conn: Option<Connection>,
    idle: Arc<Mutex<Vec<Connection>>>,
    max_idle: usize,
}

impl Deref for Session {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only taken in Drop
        self.conn.as_ref().expect("session connection present until drop")
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("session connection present until drop")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(conn);
            }
        }
    }
}

/// SQLite-backed factory keeping up to `max_idle` connections for reuse.
/// Idle connections are pre-flighted before being handed out again.
pub struct SqliteSessionFactory {
    path: PathBuf,
    idle: Arc<Mutex<Vec<Connection>>>,
    max_idle: usize,
}

impl SqliteSessionFactory {
    /// Opens (creating if needed) the store at `path` and brings its schema to
    /// the latest version.
    pub fn open<P: AsRef<Path>>(path: P, max_idle: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut conn = Self::connect(&path)?;
        schema::apply(&mut conn)
            .with_context(|| format!("Failed to prepare chart store at {:?}", path))?;
        info!("Opened chart store at {:?}", path);

        Ok(Self {
            path,
            idle: Arc::new(Mutex::new(vec![conn])),
            max_idle: max_idle.max(1),
        })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open chart store at {:?}", path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn is_alive(conn: &Connection) -> bool {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|v| v == 1)
            .unwrap_or(false)
    }

    fn take_idle(&self) -> Result<Option<Connection>> {
        let mut idle = self
            .idle
            .lock()
            .map_err(|_| anyhow!("Session pool lock poisoned"))?;
        while let Some(conn) = idle.pop() {
            if Self::is_alive(&conn) {
                return Ok(Some(conn));
            }
            warn!("Discarding dead pooled connection to {:?}", self.path);
        }
        Ok(None)
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

impl SessionFactory for SqliteSessionFactory {
    fn session(&self) -> Result<Session> {
        let conn = match self.take_idle()? {
            Some(conn) => conn,
            None => {
                debug!("Opening new connection to {:?}", self.path);
                Self::connect(&self.path)?
            }
        };
        Ok(Session {
            conn: Some(conn),
            idle: self.idle.clone(),
            max_idle: self.max_idle,
        })
    }
}
