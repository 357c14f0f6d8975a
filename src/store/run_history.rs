use super::SessionFactory;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// A row of `pipeline_run`.
#[derive(Debug, Clone)]
pub struct PipelineRunRecord {
    pub id: i64,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub summary: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Persists one row per pipeline run.
#[derive(Clone)]
pub struct RunHistory {
    sessions: Arc<dyn SessionFactory>,
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl RunHistory {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self { sessions }
    }

    pub fn record_start(&self, pipeline: &str, started_at: DateTime<Utc>) -> Result<i64> {
        let session = self.sessions.session()?;
        session
            .execute(
                "INSERT INTO pipeline_run (pipeline, started_at, status) VALUES (?1, ?2, ?3)",
                params![pipeline, started_at.to_rfc3339(), RunStatus::Running.as_str()],
            )
            .with_context(|| format!("Failed to record start of {}", pipeline))?;
        Ok(session.last_insert_rowid())
    }

    pub fn record_finish(
        &self,
        run_id: i64,
        finished_at: DateTime<Utc>,
        status: RunStatus,
        summary: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let session = self.sessions.session()?;
        let updated = session.execute(
            "UPDATE pipeline_run
             SET finished_at = ?2, status = ?3, summary = ?4, error_message = ?5
             WHERE id = ?1",
            params![
                run_id,
                finished_at.to_rfc3339(),
                status.as_str(),
                summary,
                error_message
            ],
        )?;
        if updated == 0 {
            anyhow::bail!("No pipeline run with id {}", run_id);
        }
        Ok(())
    }

    pub fn latest(&self, pipeline: &str) -> Result<Option<PipelineRunRecord>> {
        let session = self.sessions.session()?;
        let record = session
            .query_row(
                "SELECT id, pipeline, started_at, finished_at, status, summary, error_message
                 FROM pipeline_run WHERE pipeline = ?1
                 ORDER BY id DESC LIMIT 1",
                params![pipeline],
                |row| {
                    let started_at: String = row.get("started_at")?;
                    let finished_at: Option<String> = row.get("finished_at")?;
                    let status: String = row.get("status")?;
                    Ok(PipelineRunRecord {
                        id: row.get("id")?,
                        pipeline: row.get("pipeline")?,
                        started_at: parse_time(&started_at),
                        finished_at: finished_at.as_deref().map(parse_time),
                        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
                        summary: row.get("summary")?,
                        error_message: row.get("error_message")?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}
