//! Extract → transform → load pipelines and their per-run bookkeeping.

mod charts;
mod metadata;
mod stats;

pub use charts::ChartsPipeline;
pub use metadata::MetadataPipeline;
pub use stats::ArtistStatsPipeline;

use crate::load::LoadError;
use crate::models::EntityKind;
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Inputs shared by every pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub cancel: CancellationToken,
    /// Calendar day (UTC) the run belongs to.
    pub today: NaiveDate,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, today: NaiveDate) -> Self {
        Self { cancel, today }
    }

    /// Facts scraped today describe yesterday.
    pub fn fact_date(&self) -> NaiveDate {
        self.today.checked_sub_days(Days::new(1)).unwrap_or(self.today)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Extracting) | (Extracting, Transforming) | (Transforming, Loading) => true,
            (Loading, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Extracting => "extracting",
            PipelineState::Transforming => "transforming",
            PipelineState::Loading => "loading",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Attempted vs. succeeded records of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub state: PipelineState,
    pub counts: BTreeMap<EntityKind, KindCounts>,
    pub failure: Option<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(pipeline: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            state: PipelineState::Idle,
            counts: BTreeMap::new(),
            failure: None,
            duration_ms: 0,
        }
    }

    pub fn count(&self, kind: EntityKind) -> KindCounts {
        self.counts.get(&kind).copied().unwrap_or_default()
    }

    pub fn attempted(&mut self, kind: EntityKind, n: usize) {
        self.counts.entry(kind).or_default().attempted += n;
    }

    pub fn succeeded(&mut self, kind: EntityKind, n: usize) {
        self.counts.entry(kind).or_default().succeeded += n;
    }

    pub fn skipped(&mut self, kind: EntityKind, n: usize) {
        self.counts.entry(kind).or_default().skipped += n;
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.pipeline, self.state)?;
        for (kind, counts) in &self.counts {
            write!(
                f,
                " {}={}/{}",
                kind, counts.succeeded, counts.attempted
            )?;
            if counts.skipped > 0 {
                write!(f, " ({} skipped)", counts.skipped)?;
            }
        }
        if let Some(failure) = &self.failure {
            write!(f, " failure: {}", failure)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raised before any work is produced.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to enumerate work: {0:#}")]
    Extract(#[source] anyhow::Error),

    #[error("failed to load {kind}: {source:#}")]
    Load {
        kind: EntityKind,
        #[source]
        source: anyhow::Error,
        summary: Box<RunSummary>,
    },

    #[error("run cancelled")]
    Cancelled { summary: Box<RunSummary> },
}

impl PipelineError {
    /// Partial summary of the run, when it got far enough to produce one.
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            PipelineError::Load { summary, .. } | PipelineError::Cancelled { summary } => {
                Some(summary.as_ref())
            }
            PipelineError::Configuration(_) | PipelineError::Extract(_) => None,
        }
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &RunContext) -> Result<RunSummary, PipelineError>;
}

/// Drives one run through its states and accumulates the summary.
pub(crate) struct RunTracker {
    summary: RunSummary,
    started: Instant,
}

impl RunTracker {
    pub(crate) fn start(pipeline: &str) -> Self {
        info!("Starting {} pipeline", pipeline);
        Self {
            summary: RunSummary::new(pipeline),
            started: Instant::now(),
        }
    }

    pub(crate) fn enter(&mut self, next: PipelineState) {
        let current = self.summary.state;
        if !current.can_transition_to(next) {
            warn!(
                "{}: unexpected state transition {} -> {}",
                self.summary.pipeline, current, next
            );
        }
        debug!("{}: {} -> {}", self.summary.pipeline, current, next);
        self.summary.state = next;
    }

    pub(crate) fn summary(&mut self) -> &mut RunSummary {
        &mut self.summary
    }

    fn close(mut self, state: PipelineState, failure: Option<String>) -> RunSummary {
        self.enter(state);
        self.summary.failure = failure;
        self.summary.duration_ms =
            u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.summary
    }

    pub(crate) fn cancelled(self) -> PipelineError {
        let summary = self.close(PipelineState::Failed, Some("cancelled".to_string()));
        warn!("{}", summary);
        PipelineError::Cancelled {
            summary: Box::new(summary),
        }
    }

    /// Ends the run: `Done` when no load failed, otherwise `Failed` carrying
    /// the first load failure.
    pub(crate) fn conclude(self, failure: Option<LoadError>) -> Result<RunSummary, PipelineError> {
        match failure {
            None => {
                let summary = self.close(PipelineState::Done, None);
                info!("{}", summary);
                Ok(summary)
            }
            Some(LoadError { kind, source }) => {
                let summary = self.close(
                    PipelineState::Failed,
                    Some(format!("failed to load {}: {:#}", kind, source)),
                );
                error!("{}", summary);
                Err(PipelineError::Load {
                    kind,
                    source,
                    summary: Box::new(summary),
                })
            }
        }
    }
}

/// Chunked loading stopped because the run was cancelled.
#[derive(Debug)]
pub(crate) struct LoadCancelled;

/// Loads `rows` in chunks of `chunk_size`, one transaction per chunk. Rows of
/// committed chunks count as succeeded, rows of failed chunks as skipped; the
/// first failure is kept in `failure` and loading continues with the next chunk.
pub(crate) fn load_in_chunks<T>(
    tracker: &mut RunTracker,
    ctx: &RunContext,
    kind: EntityKind,
    rows: &[T],
    chunk_size: usize,
    failure: &mut Option<LoadError>,
    load: impl Fn(&[T]) -> anyhow::Result<usize>,
) -> Result<(), LoadCancelled> {
    for chunk in rows.chunks(chunk_size.max(1)) {
        if ctx.cancel.is_cancelled() {
            return Err(LoadCancelled);
        }
        match load(chunk) {
            Ok(_) => tracker.summary().succeeded(kind, chunk.len()),
            Err(source) => {
                error!("Failed to load {} {} rows: {:#}", chunk.len(), kind, source);
                tracker.summary().skipped(kind, chunk.len());
                if failure.is_none() {
                    *failure = Some(LoadError { kind, source });
                }
            }
        }
    }
    Ok(())
}
