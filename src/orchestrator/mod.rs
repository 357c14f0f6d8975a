//! Runs pipelines in dependency order, once or on a recurring schedule.

mod scheduler;

pub use scheduler::{run_scheduler, Clock, CycleJob, Scheduler, SystemClock};

use crate::metrics;
use crate::pipeline::{Pipeline, PipelineError, RunContext, RunSummary};
use crate::store::{RunHistory, RunStatus};
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What the process does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// charts → stats → metadata, once.
    #[default]
    Daily,
    Charts,
    Stats,
    Metadata,
    /// Daily cycle now, then daily and metadata-only cycles on their intervals.
    Scheduler,
}

impl Mode {
    /// The single pipeline this mode runs, for the one-pipeline modes.
    fn pipeline_name(&self) -> Option<&'static str> {
        match self {
            Mode::Charts => Some("charts"),
            Mode::Stats => Some("stats"),
            Mode::Metadata => Some("metadata"),
            Mode::Daily | Mode::Scheduler => None,
        }
    }
}

/// Result of one pipeline inside a cycle.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub pipeline: &'static str,
    pub result: Result<RunSummary, PipelineError>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match &self.result {
            Ok(summary) => Some(summary),
            Err(e) => e.summary(),
        }
    }
}

/// Outcomes of every pipeline a cycle ran, in run order.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<PipelineOutcome>,
    /// Pipelines were left unstarted because of a cancellation request.
    pub cancelled: bool,
}

impl CycleReport {
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(PipelineOutcome::succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn outcome(&self, pipeline: &str) -> Option<&PipelineOutcome> {
        self.outcomes.iter().find(|o| o.pipeline == pipeline)
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ok = self.outcomes.iter().filter(|o| o.succeeded()).count();
        write!(f, "{}/{} pipelines succeeded", ok, self.outcomes.len())?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

pub struct Orchestrator {
    /// Dependency order: identity-producing pipelines before enrichment.
    pipelines: Vec<Arc<dyn Pipeline>>,
    history: Option<RunHistory>,
    metrics_file: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            pipelines: Vec::new(),
            history: None,
            metrics_file: None,
            cancel,
        }
    }

    /// Appends a pipeline; cycles run pipelines in the order they were added.
    pub fn with_pipeline(mut self, pipeline: Arc<dyn Pipeline>) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    pub fn with_history(mut self, history: RunHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Rewrites the metrics text file after every cycle.
    pub fn with_metrics_file(mut self, path: PathBuf) -> Self {
        self.metrics_file = Some(path);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pipeline_names(&self) -> Vec<&'static str> {
        self.pipelines.iter().map(|p| p.name()).collect()
    }

    /// Every pipeline once, in order.
    pub async fn run_daily(&self) -> CycleReport {
        info!("Starting daily cycle");
        self.run_cycle(|_| true).await
    }

    pub async fn run_metadata_only(&self) -> CycleReport {
        info!("Starting metadata-only cycle");
        self.run_cycle(|name| name == "metadata").await
    }

    /// Runs the cycle `mode` asks for. Scheduler mode loops on the given
    /// intervals until cancelled and reports its last cycle.
    pub async fn run_mode(&self, mode: Mode, schedule: ScheduleIntervals) -> CycleReport {
        match mode {
            Mode::Daily => self.run_daily().await,
            Mode::Scheduler => {
                run_scheduler(self, schedule, Arc::new(SystemClock)).await
            }
            single => {
                let wanted = single.pipeline_name();
                info!("Running {} pipeline only", wanted.unwrap_or("no"));
                self.run_cycle(|name| Some(name) == wanted).await
            }
        }
    }

    async fn run_cycle(&self, selected: impl Fn(&str) -> bool) -> CycleReport {
        let mut report = CycleReport::default();
        for pipeline in self.pipelines.iter().filter(|p| selected(p.name())) {
            if self.cancel.is_cancelled() {
                warn!("Cycle cancelled before {} pipeline", pipeline.name());
                report.cancelled = true;
                break;
            }
            let outcome = self.run_pipeline(pipeline.as_ref()).await;
            if matches!(outcome.result, Err(PipelineError::Cancelled { .. })) {
                report.cancelled = true;
            }
            report.outcomes.push(outcome);
        }

        for failed in report.failed() {
            if let Err(e) = &failed.result {
                error!("Pipeline {} failed: {}", failed.pipeline, e);
            }
        }
        info!("Cycle finished: {}", report);
        self.export_metrics();
        report
    }

    /// One pipeline run, with history and metrics. Never propagates the
    /// pipeline's failure; the caller moves on to the next pipeline.
    async fn run_pipeline(&self, pipeline: &dyn Pipeline) -> PipelineOutcome {
        let name = pipeline.name();
        let ctx = RunContext::new(self.cancel.clone(), Utc::now().date_naive());
        let run_id = self.history.as_ref().and_then(|history| {
            history
                .record_start(name, Utc::now())
                .map_err(|e| warn!("Failed to record start of {} run: {:#}", name, e))
                .ok()
        });

        let started = Instant::now();
        let result = pipeline.run(&ctx).await;
        metrics::record_pipeline_run(name, result.is_ok(), started.elapsed());

        if let (Some(history), Some(id)) = (&self.history, run_id) {
            let (status, summary, message) = match &result {
                Ok(summary) => (RunStatus::Completed, Some(summary.to_json()), None),
                Err(e) => (
                    RunStatus::Failed,
                    e.summary().map(RunSummary::to_json),
                    Some(e.to_string()),
                ),
            };
            if let Err(e) = history.record_finish(
                id,
                Utc::now(),
                status,
                summary.as_ref(),
                message.as_deref(),
            ) {
                warn!("Failed to record end of {} run {}: {:#}", name, id, e);
            }
        }

        PipelineOutcome {
            pipeline: name,
            result,
        }
    }

    fn export_metrics(&self) {
        if let Some(path) = &self.metrics_file {
            if let Err(e) = metrics::write_text_file(path) {
                warn!("Failed to export metrics: {:#}", e);
            }
        }
    }
}

/// Cadences of the scheduler loop.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleIntervals {
    pub daily: Duration,
    pub metadata: Duration,
    /// Longest sleep between two checks.
    pub tick: Duration,
}

impl From<&crate::config::ScheduleSettings> for ScheduleIntervals {
    fn from(settings: &crate::config::ScheduleSettings) -> Self {
        Self {
            daily: settings.daily_interval(),
            metadata: settings.metadata_interval(),
            tick: settings.tick(),
        }
    }
}
