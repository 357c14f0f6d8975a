use super::{Pipeline, PipelineError, PipelineState, RunContext, RunSummary, RunTracker};
use crate::extract::{ChartSource, WorkerPool};
use crate::load::{LoadError, Loader};
use crate::models::{ChartPayload, EntityKind};
use crate::store::StoreReader;
use crate::transform::normalize_chart_page;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Daily charts: one chart page per stored region, loaded as one payload
/// (artists, songs, edges, entries) per region.
pub struct ChartsPipeline {
    source: Arc<dyn ChartSource>,
    reader: StoreReader,
    loader: Loader,
    pool: WorkerPool,
}

impl ChartsPipeline {
    pub fn new(
        source: Arc<dyn ChartSource>,
        reader: StoreReader,
        loader: Loader,
        pool: WorkerPool,
    ) -> Self {
        Self {
            source,
            reader,
            loader,
            pool,
        }
    }
}

/// Counts a region's payload. Kinds are written in load order, so on failure
/// the kinds before the failing one are already committed.
fn record_payload(
    summary: &mut RunSummary,
    payload: &ChartPayload,
    failure: Option<&LoadError>,
) {
    let sizes = [
        (EntityKind::Artist, payload.artists.len()),
        (EntityKind::Song, payload.songs.len()),
        (EntityKind::ArtistSong, payload.artist_songs.len()),
        (EntityKind::ChartEntry, payload.entries.len()),
    ];
    let mut committed = true;
    for (kind, n) in sizes {
        if failure.is_some_and(|e| e.kind == kind) {
            committed = false;
        }
        if committed {
            summary.succeeded(kind, n);
        } else {
            summary.skipped(kind, n);
        }
    }
}

#[async_trait]
impl Pipeline for ChartsPipeline {
    fn name(&self) -> &'static str {
        "charts"
    }

    async fn run(&self, ctx: &RunContext) -> Result<RunSummary, PipelineError> {
        let regions = self.reader.region_codes().map_err(PipelineError::Extract)?;
        let mut tracker = RunTracker::start(self.name());
        if regions.is_empty() {
            info!("No regions stored; seed them with --regions-file");
        }

        tracker.enter(PipelineState::Extracting);
        tracker.summary().attempted(EntityKind::ChartPage, regions.len());
        let source = &self.source;
        let report = self
            .pool
            .run(regions, &ctx.cancel, |code: String| async move {
                source.fetch_region(&code).await
            })
            .await;
        tracker.summary().succeeded(EntityKind::ChartPage, report.found.len());
        tracker.summary().skipped(EntityKind::ChartPage, report.skipped());
        if report.cancelled {
            return Err(tracker.cancelled());
        }

        tracker.enter(PipelineState::Transforming);
        let fallback_date = ctx.fact_date();
        let mut payloads = Vec::with_capacity(report.found.len());
        for (code, page) in report.found {
            let date = page.date.unwrap_or(fallback_date);
            let normalized = normalize_chart_page(&code, date, &page.rows);
            let summary = tracker.summary();
            summary.attempted(EntityKind::Artist, normalized.payload.artists.len());
            summary.attempted(EntityKind::Song, normalized.payload.songs.len());
            summary.attempted(EntityKind::ArtistSong, normalized.payload.artist_songs.len());
            summary.attempted(
                EntityKind::ChartEntry,
                normalized.payload.entries.len() + normalized.rejected,
            );
            summary.skipped(EntityKind::ChartEntry, normalized.rejected);
            payloads.push((code, normalized.payload));
        }

        tracker.enter(PipelineState::Loading);
        let mut failure: Option<LoadError> = None;
        for (code, payload) in &payloads {
            if ctx.cancel.is_cancelled() {
                return Err(tracker.cancelled());
            }
            match self.loader.load_chart_payload(payload) {
                Ok(_) => record_payload(tracker.summary(), payload, None),
                Err(e) => {
                    error!("Chart load for region {} failed: {}", code, e);
                    record_payload(tracker.summary(), payload, Some(&e));
                    failure.get_or_insert(e);
                }
            }
        }

        tracker.conclude(failure)
    }
}
