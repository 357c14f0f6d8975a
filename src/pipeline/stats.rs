use super::{
    load_in_chunks, Pipeline, PipelineError, PipelineState, RunContext, RunSummary, RunTracker,
};
use crate::extract::{StatsSource, WorkerPool};
use crate::load::Loader;
use crate::models::{ArtistStat, EntityKind, RawListenerRow};
use crate::store::StoreReader;
use crate::transform::{normalize_artist_stats, normalize_listeners};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_LOAD_BATCH_SIZE: usize = 500;

/// Per-artist stats for every stored artist, enriched with listener counts
/// from the ranking index (matched by display name).
pub struct ArtistStatsPipeline {
    source: Arc<dyn StatsSource>,
    reader: StoreReader,
    loader: Loader,
    pool: WorkerPool,
    load_batch_size: usize,
}

impl ArtistStatsPipeline {
    pub fn new(
        source: Arc<dyn StatsSource>,
        reader: StoreReader,
        loader: Loader,
        pool: WorkerPool,
    ) -> Self {
        Self {
            source,
            reader,
            loader,
            pool,
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }

    pub fn with_load_batch_size(mut self, size: usize) -> Self {
        self.load_batch_size = size.max(1);
        self
    }
}

#[async_trait]
impl Pipeline for ArtistStatsPipeline {
    fn name(&self) -> &'static str {
        "stats"
    }

    async fn run(&self, ctx: &RunContext) -> Result<RunSummary, PipelineError> {
        let artist_ids = self.reader.artist_ids().map_err(PipelineError::Extract)?;
        let artist_names = self.reader.artist_names().map_err(PipelineError::Extract)?;
        let mut tracker = RunTracker::start(self.name());
        info!("Collecting stats for {} artists", artist_ids.len());

        tracker.enter(PipelineState::Extracting);
        tracker.summary().attempted(EntityKind::ArtistStat, artist_ids.len());
        let source = &self.source;
        let stats_report = self
            .pool
            .run(artist_ids, &ctx.cancel, |id: String| async move {
                source.fetch_artist_stats(&id).await
            })
            .await;
        tracker.summary().skipped(EntityKind::ArtistStat, stats_report.skipped());
        if stats_report.cancelled {
            return Err(tracker.cancelled());
        }

        let pages: Vec<u32> = (1..=source.listener_pages()).collect();
        tracker.summary().attempted(EntityKind::ListenerPage, pages.len());
        let listener_report = self
            .pool
            .run(pages, &ctx.cancel, |page: u32| async move {
                source.fetch_listeners(page).await
            })
            .await;
        tracker.summary().succeeded(EntityKind::ListenerPage, listener_report.found.len());
        tracker.summary().skipped(EntityKind::ListenerPage, listener_report.skipped());
        if listener_report.cancelled {
            return Err(tracker.cancelled());
        }

        tracker.enter(PipelineState::Transforming);
        let listener_rows: Vec<RawListenerRow> = listener_report
            .found
            .into_iter()
            .flat_map(|(_, rows)| rows)
            .collect();
        let listeners = normalize_listeners(&listener_rows);
        info!("Listener index covers {} artists", listeners.len());

        let date = ctx.fact_date();
        let mut stats: Vec<ArtistStat> = Vec::with_capacity(stats_report.found.len());
        for (artist_id, raw) in &stats_report.found {
            match normalize_artist_stats(artist_id, date, raw) {
                Ok(mut stat) => {
                    stat.listeners = artist_names
                        .get(artist_id)
                        .and_then(|name| listeners.get(name))
                        .copied();
                    stats.push(stat);
                }
                Err(e) => {
                    warn!("Discarding stats for artist {}: {}", artist_id, e);
                    tracker.summary().skipped(EntityKind::ArtistStat, 1);
                }
            }
        }

        tracker.enter(PipelineState::Loading);
        let mut failure = None;
        let loaded = load_in_chunks(
            &mut tracker,
            ctx,
            EntityKind::ArtistStat,
            &stats,
            self.load_batch_size,
            &mut failure,
            |chunk| self.loader.load_artist_stats(chunk),
        );
        if loaded.is_err() {
            return Err(tracker.cancelled());
        }

        tracker.conclude(failure)
    }
}
