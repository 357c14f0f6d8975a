use super::stats::DEFAULT_LOAD_BATCH_SIZE;
use super::{
    load_in_chunks, Pipeline, PipelineError, PipelineState, RunContext, RunSummary, RunTracker,
};
use crate::extract::{CrossReferenceSource, IdBatch, MetadataEndpoint, MetadataSource, WorkerPool};
use crate::load::Loader;
use crate::models::EntityKind;
use crate::store::StoreReader;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// One metadata enrichment step: which ids lack which blob, and where to get it.
#[derive(Debug, Clone, Copy)]
struct Step {
    kind: EntityKind,
    endpoint: MetadataEndpoint,
}

const STEPS: [Step; 3] = [
    Step {
        kind: EntityKind::ArtistMetadata,
        endpoint: MetadataEndpoint::Artists,
    },
    Step {
        kind: EntityKind::SongMetadata,
        endpoint: MetadataEndpoint::Tracks,
    },
    Step {
        kind: EntityKind::SongFeatures,
        endpoint: MetadataEndpoint::AudioFeatures,
    },
];

/// Attaches metadata and feature blobs to identities that lack them, then
/// resolves missing cross-reference ids. Either source may be absent, in
/// which case its steps report zero work.
pub struct MetadataPipeline {
    metadata: Option<Arc<dyn MetadataSource>>,
    cross_reference: Option<Arc<dyn CrossReferenceSource>>,
    reader: StoreReader,
    loader: Loader,
    pool: WorkerPool,
    load_batch_size: usize,
    require_metadata: bool,
}

impl MetadataPipeline {
    pub fn new(
        metadata: Option<Arc<dyn MetadataSource>>,
        cross_reference: Option<Arc<dyn CrossReferenceSource>>,
        reader: StoreReader,
        loader: Loader,
        pool: WorkerPool,
    ) -> Self {
        Self {
            metadata,
            cross_reference,
            reader,
            loader,
            pool,
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            require_metadata: false,
        }
    }

    pub fn with_load_batch_size(mut self, size: usize) -> Self {
        self.load_batch_size = size.max(1);
        self
    }

    /// Makes a missing metadata source a configuration error instead of a no-op.
    pub fn require_metadata(mut self, required: bool) -> Self {
        self.require_metadata = required;
        self
    }

    fn pending_ids(&self, kind: EntityKind) -> anyhow::Result<Vec<String>> {
        match kind {
            EntityKind::ArtistMetadata => self.reader.artists_missing_metadata(),
            EntityKind::SongMetadata => self.reader.songs_missing_metadata(),
            EntityKind::SongFeatures => self.reader.songs_missing_features(),
            EntityKind::ArtistMbid => self.reader.artists_missing_mbid(),
            other => anyhow::bail!("{} is not a metadata step", other),
        }
    }

    fn attach(&self, kind: EntityKind, values: &[(String, Value)]) -> anyhow::Result<usize> {
        match kind {
            EntityKind::ArtistMetadata => self.loader.attach_artist_metadata(values),
            EntityKind::SongMetadata => self.loader.attach_song_metadata(values),
            EntityKind::SongFeatures => self.loader.attach_song_features(values),
            other => anyhow::bail!("{} is not a metadata step", other),
        }
    }
}

#[async_trait]
impl Pipeline for MetadataPipeline {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn run(&self, ctx: &RunContext) -> Result<RunSummary, PipelineError> {
        if self.metadata.is_none() && self.require_metadata {
            return Err(PipelineError::Configuration(
                "metadata API credentials are required but not configured".to_string(),
            ));
        }

        // Enumerate everything up front so a store error fails before any fetch.
        let mut pending = Vec::new();
        if self.metadata.is_some() {
            for step in STEPS {
                let ids = self.pending_ids(step.kind).map_err(PipelineError::Extract)?;
                pending.push((step, ids));
            }
        } else {
            info!("Metadata API not configured; skipping metadata and feature steps");
        }
        let mbid_ids = match self.cross_reference {
            Some(_) => self
                .pending_ids(EntityKind::ArtistMbid)
                .map_err(PipelineError::Extract)?,
            None => Vec::new(),
        };

        let mut tracker = RunTracker::start(self.name());
        tracker.enter(PipelineState::Extracting);

        let mut fetched: Vec<(EntityKind, Vec<(String, Value)>)> = Vec::new();
        if let Some(source) = &self.metadata {
            for (step, ids) in pending {
                tracker.summary().attempted(step.kind, ids.len());
                let batches = IdBatch::chunk(&ids, step.endpoint.max_batch());
                info!(
                    "Fetching {} {} in {} batches",
                    ids.len(),
                    step.endpoint,
                    batches.len()
                );
                let report = self
                    .pool
                    .run(batches, &ctx.cancel, |batch: IdBatch| async move {
                        source.fetch_batch(step.endpoint, &batch.ids).await
                    })
                    .await;
                if report.cancelled {
                    return Err(tracker.cancelled());
                }

                let failed_ids: usize = report
                    .not_found
                    .iter()
                    .map(|b| b.ids.len())
                    .chain(report.failed.iter().map(|(b, _)| b.ids.len()))
                    .sum();
                let mut found = Vec::new();
                for (batch, items) in report.found {
                    // Keep the first blob per requested id; extras and repeats are dropped.
                    let mut requested: HashSet<&String> = batch.ids.iter().collect();
                    let items: Vec<_> = items
                        .into_iter()
                        .filter(|(id, _)| requested.remove(id))
                        .collect();
                    tracker.summary().skipped(step.kind, requested.len());
                    found.extend(items);
                }
                tracker.summary().skipped(step.kind, failed_ids);
                fetched.push((step.kind, found));
            }
        }

        let mut mbids: Vec<(String, String)> = Vec::new();
        if let Some(source) = &self.cross_reference {
            tracker.summary().attempted(EntityKind::ArtistMbid, mbid_ids.len());
            let report = self
                .pool
                .run(mbid_ids, &ctx.cancel, |id: String| async move {
                    source.lookup_mbid(&id).await
                })
                .await;
            tracker.summary().skipped(EntityKind::ArtistMbid, report.skipped());
            if report.cancelled {
                return Err(tracker.cancelled());
            }
            mbids = report.found;
        }

        // Blobs are attached as returned; ids are already unique per step.
        tracker.enter(PipelineState::Transforming);

        tracker.enter(PipelineState::Loading);
        let mut failure = None;
        for (kind, items) in &fetched {
            let loaded = load_in_chunks(
                &mut tracker,
                ctx,
                *kind,
                items,
                self.load_batch_size,
                &mut failure,
                |chunk| self.attach(*kind, chunk),
            );
            if loaded.is_err() {
                return Err(tracker.cancelled());
            }
        }
        let loaded = load_in_chunks(
            &mut tracker,
            ctx,
            EntityKind::ArtistMbid,
            &mbids,
            self.load_batch_size,
            &mut failure,
            |chunk| self.loader.set_artist_mbid(chunk),
        );
        if loaded.is_err() {
            return Err(tracker.cancelled());
        }

        tracker.conclude(failure)
    }
}
