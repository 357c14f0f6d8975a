use anyhow::{bail, Context, Result};
use clap::Parser;
use music_dataviz_etl::config::{read_regions_file, AppConfig, CliConfig, FileConfig};
use music_dataviz_etl::extract::{
    CrossReferenceSource, KworbChartSource, KworbStatsSource, MetadataSource, MusicBrainzClient,
    PageFetcher, RateLimiter, RetryPolicy, SpotifyMetadataSource, WorkerPool, DEFAULT_USER_AGENT,
};
use music_dataviz_etl::load::Loader;
use music_dataviz_etl::metrics;
use music_dataviz_etl::orchestrator::{Mode, Orchestrator, ScheduleIntervals};
use music_dataviz_etl::pipeline::{ArtistStatsPipeline, ChartsPipeline, MetadataPipeline};
use music_dataviz_etl::store::{
    RunHistory, SessionFactory, SqliteSessionFactory, StoreReader, DEFAULT_MAX_IDLE,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(version, about = "Collects music chart data into a SQLite store")]
struct CliArgs {
    /// Which cycle to run.
    #[clap(long, value_enum, default_value_t = Mode::Daily)]
    pub mode: Mode,

    /// Path to the SQLite chart store.
    #[clap(long, env = "DB_PATH", value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// JSON list of regions to seed before running.
    #[clap(long, value_parser = parse_path)]
    pub regions_file: Option<PathBuf>,

    /// Prometheus text file rewritten after every cycle.
    #[clap(long, value_parser = parse_path)]
    pub metrics_file: Option<PathBuf>,

    #[clap(long, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    pub spotify_client_id: Option<String>,

    #[clap(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub spotify_client_secret: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            regions_file: self.regions_file.clone(),
            metrics_file: self.metrics_file.clone(),
            spotify_client_id: self.spotify_client_id.clone(),
            spotify_client_secret: self.spotify_client_secret.clone(),
        }
    }
}

fn build_orchestrator(
    config: &AppConfig,
    sessions: Arc<dyn SessionFactory>,
    cancel: CancellationToken,
) -> Result<Orchestrator> {
    let extract = &config.extract;
    let retry = RetryPolicy::new(extract);
    let reader = StoreReader::new(sessions.clone());
    let loader = Loader::new(sessions.clone());

    let chart_fetcher = PageFetcher::new(extract.request_timeout(), DEFAULT_USER_AGENT)?;
    let charts = ChartsPipeline::new(
        Arc::new(KworbChartSource::new(chart_fetcher)),
        reader.clone(),
        loader.clone(),
        WorkerPool::new("charts", extract.chart_workers, retry.clone())
            .with_item_timeout(extract.item_timeout()),
    );

    let stats_fetcher = PageFetcher::new(extract.request_timeout(), DEFAULT_USER_AGENT)?
        .with_rate_limit(Arc::new(RateLimiter::new(extract.stats_request_interval())));
    let stats = ArtistStatsPipeline::new(
        Arc::new(KworbStatsSource::new(stats_fetcher, extract.listener_pages)),
        reader.clone(),
        loader.clone(),
        WorkerPool::new("stats", extract.stats_workers, retry.clone())
            .with_item_timeout(extract.item_timeout()),
    )
    .with_load_batch_size(extract.load_batch_size);

    let metadata_source: Option<Arc<dyn MetadataSource>> = match &config.metadata.spotify {
        Some(credentials) => {
            info!("Metadata API configured for client {}", credentials.client_id);
            Some(Arc::new(SpotifyMetadataSource::new(
                credentials.clone(),
                extract.request_timeout(),
                config.metadata.inter_batch_delay(),
            )?))
        }
        None => {
            warn!("SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET not set, metadata enrichment disabled");
            None
        }
    };
    let cross_reference: Option<Arc<dyn CrossReferenceSource>> = if config.musicbrainz.enabled {
        Some(Arc::new(MusicBrainzClient::new(
            &config.musicbrainz.user_agent,
        )?))
    } else {
        info!("MusicBrainz lookups disabled");
        None
    };
    let metadata = MetadataPipeline::new(
        metadata_source,
        cross_reference,
        reader,
        loader,
        WorkerPool::new("metadata", config.metadata.workers, retry)
            .with_item_timeout(extract.item_timeout()),
    )
    .require_metadata(config.metadata.require_credentials)
    .with_load_batch_size(extract.load_batch_size);

    let mut orchestrator = Orchestrator::new(cancel)
        .with_pipeline(Arc::new(charts))
        .with_pipeline(Arc::new(stats))
        .with_pipeline(Arc::new(metadata))
        .with_history(RunHistory::new(sessions));
    if let Some(path) = &config.metrics_file {
        orchestrator = orchestrator.with_metrics_file(path.clone());
    }
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening chart store at {:?}...", config.db_path);
    let sessions: Arc<dyn SessionFactory> =
        Arc::new(SqliteSessionFactory::open(&config.db_path, DEFAULT_MAX_IDLE)?);

    if let Some(path) = &config.regions_file {
        let regions = read_regions_file(path)?;
        let inserted = Loader::new(sessions.clone())
            .load_regions(&regions)
            .context("Failed to seed regions")?;
        info!("Seeded {} regions from {:?}", inserted, path);
    }

    info!("Initializing metrics...");
    metrics::init_metrics();

    let cancel = CancellationToken::new();
    let orchestrator = build_orchestrator(&config, sessions, cancel.clone())?;

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping after committed batches");
                interrupt.cancel();
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });

    let mode = cli_args.mode;
    let report = orchestrator
        .run_mode(mode, ScheduleIntervals::from(&config.schedule))
        .await;

    // The scheduler only ends on interrupt; its failures were already logged per cycle.
    if mode != Mode::Scheduler && !report.all_succeeded() {
        let failed: Vec<_> = report.failed().map(|o| o.pipeline).collect();
        if report.cancelled {
            bail!("Run interrupted ({})", report);
        }
        bail!("Pipelines failed: {}", failed.join(", "));
    }
    info!("Done: {}", report);
    Ok(())
}
