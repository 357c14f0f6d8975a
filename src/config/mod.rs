mod file_config;

pub use file_config::{
    ExtractConfig, FileConfig, MetadataConfig, MusicBrainzConfig, ScheduleConfig,
};

use crate::extract::{SpotifyCredentials, DEFAULT_USER_AGENT};
use crate::models::Region;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub regions_file: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub regions_file: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,

    // Section settings (with defaults)
    pub extract: ExtractSettings,
    pub schedule: ScheduleSettings,
    pub metadata: MetadataSettings,
    pub musicbrainz: MusicBrainzSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        if db_path.is_dir() {
            bail!("db_path is a directory: {:?}", db_path);
        }
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let regions_file = file
            .regions_file
            .map(PathBuf::from)
            .or_else(|| cli.regions_file.clone());
        let metrics_file = file
            .metrics_file
            .map(PathBuf::from)
            .or_else(|| cli.metrics_file.clone());

        let ex = file.extract.unwrap_or_default();
        let defaults = ExtractSettings::default();
        let extract = ExtractSettings {
            chart_workers: ex.chart_workers.unwrap_or(defaults.chart_workers),
            stats_workers: ex.stats_workers.unwrap_or(defaults.stats_workers),
            item_timeout_secs: ex.item_timeout_secs.unwrap_or(defaults.item_timeout_secs),
            request_timeout_secs: ex
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            stats_request_interval_ms: ex
                .stats_request_interval_ms
                .unwrap_or(defaults.stats_request_interval_ms),
            listener_pages: ex.listener_pages.unwrap_or(defaults.listener_pages),
            load_batch_size: ex.load_batch_size.unwrap_or(defaults.load_batch_size),
            max_attempts: ex.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff_ms: ex.initial_backoff_ms.unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: ex.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: ex.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
        };
        if extract.chart_workers == 0 || extract.stats_workers == 0 {
            bail!("Worker pool sizes must be at least 1");
        }
        if extract.max_attempts == 0 {
            bail!("extract.max_attempts must be at least 1");
        }
        if extract.backoff_multiplier < 1.0 {
            bail!(
                "extract.backoff_multiplier must be >= 1.0, got {}",
                extract.backoff_multiplier
            );
        }

        let sc = file.schedule.unwrap_or_default();
        let schedule = ScheduleSettings {
            daily_interval_hours: sc.daily_interval_hours.unwrap_or(24),
            metadata_interval_hours: sc.metadata_interval_hours.unwrap_or(6),
            tick_secs: sc.tick_secs.unwrap_or(60),
        };
        if schedule.daily_interval_hours == 0 || schedule.metadata_interval_hours == 0 {
            bail!("Schedule intervals must be at least one hour");
        }

        // Credentials only ever come from the environment (via CLI), never the file.
        // An exported but empty variable counts as unset.
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let spotify = match (
            non_empty(&cli.spotify_client_id),
            non_empty(&cli.spotify_client_secret),
        ) {
            (Some(client_id), Some(client_secret)) => Some(SpotifyCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            _ => bail!("Both SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together"),
        };
        let md = file.metadata.unwrap_or_default();
        let metadata = MetadataSettings {
            spotify,
            require_credentials: md.require_credentials.unwrap_or(false),
            inter_batch_delay_ms: md.inter_batch_delay_ms.unwrap_or(1000),
            workers: md.workers.unwrap_or(1).max(1),
        };

        let mb = file.musicbrainz.unwrap_or_default();
        let musicbrainz = MusicBrainzSettings {
            enabled: mb.enabled.unwrap_or(true),
            user_agent: mb
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        };

        Ok(Self {
            db_path,
            regions_file,
            metrics_file,
            extract,
            schedule,
            metadata,
            musicbrainz,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub chart_workers: usize,
    pub stats_workers: usize,
    pub item_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Minimum gap between requests to the stats pages.
    pub stats_request_interval_ms: u64,
    pub listener_pages: u32,
    pub load_batch_size: usize,
    // Retry settings
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl ExtractSettings {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stats_request_interval(&self) -> Duration {
        Duration::from_millis(self.stats_request_interval_ms)
    }
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            chart_workers: 10,
            stats_workers: 5,
            item_timeout_secs: 60,
            request_timeout_secs: 15,
            stats_request_interval_ms: 0,
            listener_pages: 5,
            load_batch_size: 500,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub daily_interval_hours: u64,
    pub metadata_interval_hours: u64,
    pub tick_secs: u64,
}

impl ScheduleSettings {
    pub fn daily_interval(&self) -> Duration {
        Duration::from_secs(self.daily_interval_hours * 3600)
    }

    pub fn metadata_interval(&self) -> Duration {
        Duration::from_secs(self.metadata_interval_hours * 3600)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct MetadataSettings {
    pub spotify: Option<SpotifyCredentials>,
    pub require_credentials: bool,
    pub inter_batch_delay_ms: u64,
    pub workers: usize,
}

impl MetadataSettings {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct MusicBrainzSettings {
    pub enabled: bool,
    pub user_agent: String,
}

/// Reads the region seed list: a JSON array of `{"code", "name", "group"}`.
pub fn read_regions_file(path: &Path) -> Result<Vec<Region>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read regions file: {:?}", path))?;
    let regions: Vec<Region> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse regions file: {:?}", path))?;
    if let Some(bad) = regions.iter().find(|r| r.code.trim().is_empty()) {
        bail!("Region {:?} has an empty code", bad.name);
    }
    Ok(regions)
}
